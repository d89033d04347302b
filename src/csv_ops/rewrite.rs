//! Bulk rewrite of one named column across a CSV file, with a durable
//! backup copy taken before the destructive write.
use std::fs::{self, File, OpenOptions};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

/// Value-assignment rule for the target column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteRule {
    /// Every eligible data row's target field is set to this literal.
    Constant(String),
    /// The data row at 1-based position i (header excluded) receives i as a
    /// string. Short rows still consume their position.
    Sequential,
}

#[derive(Debug, Clone)]
pub struct RewriteOptions {
    pub input: PathBuf,
    /// Defaults to overwriting `input`.
    pub output: Option<PathBuf>,
    pub column: String,
    pub rule: RewriteRule,
    /// Defaults to a timestamped sibling of `input`.
    pub backup: Option<PathBuf>,
    pub dry_run: bool,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RewriteOutcome {
    /// Data rows read (header excluded).
    pub rows_read: usize,
    pub rows_modified: usize,
    /// Rows too short to hold the target column, passed through untouched.
    pub rows_skipped_short: usize,
    /// None when dry_run skipped the side effects.
    pub backup_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("column {column:?} not present in header")]
    ColumnMissing { column: String },
    #[error("no header row in {}", .path.display())]
    EmptyTable { path: PathBuf },
    #[error("backup copy failed: {0}")]
    Backup(#[source] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Apply `opts.rule` to the target column of every eligible data row and
/// persist the full table. The pre-mutation file is copied to the backup
/// path and fsynced before the output path is touched; any backup failure
/// aborts the run with nothing overwritten.
pub fn rewrite_column(opts: &RewriteOptions) -> Result<RewriteOutcome, RewriteError> {
    let file = File::open(&opts.input)?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::None)
        .from_reader(BufReader::new(file));

    let headers = rdr.headers()?.clone();
    if headers.is_empty() {
        return Err(RewriteError::EmptyTable {
            path: opts.input.clone(),
        });
    }

    // First match wins when the header repeats a name.
    let column_index = headers
        .iter()
        .position(|h| h == opts.column.as_str())
        .ok_or_else(|| RewriteError::ColumnMissing {
            column: opts.column.clone(),
        })?;
    debug!(header = ?headers, "table header");
    info!(column = %opts.column, index = column_index, "resolved target column");

    let mut rows: Vec<StringRecord> = Vec::new();
    for record in rdr.records() {
        rows.push(record?);
    }

    let mut outcome = RewriteOutcome {
        rows_read: rows.len(),
        ..Default::default()
    };

    for (pos, row) in rows.iter_mut().enumerate() {
        if row.len() <= column_index {
            outcome.rows_skipped_short += 1;
            continue;
        }
        let value = match &opts.rule {
            RewriteRule::Constant(literal) => literal.clone(),
            RewriteRule::Sequential => (pos + 1).to_string(),
        };
        *row = replace_field(row, column_index, &value);
        outcome.rows_modified += 1;
    }

    if opts.dry_run {
        info!(
            rows_read = outcome.rows_read,
            rows_modified = outcome.rows_modified,
            "dry-run: no backup, no write"
        );
        return Ok(outcome);
    }

    let backup_path = opts
        .backup
        .clone()
        .unwrap_or_else(|| default_backup_path(&opts.input));
    let output_path = opts.output.clone().unwrap_or_else(|| opts.input.clone());

    if same_path(&opts.input, &backup_path) || same_path(&output_path, &backup_path) {
        return Err(RewriteError::Backup(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "backup path collides with input/output path",
        )));
    }

    // The destructive write must never start without a durable backup.
    copy_durable(&opts.input, &backup_path).map_err(RewriteError::Backup)?;
    info!(backup = %backup_path.display(), "backup written");

    write_rows(&output_path, &headers, &rows)?;
    info!(
        output = %output_path.display(),
        rows_read = outcome.rows_read,
        rows_modified = outcome.rows_modified,
        rows_skipped_short = outcome.rows_skipped_short,
        "table rewritten"
    );

    outcome.backup_path = Some(backup_path);
    Ok(outcome)
}

/// Timestamped sibling path: `products.csv` -> `products_backup_<ts>.csv`.
pub fn default_backup_path(input: &Path) -> PathBuf {
    let ts = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("table");
    let name = match input.extension().and_then(|s| s.to_str()) {
        Some(ext) => format!("{stem}_backup_{ts}.{ext}"),
        None => format!("{stem}_backup_{ts}"),
    };
    input.with_file_name(name)
}

fn replace_field(row: &StringRecord, index: usize, value: &str) -> StringRecord {
    row.iter()
        .enumerate()
        .map(|(i, field)| if i == index { value } else { field })
        .collect()
}

fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => false,
    }
}

fn copy_durable(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::copy(src, dst)?;
    sync_to_disk(dst)
}

fn sync_to_disk(path: &Path) -> std::io::Result<()> {
    OpenOptions::new().write(true).open(path)?.sync_all()
}

fn write_rows(
    path: &Path,
    headers: &StringRecord,
    rows: &[StringRecord],
) -> Result<(), RewriteError> {
    let mut wtr = WriterBuilder::new()
        .flexible(true)
        .from_writer(File::create(path)?);
    wtr.write_record(headers)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    drop(wtr);
    sync_to_disk(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).expect("write fixture");
        path
    }

    fn opts(input: &Path, column: &str, rule: RewriteRule) -> RewriteOptions {
        RewriteOptions {
            input: input.to_path_buf(),
            output: None,
            column: column.to_string(),
            rule,
            backup: None,
            dry_run: false,
        }
    }

    #[test]
    fn sequential_rule_numbers_data_rows() {
        let dir = tempdir().expect("tempdir");
        let input = write_file(dir.path(), "products.csv", "id,polarId\n1,x\n2,y\n");

        let outcome = rewrite_column(&opts(&input, "polarId", RewriteRule::Sequential))
            .expect("rewrite");

        assert_eq!(outcome.rows_read, 2);
        assert_eq!(outcome.rows_modified, 2);
        let written = fs::read_to_string(&input).expect("read output");
        assert_eq!(written, "id,polarId\n1,1\n2,2\n");
    }

    #[test]
    fn constant_rule_overwrites_every_eligible_row() {
        let dir = tempdir().expect("tempdir");
        let input = write_file(
            dir.path(),
            "products.csv",
            "id,polarId,name\na,111,mug\nb,,bowl\n",
        );

        let rule = RewriteRule::Constant("0000".into());
        let outcome = rewrite_column(&opts(&input, "polarId", rule)).expect("rewrite");

        assert_eq!(outcome.rows_modified, 2);
        let written = fs::read_to_string(&input).expect("read output");
        assert_eq!(written, "id,polarId,name\na,0000,mug\nb,0000,bowl\n");
    }

    #[test]
    fn constant_rule_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let input = write_file(dir.path(), "t.csv", "id,polarId\n1,0000\n2,0000\n");

        let rule = RewriteRule::Constant("0000".into());
        let first = rewrite_column(&opts(&input, "polarId", rule.clone())).expect("first");
        let after_first = fs::read_to_string(&input).expect("read");
        let second = rewrite_column(&opts(&input, "polarId", rule)).expect("second");
        let after_second = fs::read_to_string(&input).expect("read");

        assert_eq!(first.rows_modified, second.rows_modified);
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn short_rows_pass_through_untouched() {
        let dir = tempdir().expect("tempdir");
        let input = write_file(dir.path(), "t.csv", "id,polarId\nonly-id\n2,y\n");

        let outcome =
            rewrite_column(&opts(&input, "polarId", RewriteRule::Sequential)).expect("rewrite");

        assert_eq!(outcome.rows_read, 2);
        assert_eq!(outcome.rows_modified, 1);
        assert_eq!(outcome.rows_skipped_short, 1);
        let written = fs::read_to_string(&input).expect("read output");
        // The short row keeps its bytes; the eligible row keeps its table
        // position (2), it is not renumbered around the skipped one.
        assert_eq!(written, "id,polarId\nonly-id\n2,2\n");
    }

    #[test]
    fn missing_column_is_a_structured_failure() {
        let dir = tempdir().expect("tempdir");
        let input = write_file(dir.path(), "t.csv", "id,name\n1,mug\n");

        let err = rewrite_column(&opts(&input, "polarId", RewriteRule::Sequential))
            .expect_err("must fail");

        assert!(matches!(
            err,
            RewriteError::ColumnMissing { ref column } if column == "polarId"
        ));
        // Nothing was touched.
        assert_eq!(fs::read_to_string(&input).expect("read"), "id,name\n1,mug\n");
    }

    #[test]
    fn empty_file_reports_empty_table() {
        let dir = tempdir().expect("tempdir");
        let input = write_file(dir.path(), "t.csv", "");

        let err = rewrite_column(&opts(&input, "polarId", RewriteRule::Sequential))
            .expect_err("must fail");

        assert!(matches!(err, RewriteError::EmptyTable { .. }));
    }

    #[test]
    fn header_only_file_rewrites_zero_rows() {
        let dir = tempdir().expect("tempdir");
        let input = write_file(dir.path(), "t.csv", "id,polarId\n");

        let outcome =
            rewrite_column(&opts(&input, "polarId", RewriteRule::Sequential)).expect("rewrite");

        assert_eq!(outcome.rows_read, 0);
        assert_eq!(outcome.rows_modified, 0);
        assert_eq!(fs::read_to_string(&input).expect("read"), "id,polarId\n");
    }

    #[test]
    fn backup_matches_pre_mutation_input_exactly() {
        let dir = tempdir().expect("tempdir");
        let content = "id,polarId\n1,old-a\n2,old-b\n";
        let input = write_file(dir.path(), "t.csv", content);
        let backup = dir.path().join("t_backup.csv");

        let mut o = opts(&input, "polarId", RewriteRule::Constant("0000".into()));
        o.backup = Some(backup.clone());
        let outcome = rewrite_column(&o).expect("rewrite");

        assert_eq!(outcome.backup_path.as_deref(), Some(backup.as_path()));
        assert_eq!(fs::read(&backup).expect("read backup"), content.as_bytes());
        assert_ne!(fs::read_to_string(&input).expect("read"), content);
    }

    #[test]
    fn backup_failure_blocks_the_write() {
        let dir = tempdir().expect("tempdir");
        let content = "id,polarId\n1,x\n";
        let input = write_file(dir.path(), "t.csv", content);

        let mut o = opts(&input, "polarId", RewriteRule::Sequential);
        o.backup = Some(dir.path().join("missing-dir").join("t_backup.csv"));
        let err = rewrite_column(&o).expect_err("must fail");

        assert!(matches!(err, RewriteError::Backup(_)));
        assert_eq!(fs::read_to_string(&input).expect("read"), content);
    }

    #[test]
    fn backup_path_may_not_collide_with_input() {
        let dir = tempdir().expect("tempdir");
        let content = "id,polarId\n1,x\n";
        let input = write_file(dir.path(), "t.csv", content);

        let mut o = opts(&input, "polarId", RewriteRule::Sequential);
        o.backup = Some(input.clone());
        let err = rewrite_column(&o).expect_err("must fail");

        assert!(matches!(err, RewriteError::Backup(_)));
        assert_eq!(fs::read_to_string(&input).expect("read"), content);
    }

    #[test]
    fn separate_output_path_leaves_input_intact() {
        let dir = tempdir().expect("tempdir");
        let content = "id,polarId\n1,x\n";
        let input = write_file(dir.path(), "in.csv", content);
        let output = dir.path().join("out.csv");

        let mut o = opts(&input, "polarId", RewriteRule::Sequential);
        o.output = Some(output.clone());
        rewrite_column(&o).expect("rewrite");

        assert_eq!(fs::read_to_string(&input).expect("read input"), content);
        assert_eq!(
            fs::read_to_string(&output).expect("read output"),
            "id,polarId\n1,1\n"
        );
    }

    #[test]
    fn dry_run_writes_nothing() {
        let dir = tempdir().expect("tempdir");
        let content = "id,polarId\n1,x\n2,y\n";
        let input = write_file(dir.path(), "t.csv", content);

        let mut o = opts(&input, "polarId", RewriteRule::Sequential);
        o.dry_run = true;
        let outcome = rewrite_column(&o).expect("dry run");

        assert_eq!(outcome.rows_read, 2);
        assert_eq!(outcome.rows_modified, 2);
        assert!(outcome.backup_path.is_none());
        assert_eq!(fs::read_to_string(&input).expect("read"), content);
        let entries: Vec<_> = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn quoting_survives_the_round_trip() {
        let dir = tempdir().expect("tempdir");
        let input = write_file(
            dir.path(),
            "t.csv",
            "id,polarId,name\n1,x,\"mug, large\"\n",
        );

        rewrite_column(&opts(&input, "polarId", RewriteRule::Constant("0000".into())))
            .expect("rewrite");

        assert_eq!(
            fs::read_to_string(&input).expect("read"),
            "id,polarId,name\n1,0000,\"mug, large\"\n"
        );
    }

    #[test]
    fn first_header_match_wins_for_duplicate_names() {
        let dir = tempdir().expect("tempdir");
        let input = write_file(dir.path(), "t.csv", "polarId,polarId\na,b\n");

        rewrite_column(&opts(&input, "polarId", RewriteRule::Constant("z".into())))
            .expect("rewrite");

        assert_eq!(
            fs::read_to_string(&input).expect("read"),
            "polarId,polarId\nz,b\n"
        );
    }

    #[test]
    fn default_backup_name_derives_from_input() {
        let path = default_backup_path(Path::new("/data/products.csv"));
        let name = path.file_name().and_then(|s| s.to_str()).expect("name");
        assert!(name.starts_with("products_backup_"));
        assert!(name.ends_with(".csv"));
        assert_eq!(path.parent(), Some(Path::new("/data")));
    }
}
