use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

use crate::csv_ops::rewrite::{rewrite_column, RewriteOptions, RewriteRule};

#[derive(Debug, Clone)]
pub struct CsvRewriteConfig {
    pub input: PathBuf,
    /// Write here instead of overwriting the input.
    pub output: Option<PathBuf>,
    /// Target column name.
    pub column: String,
    pub rule: RewriteRule,
    /// Override the derived backup path.
    pub backup: Option<PathBuf>,
    pub dry_run: bool,
    /// Emit the outcome as JSON instead of the text block.
    pub json: bool,
}

pub fn run(cfg: CsvRewriteConfig) -> Result<()> {
    info!(
        input = %cfg.input.display(),
        column = %cfg.column,
        rule = ?cfg.rule,
        dry_run = cfg.dry_run,
        "csv-rewrite: starting"
    );

    let opts = RewriteOptions {
        input: cfg.input.clone(),
        output: cfg.output.clone(),
        column: cfg.column.clone(),
        rule: cfg.rule.clone(),
        backup: cfg.backup.clone(),
        dry_run: cfg.dry_run,
    };
    let outcome = rewrite_column(&opts)?;

    if cfg.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    use std::fmt::Write as _;
    let mut out = String::new();
    writeln!(out, "CSV REWRITE SUMMARY:").ok();
    writeln!(out, "input: {}", cfg.input.display()).ok();
    if let Some(output) = &cfg.output {
        writeln!(out, "output: {}", output.display()).ok();
    }
    writeln!(out, "rows read: {}", outcome.rows_read).ok();
    writeln!(out, "rows modified: {}", outcome.rows_modified).ok();
    if outcome.rows_skipped_short > 0 {
        writeln!(out, "short rows skipped: {}", outcome.rows_skipped_short).ok();
    }
    match &outcome.backup_path {
        Some(path) => {
            writeln!(out, "backup: {}", path.display()).ok();
        }
        None => {
            writeln!(out, "backup: skipped (dry-run)").ok();
        }
    }
    println!("{}", out);
    Ok(())
}
