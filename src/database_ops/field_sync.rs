//! Syncs one CSV column into a database table: one independent UPDATE per
//! record, matched on a textual identifier, with per-record error isolation.
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use csv::ReaderBuilder;
use serde::Serialize;
use sqlx::Row;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::db::Db;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub csv_path: PathBuf,
    pub table: String,
    pub id_column: String,
    pub target_column: String,
    /// Upper bound for each store round trip.
    pub statement_timeout: Duration,
    pub progress_every: u64,
    /// Stored rows listed after the run for eyeball verification (0 = none).
    pub sample_rows: u32,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncOutcome {
    pub rows_read: u64,
    /// Exactly one stored row affected.
    pub updated: u64,
    /// Zero stored rows affected.
    pub not_found: u64,
    /// More than one stored row affected (identifier column not unique).
    pub multi_matched: u64,
    pub failed: u64,
    pub duplicate_ids: u64,
    /// Input rows too short to carry both columns.
    pub skipped_short: u64,
    /// Post-run count of stored rows with a non-empty target value.
    pub stored_non_empty: i64,
}

#[derive(Debug, Clone)]
pub struct SyncRecord {
    pub id: String,
    pub value: String,
}

#[derive(Debug, Default)]
pub struct SyncInput {
    pub records: Vec<SyncRecord>,
    pub duplicate_ids: u64,
    pub skipped_short: u64,
}

/// Read (identifier, value) pairs from the CSV in row order. Duplicate
/// identifiers are kept in place and warned about; updates run in row
/// order, so the last occurrence wins.
pub fn load_sync_input(path: &Path, id_column: &str, target_column: &str) -> Result<SyncInput> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::None)
        .from_reader(BufReader::new(file));

    let headers = rdr.headers()?.clone();
    if headers.is_empty() {
        bail!("no header row in {}", path.display());
    }
    let idx_id = headers
        .iter()
        .position(|h| h == id_column)
        .ok_or_else(|| anyhow!("{id_column} col missing"))?;
    let idx_value = headers
        .iter()
        .position(|h| h == target_column)
        .ok_or_else(|| anyhow!("{target_column} col missing"))?;

    let mut input = SyncInput::default();
    let mut seen: HashSet<String> = HashSet::new();
    for record in rdr.records() {
        let record = record?;
        let (Some(id), Some(value)) = (record.get(idx_id), record.get(idx_value)) else {
            input.skipped_short += 1;
            continue;
        };
        if !seen.insert(id.to_string()) {
            input.duplicate_ids += 1;
            warn!(id = %id, "duplicate identifier in input; last occurrence wins");
        }
        input.records.push(SyncRecord {
            id: id.to_string(),
            value: value.to_string(),
        });
    }
    Ok(input)
}

/// Run the full sync: load the CSV, issue one UPDATE per record, then count
/// stored rows holding a non-empty target value. Per-record failures are
/// logged and skipped; connection-class failures abort the batch.
pub async fn run_sync(db: &Db, opts: &SyncOptions) -> Result<SyncOutcome> {
    let update_sql = update_statement(&opts.table, &opts.id_column, &opts.target_column)?;
    let count_sql = non_empty_count_statement(&opts.table, &opts.target_column)?;

    let input = load_sync_input(&opts.csv_path, &opts.id_column, &opts.target_column)?;
    let mut outcome = SyncOutcome {
        rows_read: input.records.len() as u64,
        duplicate_ids: input.duplicate_ids,
        skipped_short: input.skipped_short,
        ..Default::default()
    };
    info!(
        rows = outcome.rows_read,
        duplicates = outcome.duplicate_ids,
        "sync input loaded"
    );

    let table = quote_ident(&opts.table)?;
    let total_stored: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .persistent(false)
        .fetch_one(&db.pool)
        .await
        .with_context(|| format!("counting rows in {}", opts.table))?;
    info!(total = total_stored, table = %opts.table, "store row count");

    let progress_every = opts.progress_every.max(1);
    let mut processed = 0u64;
    for record in &input.records {
        processed += 1;
        let update = sqlx::query(&update_sql)
            .persistent(false)
            .bind(&record.value)
            .bind(&record.id)
            .execute(&db.pool);
        match timeout(opts.statement_timeout, update).await {
            Ok(Ok(result)) => match result.rows_affected() {
                1 => {
                    outcome.updated += 1;
                    debug!(id = %record.id, "updated");
                }
                0 => {
                    outcome.not_found += 1;
                    debug!(id = %record.id, "no stored row matched");
                }
                n => {
                    outcome.multi_matched += 1;
                    warn!(id = %record.id, rows_affected = n, "identifier matched multiple rows");
                }
            },
            Ok(Err(err)) => {
                if is_connection_error(&err) {
                    error!(processed = processed, error = %err, "store connection lost; aborting batch");
                    return Err(err)
                        .with_context(|| format!("connection failure after {processed} records"));
                }
                outcome.failed += 1;
                error!(id = %record.id, error = %err, "update failed; continuing");
            }
            Err(_) => {
                outcome.failed += 1;
                error!(
                    id = %record.id,
                    timeout_secs = opts.statement_timeout.as_secs(),
                    "update timed out; continuing"
                );
            }
        }
        if processed % progress_every == 0 {
            info!(
                processed = processed,
                total = outcome.rows_read,
                updated = outcome.updated,
                "sync progress"
            );
        }
    }

    outcome.stored_non_empty = sqlx::query_scalar::<_, i64>(&count_sql)
        .persistent(false)
        .fetch_one(&db.pool)
        .await
        .with_context(|| format!("counting non-empty {} values", opts.target_column))?;

    if opts.sample_rows > 0 {
        log_stored_samples(db, opts).await?;
    }

    info!(
        read = outcome.rows_read,
        updated = outcome.updated,
        not_found = outcome.not_found,
        failed = outcome.failed,
        stored_non_empty = outcome.stored_non_empty,
        "sync complete"
    );
    Ok(outcome)
}

async fn log_stored_samples(db: &Db, opts: &SyncOptions) -> Result<()> {
    let table = quote_ident(&opts.table)?;
    let id_col = quote_ident(&opts.id_column)?;
    let target_col = quote_ident(&opts.target_column)?;
    // ::text casts keep this readable for non-text identifier columns.
    let sample_sql = format!(
        "SELECT {id_col}::text AS id, {target_col}::text AS value FROM {table} \
         WHERE {target_col} IS NOT NULL AND {target_col} <> '' ORDER BY {id_col} LIMIT $1"
    );
    let rows = sqlx::query(&sample_sql)
        .persistent(false)
        .bind(i64::from(opts.sample_rows))
        .fetch_all(&db.pool)
        .await?;
    for row in rows {
        let id: String = row.try_get("id")?;
        let value: String = row.try_get("value")?;
        info!(id = %id, value = %value, "stored sample");
    }
    Ok(())
}

fn update_statement(table: &str, id_column: &str, target_column: &str) -> Result<String> {
    Ok(format!(
        "UPDATE {} SET {} = $1 WHERE {} = $2",
        quote_ident(table)?,
        quote_ident(target_column)?,
        quote_ident(id_column)?
    ))
}

fn non_empty_count_statement(table: &str, target_column: &str) -> Result<String> {
    let target = quote_ident(target_column)?;
    Ok(format!(
        "SELECT COUNT(*) FROM {} WHERE {target} IS NOT NULL AND {target} <> ''",
        quote_ident(table)?
    ))
}

/// Accept plain identifiers only (ASCII letter or underscore first, then
/// letters/digits/underscores) and double-quote to preserve case.
fn quote_ident(name: &str) -> Result<String> {
    if !is_plain_identifier(name) {
        bail!("not a plain SQL identifier: {name:?}");
    }
    Ok(format!("\"{name}\""))
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}
