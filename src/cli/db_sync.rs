use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::database_ops::db::Db;
use crate::database_ops::field_sync::{load_sync_input, run_sync, SyncOptions};
use crate::util::env as env_util;

#[derive(Debug, Clone)]
pub struct DbSyncConfig {
    /// Optional override for the Postgres connection string.
    pub database_url: Option<String>,
    pub input: PathBuf,
    pub table: String,
    pub id_column: String,
    /// Target column, in both the CSV and the store.
    pub column: String,
    pub timeout_secs: u64,
    /// Stored rows listed after the run (0 disables).
    pub samples: u32,
    pub dry_run: bool,
    /// Emit the outcome as JSON instead of the text block.
    pub json: bool,
}

pub async fn run(cfg: DbSyncConfig) -> Result<()> {
    env_util::init_env();

    if cfg.dry_run {
        let input = load_sync_input(&cfg.input, &cfg.id_column, &cfg.column)?;
        info!(
            rows = input.records.len(),
            duplicates = input.duplicate_ids,
            "db-sync: dry-run; no connection opened"
        );
        if cfg.json {
            println!(
                "{}",
                serde_json::json!({
                    "would_update": input.records.len(),
                    "duplicate_ids": input.duplicate_ids,
                    "skipped_short": input.skipped_short,
                })
            );
            return Ok(());
        }
        use std::fmt::Write as _;
        let mut out = String::new();
        writeln!(out, "DB SYNC DRY-RUN:").ok();
        writeln!(out, "would update: {}", input.records.len()).ok();
        writeln!(out, "duplicate ids (last wins): {}", input.duplicate_ids).ok();
        writeln!(out, "short rows skipped: {}", input.skipped_short).ok();
        println!("{}", out);
        return Ok(());
    }

    let database_url = match cfg.database_url.clone() {
        Some(url) if !url.trim().is_empty() => url.trim().to_string(),
        _ => env_util::db_url()
            .context("missing connection configuration; set DATABASE_URL or pass --db-url")?,
    };
    info!(url = %env_util::redact_postgres_url(&database_url), "db-sync: connecting");
    let db = Db::connect(&database_url, env_util::env_parse("CM_DB_MAX_CONNECTIONS", 5)).await?;

    let opts = SyncOptions {
        csv_path: cfg.input.clone(),
        table: cfg.table.clone(),
        id_column: cfg.id_column.clone(),
        target_column: cfg.column.clone(),
        statement_timeout: Duration::from_secs(cfg.timeout_secs),
        progress_every: env_util::env_parse("CM_PROGRESS_EVERY", 50u64),
        sample_rows: cfg.samples,
    };
    let result = run_sync(&db, &opts).await;
    // The pool must release on every exit path, success or not.
    db.pool.close().await;
    let outcome = result?;

    if cfg.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    use std::fmt::Write as _;
    let mut out = String::new();
    writeln!(out, "DB SYNC SUMMARY:").ok();
    writeln!(out, "rows read: {}", outcome.rows_read).ok();
    writeln!(out, "updated (exactly one row): {}", outcome.updated).ok();
    writeln!(out, "not found: {}", outcome.not_found).ok();
    if outcome.multi_matched > 0 {
        writeln!(out, "multi-row matches: {}", outcome.multi_matched).ok();
    }
    writeln!(out, "failed: {}", outcome.failed).ok();
    if outcome.duplicate_ids > 0 {
        writeln!(out, "duplicate ids (last wins): {}", outcome.duplicate_ids).ok();
    }
    if outcome.skipped_short > 0 {
        writeln!(out, "short rows skipped: {}", outcome.skipped_short).ok();
    }
    writeln!(
        out,
        "stored rows with non-empty {}: {}",
        cfg.column, outcome.stored_non_empty
    )
    .ok();
    println!("{}", out);
    Ok(())
}
