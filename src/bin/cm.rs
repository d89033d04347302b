use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use catalog_maint::cli::csv_rewrite::{self, CsvRewriteConfig};
use catalog_maint::cli::db_sync::{self, DbSyncConfig};
use catalog_maint::csv_ops::rewrite::RewriteRule;
use catalog_maint::util::env;

#[derive(Parser, Debug)]
#[command(name = "cm", version, about = "Product catalog admin CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Rewrite one column of a product CSV, taking a durable backup first
    CsvRewrite {
        /// Path of the CSV to read
        #[arg(long)]
        input: PathBuf,
        /// Distinct output path (default: overwrite the input)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Column to rewrite
        #[arg(long, default_value = "polarId")]
        column: String,
        /// Set every eligible row's column to this literal
        #[arg(long, value_name = "LITERAL", conflicts_with = "sequential")]
        set: Option<String>,
        /// Number data rows 1..N in row order instead
        #[arg(long, default_value_t = false)]
        sequential: bool,
        /// Override for the backup path (default: timestamped sibling)
        #[arg(long)]
        backup: Option<PathBuf>,
        /// Report what would change without writing anything
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Print the outcome as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Push a CSV column into the database, one UPDATE per row
    DbSync {
        /// Path of the CSV holding identifiers and values
        #[arg(long)]
        input: PathBuf,
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
        /// Target table
        #[arg(long, default_value = "products")]
        table: String,
        /// Identifier column, in both the CSV and the table
        #[arg(long, default_value = "id")]
        id_column: String,
        /// Column to push, in both the CSV and the table
        #[arg(long, default_value = "polarId")]
        column: String,
        /// Upper bound in seconds for each statement round trip
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
        /// Stored rows listed after the run for verification (0 disables)
        #[arg(long, default_value_t = 5)]
        samples: u32,
        /// Read and validate the CSV without opening a connection
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Print the outcome as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env::bootstrap_cli("cm");
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .try_init();

    let cli = Cli::parse();

    match cli.command {
        Commands::CsvRewrite {
            input,
            output,
            column,
            set,
            sequential,
            backup,
            dry_run,
            json,
        } => {
            let rule = match (set, sequential) {
                (Some(literal), _) => RewriteRule::Constant(literal),
                (None, true) => RewriteRule::Sequential,
                (None, false) => bail!("pass --set <LITERAL> or --sequential"),
            };
            csv_rewrite::run(CsvRewriteConfig {
                input,
                output,
                column,
                rule,
                backup,
                dry_run,
                json,
            })?;
        }
        Commands::DbSync {
            input,
            db_url,
            table,
            id_column,
            column,
            timeout_secs,
            samples,
            dry_run,
            json,
        } => {
            db_sync::run(DbSyncConfig {
                database_url: db_url,
                input,
                table,
                id_column,
                column,
                timeout_secs,
                samples,
                dry_run,
                json,
            })
            .await?;
        }
    }

    Ok(())
}
