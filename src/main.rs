// ABOUTME: CLI entry point for poa
// ABOUTME: Parses commands and routes to the sync, check, inspect, and cleanup services

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{ArgGroup, Args, Parser, Subcommand};

use poa::config::{self, Config};
use poa::filters::After;
use poa::model::{SyncResult, Value};
use poa::sync::SyncRequest;

#[derive(Parser)]
#[command(name = "poa")]
#[command(about = "Copies tables from source databases into a PostgreSQL warehouse", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, global = true, env = "POA_CONFIG", default_value = "config.json")]
    config: PathBuf,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct TableArgs {
    /// Source database entry name from the config file
    #[arg(long = "src-db")]
    src_db: String,
    #[arg(long = "src-schema")]
    src_schema: Option<String>,
    #[arg(long = "src-table")]
    src_table: String,
    /// Destination database entry name from the config file
    #[arg(long = "dst-db")]
    dst_db: String,
    #[arg(long = "dst-schema")]
    dst_schema: String,
    #[arg(long = "dst-table")]
    dst_table: String,
    /// Primary-key column names, in key order
    #[arg(long, num_args = 1.., required = true)]
    pk: Vec<String>,
    /// Watermark filter as column/date pairs, e.g. --after date_added 2023-01-01
    #[arg(long, num_args = 1..)]
    after: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile row counts and primary keys between a source table and its copy
    Check {
        #[command(flatten)]
        table: TableArgs,
    },
    /// Delete audit-log rows past the retention window
    Cleanup {
        /// Database entry name from the config file
        #[arg(long)]
        db: String,
        /// Days of logs to keep (defaults to the config's days-logs-to-keep)
        #[arg(long = "days-to-keep")]
        days_to_keep: Option<u32>,
    },
    /// Replace the destination table with the full source table
    #[command(name = "full-sync")]
    FullSync {
        #[command(flatten)]
        table: TableArgs,
        /// Drop and recreate the destination table first
        #[arg(long)]
        recreate: bool,
        /// Append changed rows to the history table
        #[arg(long = "track-history")]
        track_history: bool,
    },
    /// Apply only the rows that changed at the source
    #[command(name = "incremental-sync")]
    #[command(group(ArgGroup::new("strategy").required(true).args(["compare", "increasing"])))]
    IncrementalSync {
        #[command(flatten)]
        table: TableArgs,
        /// Non-key columns whose differences signal an update
        #[arg(long, num_args = 1..)]
        compare: Vec<String>,
        /// Monotonically non-decreasing columns usable as watermarks
        #[arg(long, num_args = 1..)]
        increasing: Vec<String>,
        /// Skip the sync when source and destination row counts match
        #[arg(long = "skip-if-row-counts-match")]
        skip_if_row_counts_match: bool,
        /// Append changed rows to the history table
        #[arg(long = "track-history")]
        track_history: bool,
    },
    /// Resolve a source table's shape and pin it in the cache database
    Inspect {
        #[arg(long = "src-db")]
        src_db: String,
        #[arg(long = "src-schema")]
        src_schema: Option<String>,
        #[arg(long = "src-table")]
        src_table: String,
        /// Database entry holding the schema cache
        #[arg(long = "cache-db")]
        cache_db: String,
        #[arg(long, num_args = 1.., required = true)]
        pk: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log; default to info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    match cli.command {
        Commands::Check { table } => run_check(&config, &table).await,
        Commands::Cleanup { db, days_to_keep } => {
            let db_config = config.db(&db)?;
            let days = days_to_keep.unwrap_or(config.days_logs_to_keep);
            poa::audit::cleanup(db_config, days).await?;
            tracing::info!("Deleted logs older than {} days from {}.", days, db);
            Ok(())
        }
        Commands::FullSync {
            table,
            recreate,
            track_history,
        } => {
            let request = build_sync_request(
                &config,
                &table,
                false,
                Vec::new(),
                Vec::new(),
                false,
                recreate,
                track_history,
            )?;
            run_sync(&config, &table, request).await
        }
        Commands::IncrementalSync {
            table,
            compare,
            increasing,
            skip_if_row_counts_match,
            track_history,
        } => {
            let request = build_sync_request(
                &config,
                &table,
                true,
                compare,
                increasing,
                skip_if_row_counts_match,
                false,
                track_history,
            )?;
            run_sync(&config, &table, request).await
        }
        Commands::Inspect {
            src_db,
            src_schema,
            src_table,
            cache_db,
            pk,
        } => {
            let src_config = config.db(&src_db)?;
            let cache_config = config.db(&cache_db)?;
            let pk = lowercase_all(&pk);
            let table = poa::inspect::inspect(
                src_config,
                src_schema.as_deref(),
                &src_table,
                cache_config,
                &pk,
            )
            .await?;
            println!("{table:#?}");
            Ok(())
        }
    }
}

async fn run_check(config: &Config, table: &TableArgs) -> anyhow::Result<()> {
    let src_config = config.db(&table.src_db)?;
    let dst_config = config.db(&table.dst_db)?;
    let after = parse_after(&table.after)?;
    let pk = lowercase_all(&table.pk);

    let result = poa::check::check(
        src_config,
        table.src_schema.as_deref(),
        &table.src_table,
        dst_config,
        Some(&table.dst_schema),
        &table.dst_table,
        &pk,
        &after,
    )
    .await?;

    tracing::info!(
        "Check complete: {} source rows, {} destination rows, {} extra keys, {} missing keys ({} ms).",
        result.src_rows,
        result.dst_rows,
        result.extra_keys.len(),
        result.missing_keys.len(),
        result.execution_millis
    );

    if !result.is_in_sync() {
        tracing::warn!(
            "{}.{} and {}.{} are out of sync.",
            table.src_db,
            table.src_table,
            table.dst_db,
            table.dst_table
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn build_sync_request(
    config: &Config,
    table: &TableArgs,
    incremental: bool,
    compare: Vec<String>,
    increasing: Vec<String>,
    skip_if_row_counts_match: bool,
    recreate: bool,
    track_history: bool,
) -> anyhow::Result<SyncRequest> {
    Ok(SyncRequest {
        src_schema_name: table.src_schema.clone(),
        src_table_name: table.src_table.clone(),
        dst_schema_name: Some(table.dst_schema.clone()),
        dst_table_name: table.dst_table.clone(),
        pk: lowercase_all(&table.pk),
        incremental,
        compare_cols: lowercase_all(&compare).into_iter().collect::<BTreeSet<_>>(),
        increasing_cols: lowercase_all(&increasing)
            .into_iter()
            .collect::<BTreeSet<_>>(),
        skip_if_row_counts_match,
        recreate,
        track_history,
        after: parse_after(&table.after)?,
        batch_size: config.batch_size,
    })
}

async fn run_sync(
    config: &Config,
    table: &TableArgs,
    request: SyncRequest,
) -> anyhow::Result<()> {
    let src_config = config.db(&table.src_db)?;
    let dst_config = config.db(&table.dst_db)?;

    let result = poa::sync::sync(src_config, dst_config, &request).await?;
    match result {
        SyncResult::Succeeded {
            rows_added,
            rows_deleted,
            rows_updated,
            execution_millis,
        } => {
            tracing::info!(
                "Sync complete: {} added, {} updated, {} deleted ({} ms).",
                rows_added,
                rows_updated,
                rows_deleted,
                execution_millis
            );
            Ok(())
        }
        SyncResult::Skipped { reason } => {
            tracing::info!("Sync skipped: {}", reason);
            Ok(())
        }
        SyncResult::Failed { error_message } => {
            anyhow::bail!("Sync failed: {error_message}")
        }
    }
}

/// `--after` takes column/date pairs; an odd-length list or a bad date is
/// an argument error.
fn parse_after(pairs: &[String]) -> anyhow::Result<After> {
    if pairs.len() % 2 != 0 {
        anyhow::bail!(
            "if --after is provided, it must have an even number of elements, but got {pairs:?}"
        );
    }

    let mut after = After::new();
    for pair in pairs.chunks(2) {
        let date = NaiveDate::parse_from_str(&pair[1], "%Y-%m-%d")
            .with_context(|| format!("--after date {} is not a YYYY-MM-DD date", pair[1]))?;
        after.insert(pair[0].to_lowercase(), Value::Date(date));
    }
    Ok(after)
}

fn lowercase_all(cols: &[String]) -> Vec<String> {
    cols.iter().map(|c| c.to_lowercase()).collect()
}
