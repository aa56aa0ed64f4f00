// ABOUTME: Sync orchestrator: picks a refresh strategy and drives source, destination, and audit
// ABOUTME: Full refresh, incremental by compare columns, or incremental from increasing columns

use std::collections::BTreeSet;
use std::time::Instant;

use crate::audit::AuditLog;
use crate::config::DbConfig;
use crate::dest::{self, DstDs};
use crate::error::{PoaError, Result};
use crate::filters::After;
use crate::inspect::inspect;
use crate::model::{diff_rows, Row, RowKey, SyncResult};
use crate::source::{self, SrcDs};

/// Proportion of the source past which an incremental compare refresh
/// pulls the whole table instead of fetching changed rows by key.
const FULL_PULL_THRESHOLD: f64 = 0.5;

/// Everything one sync invocation needs beyond the two database configs.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub src_schema_name: Option<String>,
    pub src_table_name: String,
    pub dst_schema_name: Option<String>,
    pub dst_table_name: String,
    pub pk: Vec<String>,
    pub incremental: bool,
    pub compare_cols: BTreeSet<String>,
    pub increasing_cols: BTreeSet<String>,
    pub skip_if_row_counts_match: bool,
    pub recreate: bool,
    pub track_history: bool,
    pub after: After,
    pub batch_size: usize,
}

/// Run one sync and record it in the audit log.
///
/// Any error inside the run becomes `SyncResult::Failed`; the terminal
/// audit transition is always attempted, and a failure to record it is
/// logged rather than raised.
pub async fn sync(
    src_db_config: &DbConfig,
    dst_db_config: &DbConfig,
    request: &SyncRequest,
) -> Result<SyncResult> {
    if request.batch_size == 0 {
        return Err(PoaError::Config("batch-size must be greater than zero".into()));
    }

    let mut audit = AuditLog::connect(dst_db_config).await?;
    let sync_id = audit
        .sync_started(
            src_db_config.db_name(),
            request.src_schema_name.as_deref(),
            &request.src_table_name,
            request.incremental,
        )
        .await?;

    let result = match run_sync(src_db_config, dst_db_config, request).await {
        Ok(result) => result,
        Err(e) => SyncResult::failed(format!("An error occurred while running sync(): {e}")),
    };

    let terminal = match &result {
        SyncResult::Succeeded {
            rows_added,
            rows_deleted,
            rows_updated,
            execution_millis,
        } => {
            audit
                .sync_succeeded(
                    sync_id,
                    *rows_added,
                    *rows_deleted,
                    *rows_updated,
                    *execution_millis,
                )
                .await
        }
        SyncResult::Failed { error_message } => audit.sync_failed(sync_id, error_message).await,
        SyncResult::Skipped { reason } => audit.sync_skipped(sync_id, reason).await,
    };
    if let Err(e) = terminal {
        tracing::error!("failed to record the sync outcome for sync {}: {}", sync_id, e);
    }

    Ok(result)
}

async fn run_sync(
    src_db_config: &DbConfig,
    dst_db_config: &DbConfig,
    request: &SyncRequest,
) -> Result<SyncResult> {
    let started = Instant::now();

    let src_table = inspect(
        src_db_config,
        request.src_schema_name.as_deref(),
        &request.src_table_name,
        dst_db_config,
        &request.pk,
    )
    .await?;

    let mut src = source::create(
        src_db_config,
        request.src_schema_name.as_deref(),
        &request.src_table_name,
        &request.pk,
        &request.after,
    )
    .await?;

    let mut dst = dest::create(
        dst_db_config,
        request.dst_schema_name.as_deref(),
        &request.dst_table_name,
        &src_table,
        &request.after,
    )
    .await?;

    let mut incremental = request.incremental;
    if request.recreate {
        incremental = false;
        dst.drop_table().await?;
        dst.create().await?;
    } else if !dst.table_exists().await? {
        incremental = false;
        dst.create().await?;
    }

    if incremental && request.skip_if_row_counts_match {
        let src_row_ct = src.get_row_count().await?;
        let dst_row_ct = dst.get_row_count().await?;
        if src_row_ct == dst_row_ct {
            return Ok(SyncResult::skipped("row counts match."));
        }
    }

    let result = if !incremental {
        full_refresh(&mut src, &mut dst, request.batch_size, started).await?
    } else if !request.compare_cols.is_empty() {
        incremental_compare_refresh(
            &mut src,
            &mut dst,
            &request.compare_cols,
            request.batch_size,
            started,
        )
        .await?
    } else {
        if request.increasing_cols.is_empty() {
            return Err(PoaError::Config(
                "an incremental sync needs either compare or increasing columns, \
                 but neither were provided"
                    .into(),
            ));
        }
        incremental_refresh_from_last(
            &mut src,
            &mut dst,
            &request.increasing_cols,
            request.batch_size,
            started,
        )
        .await?
    };

    if request.track_history {
        if let SyncResult::Succeeded {
            rows_added,
            rows_deleted,
            rows_updated,
            ..
        } = &result
        {
            if rows_added + rows_deleted + rows_updated > 0 {
                dst.create_history_table().await?;
                dst.update_history_table().await?;
            }
        }
    }

    Ok(result)
}

async fn full_refresh(
    src: &mut Box<dyn SrcDs>,
    dst: &mut Box<dyn DstDs>,
    batch_size: usize,
    started: Instant,
) -> Result<SyncResult> {
    dst.truncate().await?;
    dst.create_staging_table().await?;

    let src_rows = src.fetch_rows(None, None).await?;
    upsert_in_chunks(dst, &src_rows, batch_size).await?;

    Ok(SyncResult::succeeded(
        src_rows.len() as u64,
        0,
        0,
        millis_since(started),
    ))
}

/// Incremental refresh driven by increasing columns. Only rows past the
/// destination's recorded maxes are compared, so the mode never observes
/// deletions.
async fn incremental_refresh_from_last(
    src: &mut Box<dyn SrcDs>,
    dst: &mut Box<dyn DstDs>,
    increasing_cols: &BTreeSet<String>,
    batch_size: usize,
    started: Instant,
) -> Result<SyncResult> {
    dst.add_increasing_col_indices(increasing_cols).await?;
    dst.create_staging_table().await?;

    // An empty table (or all-null maxes) yields no watermark and the scan
    // degenerates to a full one.
    let after = dst.get_max_values(increasing_cols).await?;

    let src_table = src.get_table().await?;
    let src_rows = src.fetch_rows(None, after.as_ref()).await?;
    let dst_rows = dst.fetch_rows(None, after.as_ref()).await?;

    let diff = diff_rows(&src_rows, &dst_rows, &src_table.pk)?;

    let rows: Vec<Row> = diff
        .added
        .values()
        .cloned()
        .chain(diff.updated.values().map(|(src_row, _)| src_row.clone()))
        .collect();
    upsert_in_chunks(dst, &rows, batch_size).await?;

    Ok(SyncResult::succeeded(
        diff.added.len() as u64,
        0,
        diff.updated.len() as u64,
        millis_since(started),
    ))
}

/// Incremental refresh driven by compare columns: both sides are streamed
/// projected to the compare columns plus the key, diffed, and only the
/// changed rows are re-fetched, unless the delta is large enough that the
/// whole table is cheaper.
async fn incremental_compare_refresh(
    src: &mut Box<dyn SrcDs>,
    dst: &mut Box<dyn DstDs>,
    compare_cols: &BTreeSet<String>,
    batch_size: usize,
    started: Instant,
) -> Result<SyncResult> {
    let src_table = src.get_table().await?;

    let min_cols: BTreeSet<String> = compare_cols
        .iter()
        .cloned()
        .chain(src_table.pk.iter().cloned())
        .collect();

    let min_src_rows = src.fetch_rows(Some(&min_cols), None).await?;
    let src_row_ct = min_src_rows.len();
    if src_row_ct == 0 {
        return Ok(SyncResult::skipped(format!(
            "{}.{} is empty.",
            src_table.db_name,
            src_table.qualified_name()
        )));
    }

    let min_dst_rows = dst.fetch_rows(Some(&min_cols), None).await?;

    let diff = diff_rows(&min_src_rows, &min_dst_rows, &src_table.pk)?;

    let changed_keys: BTreeSet<RowKey> = diff
        .added
        .keys()
        .cloned()
        .chain(diff.updated.keys().cloned())
        .collect();
    let deleted_keys: BTreeSet<RowKey> = diff.deleted.keys().cloned().collect();

    tracing::info!(
        "There were {} rows added, {} updated, and {} rows deleted from src.",
        diff.added.len(),
        diff.updated.len(),
        diff.deleted.len()
    );

    let chg_row_ct = changed_keys.len() + deleted_keys.len();
    if chg_row_ct == 0 {
        return Ok(SyncResult::skipped(
            "src and dst were compared, and they were the same.",
        ));
    }

    dst.create_staging_table().await?;

    let src_rows = if should_pull_full_table(chg_row_ct, src_row_ct) {
        tracing::info!(
            "There were {} rows that have changed of {} total rows ({}%), \
             so the full table will be pulled.",
            chg_row_ct,
            src_row_ct,
            (chg_row_ct * 100) / src_row_ct
        );
        src.fetch_rows(None, None).await?
    } else {
        src.fetch_rows_by_key(None, &changed_keys).await?
    };

    upsert_in_chunks(dst, &src_rows, batch_size).await?;
    delete_in_chunks(dst, &deleted_keys, batch_size).await?;

    Ok(SyncResult::succeeded(
        diff.added.len() as u64,
        diff.deleted.len() as u64,
        diff.updated.len() as u64,
        millis_since(started),
    ))
}

fn should_pull_full_table(changed_row_ct: usize, src_row_ct: usize) -> bool {
    src_row_ct > 0 && changed_row_ct as f64 / src_row_ct as f64 > FULL_PULL_THRESHOLD
}

async fn upsert_in_chunks(
    dst: &mut Box<dyn DstDs>,
    rows: &[Row],
    batch_size: usize,
) -> Result<()> {
    let total = rows.len();
    let mut upserted = 0;
    for chunk in rows.chunks(batch_size) {
        tracing::info!(
            "Upserting rows {} to {} of {}...",
            upserted,
            upserted + chunk.len(),
            total
        );
        dst.add_rows_to_staging(chunk).await?;
        dst.upsert_rows_from_staging().await?;
        upserted += chunk.len();
    }
    Ok(())
}

async fn delete_in_chunks(
    dst: &mut Box<dyn DstDs>,
    keys: &BTreeSet<RowKey>,
    batch_size: usize,
) -> Result<()> {
    if keys.is_empty() {
        return Ok(());
    }

    let all_keys: Vec<RowKey> = keys.iter().cloned().collect();
    let total = all_keys.len();
    let mut deleted = 0;
    for chunk in all_keys.chunks(batch_size) {
        tracing::info!(
            "Deleting rows {} to {} of {}...",
            deleted,
            deleted + chunk.len(),
            total
        );
        let chunk_keys: BTreeSet<RowKey> = chunk.iter().cloned().collect();
        dst.delete_rows(&chunk_keys).await?;
        deleted += chunk.len();
    }
    Ok(())
}

fn millis_since(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_pull_threshold() {
        // 700 of 1000 changed: pull the full table.
        assert!(should_pull_full_table(700, 1000));
        // Exactly half does not trip the fallback.
        assert!(!should_pull_full_table(500, 1000));
        assert!(!should_pull_full_table(0, 1000));
        assert!(should_pull_full_table(501, 1000));
        assert!(!should_pull_full_table(0, 0));
    }

    #[test]
    fn test_chunk_boundaries() {
        let rows: Vec<u32> = (0..2_500).collect();
        let chunks: Vec<_> = rows.chunks(1_000).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1_000);
        assert_eq!(chunks[2].len(), 500);

        let exact: Vec<u32> = (0..2_000).collect();
        assert_eq!(exact.chunks(1_000).count(), 2);
    }
}
