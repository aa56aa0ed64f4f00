// ABOUTME: Check service: row-count and primary-key reconciliation between source and destination
// ABOUTME: Writes a CheckResult through the destination's audit schema

use std::collections::BTreeSet;
use std::time::Instant;

use crate::audit::AuditLog;
use crate::config::DbConfig;
use crate::dest;
use crate::error::Result;
use crate::filters::After;
use crate::inspect::inspect;
use crate::model::{CheckResult, Row, RowKey};
use crate::source;

/// Compare a source table against its destination copy and persist the
/// outcome. Failures land in the destination's error log before they
/// propagate.
#[allow(clippy::too_many_arguments)]
pub async fn check(
    src_db_config: &DbConfig,
    src_schema_name: Option<&str>,
    src_table_name: &str,
    dst_db_config: &DbConfig,
    dst_schema_name: Option<&str>,
    dst_table_name: &str,
    pk: &[String],
    after: &After,
) -> Result<CheckResult> {
    let mut audit = AuditLog::connect(dst_db_config).await?;

    let result = run_check(
        src_db_config,
        src_schema_name,
        src_table_name,
        dst_db_config,
        dst_schema_name,
        dst_table_name,
        pk,
        after,
    )
    .await;

    if let Err(e) = &result {
        let message = format!(
            "An error occurred while checking {src_table_name} against {dst_table_name}: {e}"
        );
        if let Err(log_error) = audit.error(&message).await {
            tracing::error!("failed to record the check error: {}", log_error);
        }
    }

    result
}

#[allow(clippy::too_many_arguments)]
async fn run_check(
    src_db_config: &DbConfig,
    src_schema_name: Option<&str>,
    src_table_name: &str,
    dst_db_config: &DbConfig,
    dst_schema_name: Option<&str>,
    dst_table_name: &str,
    pk: &[String],
    after: &After,
) -> Result<CheckResult> {
    let started = Instant::now();

    let src_table = inspect(
        src_db_config,
        src_schema_name,
        src_table_name,
        dst_db_config,
        pk,
    )
    .await?;

    let mut src = source::create(
        src_db_config,
        src_schema_name,
        src_table_name,
        pk,
        after,
    )
    .await?;

    let mut dst = dest::create(
        dst_db_config,
        dst_schema_name,
        dst_table_name,
        &src_table,
        after,
    )
    .await?;

    let src_rows = src.get_row_count().await?;
    let dst_rows = dst.get_row_count().await?;

    let pk_cols: BTreeSet<String> = src_table.pk.iter().cloned().collect();
    let src_keys = keys_of(&src.fetch_rows(Some(&pk_cols), None).await?, &src_table.pk)?;
    let dst_keys = keys_of(&dst.fetch_rows(Some(&pk_cols), None).await?, &src_table.pk)?;

    let extra_keys: BTreeSet<RowKey> = dst_keys.difference(&src_keys).cloned().collect();
    let missing_keys: BTreeSet<RowKey> = src_keys.difference(&dst_keys).cloned().collect();

    let result = CheckResult {
        src_db_name: src_db_config.db_name().to_string(),
        src_schema_name: src_schema_name.map(str::to_string),
        src_table_name: src_table_name.to_string(),
        dst_db_name: dst_db_config.db_name().to_string(),
        dst_schema_name: dst_schema_name.map(str::to_string),
        dst_table_name: dst_table_name.to_string(),
        src_rows,
        dst_rows,
        extra_keys,
        missing_keys,
        execution_millis: started.elapsed().as_millis() as u64,
    };

    dst.add_check_result(&result).await?;
    Ok(result)
}

fn keys_of(rows: &[Row], pk: &[String]) -> Result<BTreeSet<RowKey>> {
    rows.iter().map(|row| RowKey::from_row(row, pk)).collect()
}
