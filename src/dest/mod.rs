// ABOUTME: Destination data-source abstraction: the managed main/staging/history protocol
// ABOUTME: PostgreSQL is the only destination dialect

pub mod pg;

pub use pg::PgDstDs;

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::config::{Api, DbConfig};
use crate::cursor::PgCursor;
use crate::error::{PoaError, Result};
use crate::filters::After;
use crate::model::{CheckResult, Row, RowKey, Table};

/// Write access to one managed destination table.
///
/// Every managed table mirrors the source columns and adds three control
/// columns: `poa_hd` (md5 of the non-key column tuple), `poa_op`
/// (`a`/`d`/`u`), and `poa_ts` (write timestamp). Deletes are soft: rows
/// stay with `poa_op = 'd'` and every read excludes them.
#[async_trait]
pub trait DstDs: Send {
    async fn table_exists(&mut self) -> Result<bool>;

    /// Create the main table with the managed layout and its indices.
    async fn create(&mut self) -> Result<()>;

    async fn drop_table(&mut self) -> Result<()>;

    async fn truncate(&mut self) -> Result<()>;

    async fn create_staging_table(&mut self) -> Result<()>;

    async fn create_history_table(&mut self) -> Result<()>;

    /// Descending index per increasing column, created if absent.
    async fn add_increasing_col_indices(&mut self, cols: &BTreeSet<String>) -> Result<()>;

    /// Per-column max over live rows; `None` when the table is empty or
    /// every max is null.
    async fn get_max_values(&mut self, cols: &BTreeSet<String>) -> Result<Option<After>>;

    /// Live-row count, honouring the instance `after` filter.
    async fn get_row_count(&mut self) -> Result<i64>;

    async fn fetch_rows(
        &mut self,
        col_names: Option<&BTreeSet<String>>,
        after: Option<&After>,
    ) -> Result<Vec<Row>>;

    /// Truncate staging, then insert `rows` with `poa_op = 'a'` and the
    /// content hash computed in SQL at insert time.
    async fn add_rows_to_staging(&mut self, rows: &[Row]) -> Result<()>;

    /// Merge staging into main. Idempotent: a conflicting row only mutates
    /// when its content hash changed or it was soft-deleted.
    async fn upsert_rows_from_staging(&mut self) -> Result<u64>;

    /// Soft-delete by key. Never physically removes rows.
    async fn delete_rows(&mut self, keys: &BTreeSet<RowKey>) -> Result<u64>;

    /// Append every main row not already in history, matched on
    /// `(pk…, poa_ts)`.
    async fn update_history_table(&mut self) -> Result<()>;

    async fn add_check_result(&mut self, result: &CheckResult) -> Result<()>;
}

/// Build the destination data source for a configured database.
pub async fn create(
    db_config: &DbConfig,
    dst_schema_name: Option<&str>,
    dst_table_name: &str,
    src_table: &Table,
    after: &After,
) -> Result<Box<dyn DstDs>> {
    match db_config.api {
        Api::Psycopg => {
            let conn_str = db_config.resolve_connection_string()?;
            let cur = PgCursor::connect(&conn_str).await?;
            cur.apply_session_limits().await?;
            Ok(Box::new(PgDstDs::new(
                cur,
                db_config.db_name(),
                dst_schema_name,
                dst_table_name,
                src_table,
                after.clone(),
            )))
        }
        other => Err(PoaError::UnrecognizedDatabaseApi(format!(
            "{other} does not have a destination implementation"
        ))),
    }
}
