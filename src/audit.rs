// ABOUTME: Durable audit trail in the destination's poa schema
// ABOUTME: sync_started opens a run; exactly one of succeeded/failed/skipped closes it

use crate::config::DbConfig;
use crate::cursor::PgCursor;
use crate::error::{PoaError, Result};
use crate::model::Value;

/// Statements that bring the poa namespace up to the shape the engine
/// expects. All idempotent, run one at a time on connect.
const SCHEMA_DDL: [&str; 9] = [
    "CREATE SCHEMA IF NOT EXISTS poa",
    "CREATE TABLE IF NOT EXISTS poa.sync (\n  sync_id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY\n, src_db_name TEXT NOT NULL\n, src_schema_name TEXT NULL\n, src_table_name TEXT NOT NULL\n, incremental BOOL NOT NULL\n, ts TIMESTAMPTZ(3) NOT NULL DEFAULT now()\n)",
    "CREATE TABLE IF NOT EXISTS poa.sync_success (\n  sync_id BIGINT PRIMARY KEY\n, rows_added BIGINT NOT NULL\n, rows_deleted BIGINT NOT NULL\n, rows_updated BIGINT NOT NULL\n, execution_millis BIGINT NOT NULL\n, ts TIMESTAMPTZ(3) NOT NULL DEFAULT now()\n)",
    "CREATE TABLE IF NOT EXISTS poa.sync_error (\n  sync_id BIGINT PRIMARY KEY\n, error_message TEXT NOT NULL\n, ts TIMESTAMPTZ(3) NOT NULL DEFAULT now()\n)",
    "CREATE TABLE IF NOT EXISTS poa.sync_skip (\n  sync_id BIGINT PRIMARY KEY\n, skip_reason TEXT NOT NULL\n, ts TIMESTAMPTZ(3) NOT NULL DEFAULT now()\n)",
    "CREATE TABLE IF NOT EXISTS poa.error (\n  error_id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY\n, error_message TEXT NOT NULL\n, ts TIMESTAMPTZ(3) NOT NULL DEFAULT now()\n)",
    "CREATE TABLE IF NOT EXISTS poa.table_def (\n  table_def_id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY\n, db_name TEXT NOT NULL\n, schema_name TEXT NOT NULL DEFAULT ''\n, table_name TEXT NOT NULL\n, pk_cols TEXT NOT NULL\n, ts TIMESTAMPTZ(3) NOT NULL DEFAULT now()\n, UNIQUE (db_name, schema_name, table_name)\n)",
    "CREATE TABLE IF NOT EXISTS poa.col_def (\n  col_def_id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY\n, table_def_id BIGINT NOT NULL REFERENCES poa.table_def (table_def_id) ON DELETE CASCADE\n, col_name TEXT NOT NULL\n, col_data_type TEXT NOT NULL\n, col_length BIGINT NULL\n, col_precision BIGINT NULL\n, col_scale BIGINT NULL\n, col_nullable BOOL NOT NULL\n, UNIQUE (table_def_id, col_name)\n)",
    "CREATE TABLE IF NOT EXISTS poa.check_result (\n  check_result_id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY\n, src_db_name TEXT NOT NULL\n, src_schema_name TEXT NULL\n, src_table_name TEXT NOT NULL\n, dst_db_name TEXT NOT NULL\n, dst_schema_name TEXT NULL\n, dst_table_name TEXT NOT NULL\n, src_rows BIGINT NOT NULL\n, dst_rows BIGINT NOT NULL\n, extra_keys TEXT NOT NULL\n, missing_keys TEXT NOT NULL\n, execution_millis BIGINT NOT NULL\n, ts TIMESTAMPTZ(3) NOT NULL DEFAULT now()\n)",
];

/// Make sure the poa namespace exists on this session's database.
pub(crate) async fn ensure_poa_schema(cur: &PgCursor) -> Result<()> {
    for sql in SCHEMA_DDL {
        cur.execute(sql, &[]).await?;
    }
    Ok(())
}

/// The audit log, writing to the destination warehouse over its own
/// session.
pub struct AuditLog {
    cur: PgCursor,
}

impl AuditLog {
    pub async fn connect(db_config: &DbConfig) -> Result<Self> {
        let conn_str = db_config.resolve_connection_string()?;
        let cur = PgCursor::connect(&conn_str).await?;
        ensure_poa_schema(&cur).await?;
        Ok(AuditLog { cur })
    }

    /// Open a sync run and return its id. A run with no matching terminal
    /// row is an orphan, visible by replaying the log.
    pub async fn sync_started(
        &mut self,
        src_db_name: &str,
        src_schema_name: Option<&str>,
        src_table_name: &str,
        incremental: bool,
    ) -> Result<i64> {
        let sql = "INSERT INTO poa.sync (src_db_name, src_schema_name, src_table_name, incremental) \
                   VALUES ($1, $2, $3, $4) RETURNING sync_id";
        let row = self
            .cur
            .fetch_one(
                sql,
                &[
                    Value::Text(src_db_name.to_string()),
                    src_schema_name.map_or(Value::Null, |s| Value::Text(s.to_string())),
                    Value::Text(src_table_name.to_string()),
                    Value::Bool(incremental),
                ],
            )
            .await?;

        match row.and_then(|r| r.get("sync_id").cloned()) {
            Some(Value::Int(sync_id)) => Ok(sync_id),
            other => Err(PoaError::Logic(format!(
                "sync_started returned {other:?} instead of a sync_id"
            ))),
        }
    }

    pub async fn sync_succeeded(
        &mut self,
        sync_id: i64,
        rows_added: u64,
        rows_deleted: u64,
        rows_updated: u64,
        execution_millis: u64,
    ) -> Result<()> {
        let sql = "INSERT INTO poa.sync_success \
                   (sync_id, rows_added, rows_deleted, rows_updated, execution_millis) \
                   VALUES ($1, $2, $3, $4, $5)";
        self.cur
            .execute(
                sql,
                &[
                    Value::Int(sync_id),
                    Value::Int(rows_added as i64),
                    Value::Int(rows_deleted as i64),
                    Value::Int(rows_updated as i64),
                    Value::Int(execution_millis as i64),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn sync_failed(&mut self, sync_id: i64, reason: &str) -> Result<()> {
        let sql = "INSERT INTO poa.sync_error (sync_id, error_message) VALUES ($1, $2)";
        self.cur
            .execute(
                sql,
                &[Value::Int(sync_id), Value::Text(sanitize(reason))],
            )
            .await?;
        Ok(())
    }

    pub async fn sync_skipped(&mut self, sync_id: i64, reason: &str) -> Result<()> {
        let sql = "INSERT INTO poa.sync_skip (sync_id, skip_reason) VALUES ($1, $2)";
        self.cur
            .execute(
                sql,
                &[Value::Int(sync_id), Value::Text(sanitize(reason))],
            )
            .await?;
        Ok(())
    }

    /// A free-standing error record, not bound to any sync.
    pub async fn error(&mut self, error_message: &str) -> Result<()> {
        let sql = "INSERT INTO poa.error (error_message) VALUES ($1)";
        self.cur
            .execute(sql, &[Value::Text(sanitize(error_message))])
            .await?;
        Ok(())
    }

    /// Drop log rows older than `days_to_keep` days from every log table.
    pub async fn delete_old_logs(&mut self, days_to_keep: u32) -> Result<()> {
        let terminal_tables = ["poa.sync_success", "poa.sync_error", "poa.sync_skip"];
        for table in terminal_tables {
            let sql = format!(
                "DELETE FROM {table} WHERE sync_id IN \
                 (SELECT sync_id FROM poa.sync WHERE ts < now() - make_interval(days => $1))"
            );
            self.cur.execute(&sql, &[Value::Int(days_to_keep as i64)]).await?;
        }

        for table in ["poa.sync", "poa.error", "poa.check_result"] {
            let sql =
                format!("DELETE FROM {table} WHERE ts < now() - make_interval(days => $1)");
            self.cur.execute(&sql, &[Value::Int(days_to_keep as i64)]).await?;
        }
        Ok(())
    }
}

/// Prune the destination's log retention window.
pub async fn cleanup(db_config: &DbConfig, days_to_keep: u32) -> Result<()> {
    let mut log = AuditLog::connect(db_config).await?;
    log.delete_old_logs(days_to_keep).await
}

/// Error text can quote the SQL that failed, which the guard would then
/// refuse; strip the guarded tokens before persisting.
fn sanitize(message: &str) -> String {
    message
        .replace(';', ",")
        .replace("--", "-")
        .replace("/*", "")
        .replace("*/", "")
}
