// ABOUTME: Source data-source abstraction: introspect a table's shape and read its rows
// ABOUTME: Dialect variants are chosen by the config's api field

pub mod hh;
pub mod mssql;
pub mod odbc;
pub mod pg;

pub use hh::HhSrcDs;
pub use mssql::MsSrcDs;
pub use odbc::OdbcSrcDs;
pub use pg::PgSrcDs;

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::config::{Api, DbConfig};
use crate::cursor::{MssqlCursor, OdbcCursor, PgCursor};
use crate::dialect::Dialect;
use crate::error::{PoaError, Result};
use crate::filters::{after_predicate, After};
use crate::model::{Row, RowKey, Table, Value};

/// Read access to one source table.
///
/// `get_table` is cached within the instance; the shape never changes over
/// a single sync. `fetch_rows` applies the merge of the instance-level
/// `after` filter and the call-level one.
#[async_trait]
pub trait SrcDs: Send {
    async fn table_exists(&mut self) -> Result<bool>;

    async fn get_table(&mut self) -> Result<Table>;

    /// Row count, honouring the instance `after` filter.
    async fn get_row_count(&mut self) -> Result<i64>;

    async fn fetch_rows(
        &mut self,
        col_names: Option<&BTreeSet<String>>,
        after: Option<&After>,
    ) -> Result<Vec<Row>>;

    async fn fetch_rows_by_key(
        &mut self,
        col_names: Option<&BTreeSet<String>>,
        keys: &BTreeSet<RowKey>,
    ) -> Result<Vec<Row>>;
}

/// Build the source data source for a configured database.
pub async fn create(
    db_config: &DbConfig,
    schema_name: Option<&str>,
    table_name: &str,
    pk_cols: &[String],
    after: &After,
) -> Result<Box<dyn SrcDs>> {
    let conn_str = db_config.resolve_connection_string()?;
    let db_name = db_config.db_name();

    match db_config.api {
        Api::Psycopg => {
            let cur = PgCursor::connect(&conn_str).await?;
            Ok(Box::new(PgSrcDs::new(
                cur,
                db_name,
                schema_name,
                table_name,
                after.clone(),
            )))
        }
        Api::Mssql => {
            require_pk(pk_cols, db_config, table_name)?;
            let cur = MssqlCursor::connect(&conn_str).await?;
            Ok(Box::new(MsSrcDs::new(
                cur,
                db_name,
                schema_name,
                table_name,
                pk_cols.to_vec(),
                after.clone(),
            )))
        }
        Api::Hh => {
            require_pk(pk_cols, db_config, table_name)?;
            let cur = OdbcCursor::connect(&conn_str)?;
            Ok(Box::new(HhSrcDs::new(
                cur,
                db_name,
                schema_name,
                table_name,
                pk_cols.to_vec(),
                after.clone(),
            )))
        }
        Api::Pyodbc => {
            require_pk(pk_cols, db_config, table_name)?;
            let cur = OdbcCursor::connect(&conn_str)?;
            Ok(Box::new(OdbcSrcDs::new(
                cur,
                Dialect::OdbcDefault,
                db_name,
                schema_name,
                table_name,
                pk_cols.to_vec(),
                after.clone(),
            )))
        }
    }
}

fn require_pk(pk_cols: &[String], db_config: &DbConfig, table_name: &str) -> Result<()> {
    if pk_cols.is_empty() {
        return Err(PoaError::Config(format!(
            "pk columns are required to read {table_name} through the {} api",
            db_config.api
        )));
    }
    Ok(())
}

/// The requested columns, or every column of the table, sorted.
pub(crate) fn columns_or_all(col_names: Option<&BTreeSet<String>>, table: &Table) -> Vec<String> {
    match col_names {
        Some(cols) => cols.iter().cloned().collect(),
        None => table.column_names(),
    }
}

/// `SELECT <cols> FROM <table> [WHERE <after predicate>]` in the dialect's
/// spelling, with mixed-case columns aliased down to lowercase.
pub(crate) fn build_select_sql(
    dialect: Dialect,
    schema_name: Option<&str>,
    table_name: &str,
    cols: &[String],
    after: &After,
) -> (String, Vec<Value>) {
    let col_csv = cols
        .iter()
        .map(|c| dialect.col_with_alias(c))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "SELECT {col_csv} FROM {}",
        dialect.qualified_table(schema_name, table_name)
    );

    match after_predicate(dialect, after, 1) {
        Some((clause, params)) => {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
            (sql, params)
        }
        None => (sql, Vec::new()),
    }
}

/// `SELECT count(*) AS ct FROM <table> [WHERE <after predicate>]`.
pub(crate) fn build_count_sql(
    dialect: Dialect,
    schema_name: Option<&str>,
    table_name: &str,
    after: &After,
) -> (String, Vec<Value>) {
    let mut sql = format!(
        "SELECT count(*) AS ct FROM {}",
        dialect.qualified_table(schema_name, table_name)
    );

    match after_predicate(dialect, after, 1) {
        Some((clause, params)) => {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
            (sql, params)
        }
        None => (sql, Vec::new()),
    }
}

/// Pull the integer out of a `count(*) AS ct` row.
pub(crate) fn count_from_row(row: Option<Row>) -> Result<i64> {
    let row = row.ok_or_else(|| {
        PoaError::Logic("the row count query returned no row, which should be impossible".into())
    })?;
    match row.get("ct") {
        Some(Value::Int(ct)) => Ok(*ct),
        other => Err(PoaError::Logic(format!(
            "the row count query returned a non-integer: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_build_select_sql_without_after() {
        let (sql, params) = build_select_sql(
            Dialect::Postgres,
            Some("sales"),
            "customer",
            &["customer_id".to_string(), "first_name".to_string()],
            &After::new(),
        );
        assert_eq!(
            sql,
            "SELECT \"customer_id\", \"first_name\" FROM \"sales\".\"customer\""
        );
        assert!(params.is_empty());
    }

    #[test]
    fn test_build_select_sql_with_after() {
        let after = After::from([(
            "date_added".to_string(),
            Value::Date(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()),
        )]);
        let (sql, params) = build_select_sql(
            Dialect::Postgres,
            None,
            "customer",
            &["customer_id".to_string()],
            &after,
        );
        assert_eq!(
            sql,
            "SELECT \"customer_id\" FROM \"customer\" WHERE (\"date_added\" > $1)"
        );
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_build_select_sql_aliases_mixed_case() {
        let (sql, _) = build_select_sql(
            Dialect::Hh,
            None,
            "customer",
            &["CustomerId".to_string()],
            &After::new(),
        );
        assert_eq!(
            sql,
            "SELECT `CustomerId` AS `customerid` FROM `customer`"
        );
    }

    #[test]
    fn test_build_count_sql() {
        let (sql, params) = build_count_sql(Dialect::Mssql, Some("dbo"), "orders", &After::new());
        assert_eq!(sql, "SELECT count(*) AS ct FROM \"dbo\".\"orders\"");
        assert!(params.is_empty());

        let after = After::from([(
            "modified".to_string(),
            Value::Date(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()),
        )]);
        let (sql, params) = build_count_sql(Dialect::Mssql, Some("dbo"), "orders", &after);
        assert_eq!(
            sql,
            "SELECT count(*) AS ct FROM \"dbo\".\"orders\" WHERE (\"modified\" > @P1)"
        );
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_count_from_row() {
        let mut row = Row::new();
        row.insert("ct".into(), Value::Int(7));
        assert_eq!(count_from_row(Some(row)).unwrap(), 7);
        assert!(count_from_row(None).is_err());
    }
}
