// ABOUTME: Generic ODBC source: shape from a zero-row probe, keyed reads via prepared equality
// ABOUTME: The primary key comes from the caller; ODBC drivers do not expose one uniformly

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::cursor::OdbcCursor;
use crate::dialect::Dialect;
use crate::error::{PoaError, Result};
use crate::filters::{combine_filters, After};
use crate::model::{Row, RowKey, Table, Value};
use crate::source::{
    build_count_sql, build_select_sql, columns_or_all, count_from_row, SrcDs,
};

pub struct OdbcSrcDs {
    cur: OdbcCursor,
    dialect: Dialect,
    db_name: String,
    schema_name: Option<String>,
    table_name: String,
    pk_cols: Vec<String>,
    after: After,
    table: Option<Table>,
}

impl OdbcSrcDs {
    pub fn new(
        cur: OdbcCursor,
        dialect: Dialect,
        db_name: &str,
        schema_name: Option<&str>,
        table_name: &str,
        pk_cols: Vec<String>,
        after: After,
    ) -> Self {
        OdbcSrcDs {
            cur,
            dialect,
            db_name: db_name.to_string(),
            schema_name: schema_name.map(str::to_string),
            table_name: table_name.to_string(),
            pk_cols,
            after,
            table: None,
        }
    }

    pub(crate) fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub(crate) fn qualified_table(&self) -> String {
        self.dialect
            .qualified_table(self.schema_name.as_deref(), &self.table_name)
    }

    pub(crate) fn cursor(&self) -> &OdbcCursor {
        &self.cur
    }
}

#[async_trait]
impl SrcDs for OdbcSrcDs {
    async fn table_exists(&mut self) -> Result<bool> {
        self.cur
            .table_exists(self.schema_name.as_deref(), &self.table_name)
    }

    async fn get_table(&mut self) -> Result<Table> {
        if let Some(table) = &self.table {
            return Ok(table.clone());
        }

        if !self.table_exists().await? {
            return Err(PoaError::table_doesnt_exist(
                self.schema_name.as_deref(),
                &self.table_name,
            ));
        }

        // The shape comes from the metadata of a query that matches no rows.
        let probe = format!("SELECT * FROM {} WHERE 1 = 0", self.qualified_table());
        let columns = self.cur.describe_columns(&probe)?;
        let table = Table::new(
            &self.db_name,
            self.schema_name.as_deref(),
            &self.table_name,
            self.pk_cols.clone(),
            columns,
        )?;

        self.table = Some(table.clone());
        Ok(table)
    }

    async fn get_row_count(&mut self) -> Result<i64> {
        let (sql, params) = build_count_sql(
            self.dialect,
            self.schema_name.as_deref(),
            &self.table_name,
            &self.after,
        );
        count_from_row(self.cur.fetch_one(&sql, &params)?)
    }

    async fn fetch_rows(
        &mut self,
        col_names: Option<&BTreeSet<String>>,
        after: Option<&After>,
    ) -> Result<Vec<Row>> {
        let table = self.get_table().await?;
        let cols = columns_or_all(col_names, &table);
        let full_after = combine_filters(Some(&self.after), after);
        let (sql, params) = build_select_sql(
            self.dialect,
            self.schema_name.as_deref(),
            &self.table_name,
            &cols,
            &full_after,
        );
        self.cur.fetch_all(&sql, &params)
    }

    async fn fetch_rows_by_key(
        &mut self,
        col_names: Option<&BTreeSet<String>>,
        keys: &BTreeSet<RowKey>,
    ) -> Result<Vec<Row>> {
        let first_key = match keys.iter().next() {
            Some(key) => key,
            None => return Ok(Vec::new()),
        };
        let key_cols: Vec<&str> = first_key.columns().collect();

        let table = self.get_table().await?;
        let cols = columns_or_all(col_names, &table);

        let sql = build_equality_sql(self.dialect, &self.qualified_table(), &cols, &key_cols);

        // One prepared statement, executed per key; the result sets are
        // fetched eagerly and concatenated.
        let mut rows = Vec::new();
        for key in keys {
            let params: Vec<Value> = key.values().cloned().collect();
            rows.extend(self.cur.fetch_all(&sql, &params)?);
        }
        Ok(rows)
    }
}

/// `SELECT <cols> FROM <table> WHERE pk_1 = ? AND pk_2 = ?`.
pub(crate) fn build_equality_sql(
    dialect: Dialect,
    qualified_table: &str,
    cols: &[String],
    key_cols: &[&str],
) -> String {
    let col_csv = cols
        .iter()
        .map(|c| dialect.col_with_alias(c))
        .collect::<Vec<_>>()
        .join(", ");

    let where_clause = key_cols
        .iter()
        .enumerate()
        .map(|(n, c)| format!("{} = {}", dialect.wrap(c), dialect.placeholder(n + 1)))
        .collect::<Vec<_>>()
        .join(" AND ");

    format!("SELECT {col_csv} FROM {qualified_table} WHERE {where_clause}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_equality_sql() {
        let sql = build_equality_sql(
            Dialect::OdbcDefault,
            "\"dbo\".\"orders\"",
            &["order_id".to_string(), "total".to_string()],
            &["order_id"],
        );
        assert_eq!(
            sql,
            "SELECT \"order_id\", \"total\" FROM \"dbo\".\"orders\" WHERE \"order_id\" = ?"
        );
    }

    #[test]
    fn test_build_equality_sql_composite_key() {
        let sql = build_equality_sql(
            Dialect::Mssql,
            "\"dbo\".\"order_items\"",
            &["quantity".to_string()],
            &["item_id", "order_id"],
        );
        assert_eq!(
            sql,
            "SELECT \"quantity\" FROM \"dbo\".\"order_items\" \
             WHERE \"item_id\" = @P1 AND \"order_id\" = @P2"
        );
    }
}
