// ABOUTME: The HH dialect: backtick quoting, single-column keys, no timezone-aware timestamps
// ABOUTME: Wraps the generic ODBC source and reshapes what it reports

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::cursor::OdbcCursor;
use crate::dialect::Dialect;
use crate::error::{PoaError, Result};
use crate::filters::After;
use crate::model::{DataType, Row, RowKey, Table, Value};
use crate::source::{columns_or_all, OdbcSrcDs, SrcDs};

/// HH answers `IN` lists of at most this many keys per statement.
const KEY_CHUNK_SIZE: usize = 100;

pub struct HhSrcDs {
    inner: OdbcSrcDs,
}

impl HhSrcDs {
    pub fn new(
        cur: OdbcCursor,
        db_name: &str,
        schema_name: Option<&str>,
        table_name: &str,
        pk_cols: Vec<String>,
        after: After,
    ) -> Self {
        HhSrcDs {
            inner: OdbcSrcDs::new(
                cur,
                Dialect::Hh,
                db_name,
                schema_name,
                table_name,
                pk_cols,
                after,
            ),
        }
    }
}

#[async_trait]
impl SrcDs for HhSrcDs {
    async fn table_exists(&mut self) -> Result<bool> {
        self.inner.table_exists().await
    }

    async fn get_table(&mut self) -> Result<Table> {
        let table = self.inner.get_table().await?;
        Ok(apply_hh_overrides(table))
    }

    async fn get_row_count(&mut self) -> Result<i64> {
        self.inner.get_row_count().await
    }

    async fn fetch_rows(
        &mut self,
        col_names: Option<&BTreeSet<String>>,
        after: Option<&After>,
    ) -> Result<Vec<Row>> {
        self.inner.fetch_rows(col_names, after).await
    }

    /// Keys are fetched through `IN (...)` lists chunked in groups of 100.
    /// HH only supports single-column primary keys; a wider key is a hard
    /// error.
    async fn fetch_rows_by_key(
        &mut self,
        col_names: Option<&BTreeSet<String>>,
        keys: &BTreeSet<RowKey>,
    ) -> Result<Vec<Row>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let table = self.get_table().await?;
        if table.pk.len() > 1 {
            return Err(PoaError::Logic(
                "the hh api can only fetch rows by single-column primary keys".into(),
            ));
        }

        let cols = columns_or_all(col_names, &table);
        let key_col = &table.pk[0];

        let key_values: Vec<Value> = keys
            .iter()
            .map(|key| {
                key.get(key_col).cloned().ok_or_else(|| {
                    PoaError::Logic(format!("key is missing the pk column, {key_col}"))
                })
            })
            .collect::<Result<_>>()?;

        let dialect = self.inner.dialect();
        let qualified = self.inner.qualified_table();

        let mut rows = Vec::new();
        for chunk in key_values.chunks(KEY_CHUNK_SIZE) {
            let sql = build_in_sql(dialect, &qualified, &cols, key_col, chunk.len());
            rows.extend(self.inner.cursor().fetch_all(&sql, chunk)?);
        }
        Ok(rows)
    }
}

/// HH reports its key columns as nullable and claims timezone-aware
/// timestamps it cannot produce; the reported shape is corrected here.
fn apply_hh_overrides(table: Table) -> Table {
    let mut table = table;
    for col in &mut table.columns {
        if table.pk.contains(&col.name) {
            col.nullable = false;
        }
        if col.data_type == DataType::TimestampTz {
            col.data_type = DataType::Timestamp;
        }
    }
    table
}

fn build_in_sql(
    dialect: Dialect,
    qualified_table: &str,
    cols: &[String],
    key_col: &str,
    key_count: usize,
) -> String {
    let col_csv = cols
        .iter()
        .map(|c| dialect.col_with_alias(c))
        .collect::<Vec<_>>()
        .join(", ");

    let placeholders = vec!["?"; key_count].join(", ");

    format!(
        "SELECT {col_csv} FROM {qualified_table} WHERE {} IN ({placeholders})",
        dialect.wrap(key_col)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Column;

    fn hh_table() -> Table {
        Table::new(
            "hh",
            None,
            "activity",
            vec!["activity_id".to_string()],
            vec![
                Column::new("activity_id", DataType::Int, true, None, None, None),
                Column::new("description", DataType::Text, true, None, None, None),
                Column::new("changed_date", DataType::TimestampTz, true, None, None, None),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_pk_columns_forced_non_nullable() {
        let table = apply_hh_overrides(hh_table());
        assert!(!table.column("activity_id").unwrap().nullable);
        assert!(table.column("description").unwrap().nullable);
    }

    #[test]
    fn test_timestamptz_rewritten_to_timestamp() {
        let table = apply_hh_overrides(hh_table());
        assert_eq!(
            table.column("changed_date").unwrap().data_type,
            DataType::Timestamp
        );
    }

    #[test]
    fn test_build_in_sql() {
        let sql = build_in_sql(
            Dialect::Hh,
            "`activity`",
            &["activity_id".to_string(), "description".to_string()],
            "activity_id",
            3,
        );
        assert_eq!(
            sql,
            "SELECT `activity_id`, `description` FROM `activity` \
             WHERE `activity_id` IN (?, ?, ?)"
        );
    }

    #[test]
    fn test_key_chunking_boundaries() {
        let keys: Vec<i64> = (0..250).collect();
        let chunks: Vec<_> = keys.chunks(KEY_CHUNK_SIZE).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 100);
        assert_eq!(chunks[2].len(), 50);
    }
}
