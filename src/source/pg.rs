// ABOUTME: PostgreSQL source: information_schema introspection and keyed reads
// ABOUTME: fetch_rows_by_key joins a VALUES list with IS NOT DISTINCT FROM

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::cursor::PgCursor;
use crate::dialect::Dialect;
use crate::error::{PoaError, Result};
use crate::filters::{combine_filters, After};
use crate::model::{Column, DataType, Row, RowKey, Table, Value};
use crate::source::{
    build_count_sql, build_select_sql, columns_or_all, count_from_row, SrcDs,
};

const DIALECT: Dialect = Dialect::Postgres;

pub struct PgSrcDs {
    cur: PgCursor,
    db_name: String,
    schema_name: Option<String>,
    table_name: String,
    after: After,
    table: Option<Table>,
}

impl PgSrcDs {
    pub fn new(
        cur: PgCursor,
        db_name: &str,
        schema_name: Option<&str>,
        table_name: &str,
        after: After,
    ) -> Self {
        PgSrcDs {
            cur,
            db_name: db_name.to_string(),
            schema_name: schema_name.map(str::to_string),
            table_name: table_name.to_string(),
            after,
            table: None,
        }
    }

    /// Introspection targets `public` when no schema was configured.
    fn schema_or_public(&self) -> &str {
        self.schema_name.as_deref().unwrap_or("public")
    }

    async fn introspect_columns(&self) -> Result<Vec<Column>> {
        let sql = "SELECT c.column_name, c.is_nullable = 'YES' AS nullable, c.data_type, \
                   c.character_maximum_length AS max_length, c.numeric_precision AS precision, \
                   c.numeric_scale AS scale \
                   FROM information_schema.columns AS c \
                   WHERE c.table_schema = $1 AND c.table_name = $2 \
                   ORDER BY c.ordinal_position";

        let rows = self
            .cur
            .fetch_all(
                sql,
                &[
                    Value::Text(self.schema_or_public().to_string()),
                    Value::Text(self.table_name.clone()),
                ],
            )
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name = text_field(&row, "column_name")?;
            let type_name = text_field(&row, "data_type")?;
            columns.push(Column::new(
                &name,
                lookup_data_type(&type_name)?,
                bool_field(&row, "nullable")?,
                int_field(&row, "max_length"),
                int_field(&row, "precision"),
                int_field(&row, "scale"),
            ));
        }
        Ok(columns)
    }

    async fn introspect_pk(&self) -> Result<Vec<String>> {
        let sql = "SELECT a.attname \
                   FROM pg_index i \
                   JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
                   JOIN pg_class c ON c.oid = i.indrelid \
                   JOIN pg_namespace n ON n.oid = c.relnamespace \
                   WHERE i.indisprimary AND n.nspname = $1 AND c.relname = $2 \
                   ORDER BY array_position(i.indkey, a.attnum)";

        let rows = self
            .cur
            .fetch_all(
                sql,
                &[
                    Value::Text(self.schema_or_public().to_string()),
                    Value::Text(self.table_name.clone()),
                ],
            )
            .await?;

        rows.iter()
            .map(|row| Ok(text_field(row, "attname")?.to_lowercase()))
            .collect()
    }
}

#[async_trait]
impl SrcDs for PgSrcDs {
    async fn table_exists(&mut self) -> Result<bool> {
        let sql = "SELECT EXISTS (SELECT 1 FROM information_schema.tables AS t \
                   WHERE t.table_schema = $1 AND t.table_name = $2) AS tbl_exists";
        let row = self
            .cur
            .fetch_one(
                sql,
                &[
                    Value::Text(self.schema_or_public().to_string()),
                    Value::Text(self.table_name.clone()),
                ],
            )
            .await?;

        match row.and_then(|r| r.get("tbl_exists").cloned()) {
            Some(Value::Bool(exists)) => Ok(exists),
            other => Err(PoaError::Logic(format!(
                "the table_exists query returned {other:?}, which should be impossible"
            ))),
        }
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

        let columns = self.introspect_columns().await?;
        let pk = self.introspect_pk().await?;
        let table = Table::new(
            &self.db_name,
            self.schema_name.as_deref(),
            &self.table_name,
            pk,
            columns,
        )?;

        self.table = Some(table.clone());
        Ok(table)
    }

    async fn get_row_count(&mut self) -> Result<i64> {
        let (sql, params) = build_count_sql(
            DIALECT,
            self.schema_name.as_deref(),
            &self.table_name,
            &self.after,
        );
        count_from_row(self.cur.fetch_one(&sql, &params).await?)
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
            DIALECT,
            self.schema_name.as_deref(),
            &self.table_name,
            &cols,
            &full_after,
        );
        self.cur.fetch_all(&sql, &params).await
    }

    async fn fetch_rows_by_key(
        &mut self,
        col_names: Option<&BTreeSet<String>>,
        keys: &BTreeSet<RowKey>,
    ) -> Result<Vec<Row>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let table = self.get_table().await?;
        let cols = columns_or_all(col_names, &table);
        let keys: Vec<&RowKey> = keys.iter().collect();

        // The key columns' types, so the VALUES list can carry explicit
        // casts; the server cannot infer a bare placeholder's type there.
        let first_key = keys.first().ok_or_else(|| {
            PoaError::Logic("no keys were provided".into())
        })?;
        let key_types = first_key
            .columns()
            .map(|col| {
                table
                    .column(col)
                    .map(|c| c.data_type)
                    .ok_or_else(|| {
                        PoaError::Logic(format!("the key column, {col}, is not a table column"))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let sql = build_fetch_by_key_sql(
            self.schema_name.as_deref(),
            &self.table_name,
            &cols,
            &keys,
            &key_types,
        )?;

        let params: Vec<Value> = keys
            .iter()
            .flat_map(|key| key.values().cloned())
            .collect();

        self.cur.fetch_all(&sql, &params).await
    }
}

/// Join the table against a `VALUES` list of keys. `IS NOT DISTINCT FROM`
/// keeps the join well-defined even if a key column is null, and the
/// placeholders are cast so the list's column types are known.
fn build_fetch_by_key_sql(
    schema_name: Option<&str>,
    table_name: &str,
    cols: &[String],
    keys: &[&RowKey],
    key_types: &[DataType],
) -> Result<String> {
    let first_key = keys
        .first()
        .ok_or_else(|| PoaError::Logic("no keys were provided".into()))?;
    let key_cols: Vec<&str> = first_key.columns().collect();

    let key_col_csv = |prefix: &str| -> String {
        key_cols
            .iter()
            .map(|c| format!("{prefix}{}", DIALECT.wrap(c)))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut param = 0;
    let key_rows_csv = keys
        .iter()
        .map(|key| {
            let placeholders = key
                .values()
                .enumerate()
                .map(|(col_idx, _)| {
                    param += 1;
                    format!("{}::{}", DIALECT.placeholder(param), cast_type(key_types[col_idx]))
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("({placeholders})")
        })
        .collect::<Vec<_>>()
        .join(", ");

    let col_csv = cols
        .iter()
        .map(|c| format!("t.{}", DIALECT.col_with_alias(c)))
        .collect::<Vec<_>>()
        .join(", ");

    Ok(format!(
        "WITH keys ({key_list}) AS (VALUES {key_rows_csv}) \
         SELECT {col_csv} FROM {table} AS t \
         JOIN keys AS k ON ({t_keys}) IS NOT DISTINCT FROM ({k_keys})",
        key_list = key_col_csv(""),
        table = DIALECT.qualified_table(schema_name, table_name),
        t_keys = key_col_csv("t."),
        k_keys = key_col_csv("k."),
    ))
}

/// The cast spelling for each portable type on PostgreSQL.
fn cast_type(data_type: DataType) -> &'static str {
    match data_type {
        DataType::BigFloat => "DOUBLE PRECISION",
        DataType::BigInt => "BIGINT",
        DataType::Bool => "BOOL",
        DataType::Date => "DATE",
        DataType::Decimal => "NUMERIC",
        DataType::Float => "FLOAT",
        DataType::Int => "INT",
        DataType::Text => "TEXT",
        DataType::Timestamp => "TIMESTAMP",
        DataType::TimestampTz => "TIMESTAMPTZ",
        DataType::Uuid => "UUID",
    }
}

/// PostgreSQL `information_schema` type names mapped into the portable set.
fn lookup_data_type(type_name: &str) -> Result<DataType> {
    let data_type = match type_name {
        "bigint" => DataType::BigInt,
        "boolean" => DataType::Bool,
        "char" | "character" | "character varying" | "text" => DataType::Text,
        "date" => DataType::Date,
        "double precision" => DataType::BigFloat,
        "integer" | "oid" | "smallint" => DataType::Int,
        "numeric" => DataType::Decimal,
        "real" => DataType::Float,
        "timestamp with time zone" => DataType::TimestampTz,
        "timestamp without time zone" => DataType::Timestamp,
        "uuid" => DataType::Uuid,
        other => return Err(PoaError::UnsupportedType(other.to_string())),
    };
    Ok(data_type)
}

fn text_field(row: &Row, name: &str) -> Result<String> {
    match row.get(name) {
        Some(Value::Text(text)) => Ok(text.clone()),
        other => Err(PoaError::Logic(format!(
            "expected a text value for {name}, but got {other:?}"
        ))),
    }
}

fn bool_field(row: &Row, name: &str) -> Result<bool> {
    match row.get(name) {
        Some(Value::Bool(value)) => Ok(*value),
        other => Err(PoaError::Logic(format!(
            "expected a bool value for {name}, but got {other:?}"
        ))),
    }
}

fn int_field(row: &Row, name: &str) -> Option<i64> {
    match row.get(name) {
        Some(Value::Int(value)) => Some(*value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_map_covers_common_types() {
        assert_eq!(lookup_data_type("integer").unwrap(), DataType::Int);
        assert_eq!(lookup_data_type("bigint").unwrap(), DataType::BigInt);
        assert_eq!(
            lookup_data_type("double precision").unwrap(),
            DataType::BigFloat
        );
        assert_eq!(lookup_data_type("numeric").unwrap(), DataType::Decimal);
        assert_eq!(
            lookup_data_type("timestamp with time zone").unwrap(),
            DataType::TimestampTz
        );
        assert_eq!(lookup_data_type("character varying").unwrap(), DataType::Text);
    }

    #[test]
    fn test_type_map_rejects_unsupported() {
        for type_name in ["jsonb", "bytea", "inet", "ARRAY", "USER-DEFINED"] {
            assert!(
                matches!(
                    lookup_data_type(type_name),
                    Err(PoaError::UnsupportedType(_))
                ),
                "{type_name} should be unsupported"
            );
        }
    }

    #[test]
    fn test_fetch_by_key_sql_single_column() {
        let mut row = Row::new();
        row.insert("customer_id".into(), Value::Int(1));
        let key_1 = RowKey::from_row(&row, &["customer_id".to_string()]).unwrap();
        row.insert("customer_id".into(), Value::Int(2));
        let key_2 = RowKey::from_row(&row, &["customer_id".to_string()]).unwrap();

        let sql = build_fetch_by_key_sql(
            Some("sales"),
            "customer",
            &["customer_id".to_string(), "first_name".to_string()],
            &[&key_1, &key_2],
            &[DataType::Int],
        )
        .unwrap();

        assert_eq!(
            sql,
            "WITH keys (\"customer_id\") AS (VALUES ($1::INT), ($2::INT)) \
             SELECT t.\"customer_id\", t.\"first_name\" FROM \"sales\".\"customer\" AS t \
             JOIN keys AS k ON (t.\"customer_id\") IS NOT DISTINCT FROM (k.\"customer_id\")"
        );
    }

    #[test]
    fn test_fetch_by_key_sql_composite_key() {
        let mut row = Row::new();
        row.insert("order_id".into(), Value::Int(1));
        row.insert("item_id".into(), Value::Int(10));
        let key = RowKey::from_row(&row, &["order_id".to_string(), "item_id".to_string()])
            .unwrap();

        let sql = build_fetch_by_key_sql(
            None,
            "order_items",
            &["quantity".to_string()],
            &[&key],
            &[DataType::Int, DataType::Int],
        )
        .unwrap();

        assert!(sql.contains(
            "WITH keys (\"item_id\", \"order_id\") AS (VALUES ($1::INT, $2::INT))"
        ));
        assert!(sql.contains(
            "ON (t.\"item_id\", t.\"order_id\") IS NOT DISTINCT FROM (k.\"item_id\", k.\"order_id\")"
        ));
    }
}
