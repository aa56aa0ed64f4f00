// ABOUTME: SQL Server source over tiberius
// ABOUTME: information_schema introspection with @Pn placeholders; pk supplied by the caller

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::cursor::MssqlCursor;
use crate::dialect::Dialect;
use crate::error::{PoaError, Result};
use crate::filters::{combine_filters, After};
use crate::model::{Column, DataType, Row, RowKey, Table, Value};
use crate::source::odbc::build_equality_sql;
use crate::source::{
    build_count_sql, build_select_sql, columns_or_all, count_from_row, SrcDs,
};

const DIALECT: Dialect = Dialect::Mssql;

pub struct MsSrcDs {
    cur: MssqlCursor,
    db_name: String,
    schema_name: Option<String>,
    table_name: String,
    pk_cols: Vec<String>,
    after: After,
    table: Option<Table>,
}

impl MsSrcDs {
    pub fn new(
        cur: MssqlCursor,
        db_name: &str,
        schema_name: Option<&str>,
        table_name: &str,
        pk_cols: Vec<String>,
        after: After,
    ) -> Self {
        MsSrcDs {
            cur,
            db_name: db_name.to_string(),
            schema_name: schema_name.map(str::to_string),
            table_name: table_name.to_string(),
            pk_cols,
            after,
            table: None,
        }
    }

    fn schema_or_dbo(&self) -> &str {
        self.schema_name.as_deref().unwrap_or("dbo")
    }
}

#[async_trait]
impl SrcDs for MsSrcDs {
    async fn table_exists(&mut self) -> Result<bool> {
        let sql = "SELECT count(*) AS ct FROM information_schema.tables AS t \
                   WHERE t.table_schema = @P1 AND t.table_name = @P2";
        let row = self
            .cur
            .fetch_one(
                sql,
                &[
                    Value::Text(self.schema_or_dbo().to_string()),
                    Value::Text(self.table_name.clone()),
                ],
            )
            .await?;
        Ok(count_from_row(row)? > 0)
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

        let sql = "SELECT c.column_name, c.data_type, c.is_nullable, \
                   c.character_maximum_length AS max_length, \
                   c.numeric_precision AS precision, c.numeric_scale AS scale \
                   FROM information_schema.columns AS c \
                   WHERE c.table_schema = @P1 AND c.table_name = @P2 \
                   ORDER BY c.ordinal_position";

        let rows = self
            .cur
            .fetch_all(
                sql,
                &[
                    Value::Text(self.schema_or_dbo().to_string()),
                    Value::Text(self.table_name.clone()),
                ],
            )
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            columns.push(column_from_row(row)?);
        }

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
        let first_key = match keys.iter().next() {
            Some(key) => key,
            None => return Ok(Vec::new()),
        };
        let key_cols: Vec<&str> = first_key.columns().collect();

        let table = self.get_table().await?;
        let cols = columns_or_all(col_names, &table);

        let qualified = DIALECT.qualified_table(self.schema_name.as_deref(), &self.table_name);
        let sql = build_equality_sql(DIALECT, &qualified, &cols, &key_cols);

        let mut rows = Vec::new();
        for key in keys {
            let params: Vec<Value> = key.values().cloned().collect();
            rows.extend(self.cur.fetch_all(&sql, &params).await?);
        }
        Ok(rows)
    }
}

fn column_from_row(row: &Row) -> Result<Column> {
    let name = match row.get("column_name") {
        Some(Value::Text(name)) => name.clone(),
        other => {
            return Err(PoaError::Logic(format!(
                "expected a text column_name, but got {other:?}"
            )))
        }
    };
    let type_name = match row.get("data_type") {
        Some(Value::Text(type_name)) => type_name.clone(),
        other => {
            return Err(PoaError::Logic(format!(
                "expected a text data_type, but got {other:?}"
            )))
        }
    };
    let nullable = matches!(row.get("is_nullable"), Some(Value::Text(v)) if v == "YES");

    let int_of = |name: &str| match row.get(name) {
        Some(Value::Int(v)) => Some(*v),
        _ => None,
    };

    Ok(Column::new(
        &name,
        lookup_data_type(&type_name)?,
        nullable,
        int_of("max_length"),
        int_of("precision"),
        int_of("scale"),
    ))
}

/// SQL Server type names mapped into the portable set.
fn lookup_data_type(type_name: &str) -> Result<DataType> {
    let data_type = match type_name {
        "bigint" => DataType::BigInt,
        "bit" => DataType::Bool,
        "char" | "nchar" | "ntext" | "nvarchar" | "text" | "varchar" => DataType::Text,
        "date" => DataType::Date,
        "datetime" | "datetime2" | "smalldatetime" => DataType::Timestamp,
        "datetimeoffset" => DataType::TimestampTz,
        "decimal" | "money" | "numeric" | "smallmoney" => DataType::Decimal,
        "float" => DataType::BigFloat,
        "int" | "smallint" | "tinyint" => DataType::Int,
        "real" => DataType::Float,
        "uniqueidentifier" => DataType::Uuid,
        other => return Err(PoaError::UnsupportedType(other.to_string())),
    };
    Ok(data_type)
}
