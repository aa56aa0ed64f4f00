// ABOUTME: Schema cache: pins a source table's shape and pk in the destination warehouse
// ABOUTME: Keyed by (db, schema, table); read before every sync, written on first sight

use crate::audit::ensure_poa_schema;
use crate::config::DbConfig;
use crate::cursor::PgCursor;
use crate::error::{PoaError, Result};
use crate::model::{Column, DataType, Row, Table, Value};

/// The table-definition registry in the destination's poa namespace.
pub struct SchemaCache {
    cur: PgCursor,
}

impl SchemaCache {
    pub async fn connect(db_config: &DbConfig) -> Result<Self> {
        let conn_str = db_config.resolve_connection_string()?;
        let cur = PgCursor::connect(&conn_str).await?;
        ensure_poa_schema(&cur).await?;
        Ok(SchemaCache { cur })
    }

    /// Store (or refresh) a table's columns and ordered primary key.
    pub async fn add_table(&mut self, table: &Table) -> Result<()> {
        let upsert_sql = "INSERT INTO poa.table_def (db_name, schema_name, table_name, pk_cols) \
                          VALUES ($1, $2, $3, $4) \
                          ON CONFLICT (db_name, schema_name, table_name) \
                          DO UPDATE SET pk_cols = EXCLUDED.pk_cols, ts = now() \
                          RETURNING table_def_id";

        let row = self
            .cur
            .fetch_one(
                upsert_sql,
                &[
                    Value::Text(table.db_name.clone()),
                    Value::Text(table.schema_name.clone().unwrap_or_default()),
                    Value::Text(table.table_name.clone()),
                    Value::Text(serde_json::to_string(&table.pk)?),
                ],
            )
            .await?;

        let table_def_id = match row.and_then(|r| r.get("table_def_id").cloned()) {
            Some(Value::Int(id)) => id,
            other => {
                return Err(PoaError::Logic(format!(
                    "add_table returned {other:?} instead of a table_def_id"
                )))
            }
        };

        self.cur
            .execute(
                "DELETE FROM poa.col_def WHERE table_def_id = $1",
                &[Value::Int(table_def_id)],
            )
            .await?;

        let insert_col_sql = "INSERT INTO poa.col_def \
                              (table_def_id, col_name, col_data_type, col_length, \
                               col_precision, col_scale, col_nullable) \
                              VALUES ($1, $2, $3, $4, $5, $6, $7)";

        let param_rows: Vec<Vec<Value>> = table
            .columns
            .iter()
            .map(|col| {
                vec![
                    Value::Int(table_def_id),
                    Value::Text(col.name.clone()),
                    Value::Text(col.data_type.db_name().to_string()),
                    col.length.map_or(Value::Null, Value::Int),
                    col.precision.map_or(Value::Null, Value::Int),
                    col.scale.map_or(Value::Null, Value::Int),
                    Value::Bool(col.nullable),
                ]
            })
            .collect();

        self.cur.execute_many(insert_col_sql, &param_rows).await?;
        Ok(())
    }

    /// The previously stored shape, or `None` when the table was never
    /// cached.
    pub async fn get_table_def(
        &mut self,
        db_name: &str,
        schema_name: Option<&str>,
        table_name: &str,
    ) -> Result<Option<Table>> {
        let def_sql = "SELECT table_def_id, pk_cols FROM poa.table_def \
                       WHERE db_name = $1 AND schema_name = $2 AND table_name = $3";
        let row = self
            .cur
            .fetch_one(
                def_sql,
                &[
                    Value::Text(db_name.to_string()),
                    Value::Text(schema_name.unwrap_or_default().to_string()),
                    Value::Text(table_name.to_string()),
                ],
            )
            .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let table_def_id = match row.get("table_def_id") {
            Some(Value::Int(id)) => *id,
            other => {
                return Err(PoaError::Logic(format!(
                    "table_def_id was {other:?}, which should be impossible"
                )))
            }
        };
        let pk: Vec<String> = match row.get("pk_cols") {
            Some(Value::Text(json)) => serde_json::from_str(json)?,
            other => {
                return Err(PoaError::Logic(format!(
                    "pk_cols was {other:?}, which should be impossible"
                )))
            }
        };

        let cols_sql = "SELECT col_name, col_data_type, col_length, col_precision, \
                        col_scale, col_nullable \
                        FROM poa.col_def WHERE table_def_id = $1 ORDER BY col_name";
        let col_rows = self
            .cur
            .fetch_all(cols_sql, &[Value::Int(table_def_id)])
            .await?;

        let columns = col_rows
            .iter()
            .map(column_from_row)
            .collect::<Result<Vec<_>>>()?;

        let table = Table::new(db_name, schema_name, table_name, pk, columns)?;
        Ok(Some(table))
    }
}

fn column_from_row(row: &Row) -> Result<Column> {
    let name = match row.get("col_name") {
        Some(Value::Text(name)) => name.clone(),
        other => {
            return Err(PoaError::Logic(format!(
                "col_name was {other:?}, which should be impossible"
            )))
        }
    };
    let data_type = match row.get("col_data_type") {
        Some(Value::Text(db_name)) => DataType::from_db_name(db_name)?,
        other => {
            return Err(PoaError::Logic(format!(
                "col_data_type was {other:?}, which should be impossible"
            )))
        }
    };
    let nullable = matches!(row.get("col_nullable"), Some(Value::Bool(true)));

    let int_of = |field: &str| match row.get(field) {
        Some(Value::Int(v)) => Some(*v),
        _ => None,
    };

    Ok(Column::new(
        &name,
        data_type,
        nullable,
        int_of("col_length"),
        int_of("col_precision"),
        int_of("col_scale"),
    ))
}
