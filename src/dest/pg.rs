// ABOUTME: PostgreSQL destination: DDL for the managed layout, staging upsert, soft delete
// ABOUTME: The content hash is md5(row(<non-key columns>)::TEXT), computed server-side

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::cursor::PgCursor;
use crate::dest::DstDs;
use crate::dialect::Dialect;
use crate::error::{PoaError, Result};
use crate::filters::{after_predicate, combine_filters, After};
use crate::model::{CheckResult, Column, DataType, Row, RowKey, Table, Value};

const DIALECT: Dialect = Dialect::Postgres;

/// Which of the three managed tables a DDL statement targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManagedTable {
    Main,
    Staging,
    History,
}

impl ManagedTable {
    fn suffix(self) -> &'static str {
        match self {
            ManagedTable::Main => "",
            ManagedTable::Staging => "_staging",
            ManagedTable::History => "_history",
        }
    }
}

pub struct PgDstDs {
    cur: PgCursor,
    dst_table: Table,
    after: After,
}

impl PgDstDs {
    pub fn new(
        cur: PgCursor,
        dst_db_name: &str,
        dst_schema_name: Option<&str>,
        dst_table_name: &str,
        src_table: &Table,
        after: After,
    ) -> Self {
        // Destination identifiers are always emitted lowercased.
        let dst_schema_name = dst_schema_name.map(str::to_lowercase);
        PgDstDs {
            cur,
            dst_table: src_table.with_identity(
                dst_db_name,
                dst_schema_name.as_deref(),
                &dst_table_name.to_lowercase(),
            ),
            after,
        }
    }

    fn full_name(&self, target: ManagedTable) -> String {
        let table = format!("{}{}", self.dst_table.table_name, target.suffix());
        DIALECT.qualified_table(self.dst_table.schema_name.as_deref(), &table)
    }

    async fn create_managed_table(&mut self, target: ManagedTable) -> Result<()> {
        let sql = build_create_table_sql(&self.dst_table, target);
        self.cur.execute(&sql, &[]).await?;

        for sql in build_control_index_sql(&self.dst_table, target) {
            self.cur.execute(&sql, &[]).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DstDs for PgDstDs {
    async fn table_exists(&mut self) -> Result<bool> {
        let sql = "SELECT EXISTS (SELECT 1 FROM information_schema.tables AS t \
                   WHERE t.table_schema = $1 AND t.table_name = $2) AS tbl_exists";
        let row = self
            .cur
            .fetch_one(
                sql,
                &[
                    Value::Text(
                        self.dst_table
                            .schema_name
                            .clone()
                            .unwrap_or_else(|| "public".to_string()),
                    ),
                    Value::Text(self.dst_table.table_name.clone()),
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

    async fn create(&mut self) -> Result<()> {
        self.create_managed_table(ManagedTable::Main).await
    }

    async fn drop_table(&mut self) -> Result<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", self.full_name(ManagedTable::Main));
        self.cur.execute(&sql, &[]).await?;
        Ok(())
    }

    async fn truncate(&mut self) -> Result<()> {
        let sql = format!("TRUNCATE {}", self.full_name(ManagedTable::Main));
        self.cur.execute(&sql, &[]).await?;
        Ok(())
    }

    async fn create_staging_table(&mut self) -> Result<()> {
        self.create_managed_table(ManagedTable::Staging).await
    }

    async fn create_history_table(&mut self) -> Result<()> {
        self.create_managed_table(ManagedTable::History).await
    }

    async fn add_increasing_col_indices(&mut self, cols: &BTreeSet<String>) -> Result<()> {
        for col in cols {
            let sql = format!(
                "CREATE INDEX IF NOT EXISTS ix_{}_{} ON {} ({} DESC)",
                self.dst_table.table_name.to_lowercase(),
                col.to_lowercase(),
                self.full_name(ManagedTable::Main),
                DIALECT.wrap_lower(col),
            );
            self.cur.execute(&sql, &[]).await?;
        }
        Ok(())
    }

    async fn get_max_values(&mut self, cols: &BTreeSet<String>) -> Result<Option<After>> {
        let mut max_values = After::new();
        for col in cols {
            let sql = format!(
                "SELECT max({}) AS v FROM {} WHERE poa_op <> 'd'",
                DIALECT.wrap_lower(col),
                self.full_name(ManagedTable::Main),
            );
            let row = self.cur.fetch_one(&sql, &[]).await?;
            if let Some(value) = row.and_then(|r| r.get("v").cloned()) {
                if !value.is_null() {
                    max_values.insert(col.to_lowercase(), value);
                }
            }
        }

        if max_values.is_empty() {
            Ok(None)
        } else {
            Ok(Some(max_values))
        }
    }

    async fn get_row_count(&mut self) -> Result<i64> {
        let mut sql = format!(
            "SELECT count(*) AS ct FROM {} WHERE poa_op <> 'd'",
            self.full_name(ManagedTable::Main),
        );
        let mut params = Vec::new();
        if let Some((clause, after_params)) = after_predicate(DIALECT, &self.after, 1) {
            sql.push_str(" AND ");
            sql.push_str(&clause);
            params = after_params;
        }

        let row = self.cur.fetch_one(&sql, &params).await?;
        match row.and_then(|r| r.get("ct").cloned()) {
            Some(Value::Int(ct)) => Ok(ct),
            other => Err(PoaError::Logic(format!(
                "the row count query returned {other:?}"
            ))),
        }
    }

    async fn fetch_rows(
        &mut self,
        col_names: Option<&BTreeSet<String>>,
        after: Option<&After>,
    ) -> Result<Vec<Row>> {
        let cols = match col_names {
            Some(cols) => cols.iter().cloned().collect(),
            None => self.dst_table.column_names(),
        };
        let full_after = combine_filters(Some(&self.after), after);
        let (sql, params) = build_fetch_rows_sql(&self.dst_table, &cols, &full_after);
        self.cur.fetch_all(&sql, &params).await
    }

    async fn add_rows_to_staging(&mut self, rows: &[Row]) -> Result<()> {
        let truncate_sql = format!("TRUNCATE {}", self.full_name(ManagedTable::Staging));
        self.cur.execute(&truncate_sql, &[]).await?;

        if rows.is_empty() {
            return Ok(());
        }

        let sql = build_staging_insert_sql(&self.dst_table);
        let param_rows = rows
            .iter()
            .map(|row| staging_insert_params(&self.dst_table, row))
            .collect::<Result<Vec<_>>>()?;

        self.cur.execute_many(&sql, &param_rows).await?;
        Ok(())
    }

    async fn upsert_rows_from_staging(&mut self) -> Result<u64> {
        let sql = build_upsert_sql(&self.dst_table);
        self.cur.execute(&sql, &[]).await
    }

    async fn delete_rows(&mut self, keys: &BTreeSet<RowKey>) -> Result<u64> {
        let first_key = match keys.iter().next() {
            Some(key) => key,
            None => return Ok(0),
        };
        let key_cols: Vec<String> = first_key.columns().map(str::to_string).collect();

        let sql = build_delete_sql(&self.dst_table, &key_cols);
        let param_rows: Vec<Vec<Value>> = keys
            .iter()
            .map(|key| key.values().cloned().collect())
            .collect();

        self.cur.execute_many(&sql, &param_rows).await
    }

    async fn update_history_table(&mut self) -> Result<()> {
        let sql = build_history_insert_sql(&self.dst_table);
        self.cur.execute(&sql, &[]).await?;
        Ok(())
    }

    async fn add_check_result(&mut self, result: &CheckResult) -> Result<()> {
        let sql = "INSERT INTO poa.check_result (src_db_name, src_schema_name, src_table_name, \
                   dst_db_name, dst_schema_name, dst_table_name, src_rows, dst_rows, \
                   extra_keys, missing_keys, execution_millis) \
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)";

        let params = vec![
            Value::Text(result.src_db_name.clone()),
            result
                .src_schema_name
                .clone()
                .map_or(Value::Null, Value::Text),
            Value::Text(result.src_table_name.clone()),
            Value::Text(result.dst_db_name.clone()),
            result
                .dst_schema_name
                .clone()
                .map_or(Value::Null, Value::Text),
            Value::Text(result.dst_table_name.clone()),
            Value::Int(result.src_rows),
            Value::Int(result.dst_rows),
            Value::Text(keys_to_json(&result.extra_keys)?),
            Value::Text(keys_to_json(&result.missing_keys)?),
            Value::Int(result.execution_millis as i64),
        ];

        self.cur.execute(sql, &params).await?;
        Ok(())
    }
}

/// Render a key set as a JSON array of objects for the check_result table.
fn keys_to_json(keys: &BTreeSet<RowKey>) -> Result<String> {
    let rendered: Vec<serde_json::Map<String, serde_json::Value>> = keys
        .iter()
        .map(|key| {
            key.columns()
                .zip(key.values())
                .map(|(col, val)| {
                    let json_val = match val.render_text() {
                        Some(text) => serde_json::Value::String(text),
                        None => serde_json::Value::Null,
                    };
                    (col.to_string(), json_val)
                })
                .collect()
        })
        .collect();
    Ok(serde_json::to_string(&rendered)?)
}

fn full_table_name(table: &Table, target: ManagedTable) -> String {
    let name = format!("{}{}", table.table_name, target.suffix());
    DIALECT.qualified_table(table.schema_name.as_deref(), &name)
}

/// The DDL type for a column, with `NUMERIC` defaulting to (18, 4) when the
/// source did not report a precision and scale.
fn column_ddl_type(col: &Column) -> String {
    match col.data_type {
        DataType::BigFloat => "DOUBLE PRECISION".to_string(),
        DataType::BigInt => "BIGINT".to_string(),
        DataType::Bool => "BOOL".to_string(),
        DataType::Date => "DATE".to_string(),
        DataType::Decimal => format!(
            "NUMERIC({}, {})",
            col.precision.unwrap_or(18),
            col.scale.unwrap_or(4)
        ),
        DataType::Float => "FLOAT".to_string(),
        DataType::Int => "INT".to_string(),
        DataType::Text => "TEXT".to_string(),
        DataType::Timestamp => "TIMESTAMP".to_string(),
        DataType::TimestampTz => "TIMESTAMPTZ".to_string(),
        DataType::Uuid => "UUID".to_string(),
    }
}

/// A parameter cast for the md5 hash expression, so the server hashes the
/// canonical typed rendering rather than raw parameter text.
fn column_cast_type(col: &Column) -> &'static str {
    match col.data_type {
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

fn column_definition(col: &Column) -> String {
    let nullable = if col.nullable { "NULL" } else { "NOT NULL" };
    format!(
        "{} {} {nullable}",
        DIALECT.wrap_lower(&col.name),
        column_ddl_type(col)
    )
}

fn build_create_table_sql(table: &Table, target: ManagedTable) -> String {
    let if_not_exists = match target {
        ManagedTable::Main => "",
        ManagedTable::Staging | ManagedTable::History => "IF NOT EXISTS ",
    };

    let mut pk_csv = table
        .pk
        .iter()
        .map(|c| DIALECT.wrap_lower(c))
        .collect::<Vec<_>>()
        .join(", ");
    // Staging and history key snapshots, not rows, so the write timestamp
    // joins the key.
    if target != ManagedTable::Main {
        pk_csv.push_str(", poa_ts");
    }

    let col_defs = table
        .columns
        .iter()
        .map(column_definition)
        .collect::<Vec<_>>()
        .join("\n, ");

    format!(
        "CREATE TABLE {if_not_exists}{name} (\n  {col_defs}\
         \n, poa_hd CHAR(32) NOT NULL\
         \n, poa_op CHAR(1) NOT NULL CHECK (poa_op IN ('a', 'd', 'u'))\
         \n, poa_ts TIMESTAMPTZ(3) NOT NULL DEFAULT now()\
         \n, PRIMARY KEY ({pk_csv})\n)",
        name = full_table_name(table, target),
    )
}

fn build_control_index_sql(table: &Table, target: ManagedTable) -> Vec<String> {
    let if_not_exists = match target {
        ManagedTable::Main => "",
        ManagedTable::Staging | ManagedTable::History => "IF NOT EXISTS ",
    };
    let table_part = format!(
        "{}{}",
        table.table_name.to_lowercase(),
        target.suffix()
    );
    let full_name = full_table_name(table, target);

    vec![
        format!(
            "CREATE INDEX {if_not_exists}ix_{table_part}_poa_ts ON {full_name} (poa_ts DESC)"
        ),
        format!("CREATE INDEX {if_not_exists}ix_{table_part}_poa_op ON {full_name} (poa_op)"),
    ]
}

/// Insert one row into staging with `poa_op = 'a'` and the content hash of
/// the non-key columns. The hash parameters are cast so the rendering the
/// server hashes is the typed one; null and empty string stay distinct in
/// `row(...)::TEXT`.
fn build_staging_insert_sql(table: &Table) -> String {
    let col_names = table.column_names();
    let hd_cols: Vec<&Column> = table
        .columns
        .iter()
        .filter(|c| !table.pk.contains(&c.name))
        .collect();

    let col_csv = col_names
        .iter()
        .map(|c| DIALECT.wrap_lower(c))
        .collect::<Vec<_>>()
        .join(", ");

    let col_placeholders = (1..=col_names.len())
        .map(|n| DIALECT.placeholder(n))
        .collect::<Vec<_>>()
        .join(", ");

    // All columns in the key means there is no content to hash.
    let hd_expr = if hd_cols.is_empty() {
        "md5('')".to_string()
    } else {
        let hd_placeholders = hd_cols
            .iter()
            .enumerate()
            .map(|(i, col)| {
                format!(
                    "{}::{}",
                    DIALECT.placeholder(col_names.len() + i + 1),
                    column_cast_type(col)
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("md5(row({hd_placeholders})::TEXT)")
    };

    format!(
        "INSERT INTO {name} ({col_csv}, poa_op, poa_hd) \
         VALUES ({col_placeholders}, 'a', {hd_expr}) \
         ON CONFLICT DO NOTHING",
        name = full_table_name(table, ManagedTable::Staging),
    )
}

fn staging_insert_params(table: &Table, row: &Row) -> Result<Vec<Value>> {
    let mut params = Vec::with_capacity(table.columns.len() * 2);
    for col in table.column_names() {
        params.push(row_value(row, &col)?);
    }
    for col in table.non_pk_column_names() {
        params.push(row_value(row, &col)?);
    }
    Ok(params)
}

fn row_value(row: &Row, col: &str) -> Result<Value> {
    row.get(col).cloned().ok_or_else(|| {
        PoaError::Logic(format!("row is missing the column, {col}"))
    })
}

/// Merge staging into main. The update only fires when the content hash
/// changed or the row was soft-deleted, which makes re-runs of an unchanged
/// load mutate nothing.
fn build_upsert_sql(table: &Table) -> String {
    let col_names = table.column_names();
    let all_cols: Vec<String> = col_names
        .iter()
        .map(|c| DIALECT.wrap_lower(c))
        .chain(["poa_hd".to_string(), "poa_op".to_string(), "poa_ts".to_string()])
        .collect();

    let col_csv = all_cols.join(", ");
    let stg_col_csv = all_cols
        .iter()
        .map(|c| format!("stg.{c}"))
        .collect::<Vec<_>>()
        .join(", ");

    let pk_csv = table
        .pk
        .iter()
        .map(|c| DIALECT.wrap_lower(c))
        .collect::<Vec<_>>()
        .join(", ");

    let set_csv = col_names
        .iter()
        .filter(|c| !table.pk.contains(*c))
        .map(|c| {
            let wrapped = DIALECT.wrap_lower(c);
            format!("{wrapped} = EXCLUDED.{wrapped}")
        })
        .chain([
            "poa_hd = EXCLUDED.poa_hd".to_string(),
            "poa_op = 'u'".to_string(),
            "poa_ts = now()".to_string(),
        ])
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {name} AS dst ({col_csv}) \
         SELECT {stg_col_csv} FROM {staging} AS stg \
         ON CONFLICT ({pk_csv}) DO UPDATE SET {set_csv} \
         WHERE dst.poa_hd <> EXCLUDED.poa_hd OR dst.poa_op = 'd'",
        name = full_table_name(table, ManagedTable::Main),
        staging = full_table_name(table, ManagedTable::Staging),
    )
}

fn build_delete_sql(table: &Table, key_cols: &[String]) -> String {
    let key_match = key_cols
        .iter()
        .enumerate()
        .map(|(n, c)| format!("{} = {}", DIALECT.wrap_lower(c), DIALECT.placeholder(n + 1)))
        .collect::<Vec<_>>()
        .join(" AND ");

    format!(
        "UPDATE {name} SET poa_op = 'd', poa_ts = now() \
         WHERE {key_match} AND poa_op <> 'd'",
        name = full_table_name(table, ManagedTable::Main),
    )
}

fn build_history_insert_sql(table: &Table) -> String {
    let all_cols: Vec<String> = table
        .column_names()
        .iter()
        .map(|c| DIALECT.wrap_lower(c))
        .chain(["poa_hd".to_string(), "poa_op".to_string(), "poa_ts".to_string()])
        .collect();

    let col_csv = all_cols.join(", ");
    let select_csv = all_cols
        .iter()
        .map(|c| format!("d.{c}"))
        .collect::<Vec<_>>()
        .join(", ");

    let keys_match = table
        .pk
        .iter()
        .map(|c| DIALECT.wrap_lower(c))
        .chain(["poa_ts".to_string()])
        .map(|c| format!("d.{c} = h.{c}"))
        .collect::<Vec<_>>()
        .join(" AND ");

    format!(
        "INSERT INTO {history} ({col_csv}) \
         SELECT {select_csv} FROM {main} AS d \
         WHERE NOT EXISTS (SELECT 1 FROM {history} AS h WHERE {keys_match})",
        history = full_table_name(table, ManagedTable::History),
        main = full_table_name(table, ManagedTable::Main),
    )
}

fn build_fetch_rows_sql(table: &Table, cols: &[String], after: &After) -> (String, Vec<Value>) {
    let col_csv = cols
        .iter()
        .map(|c| DIALECT.wrap_lower(c))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "SELECT {col_csv} FROM {name} WHERE poa_op <> 'd'",
        name = full_table_name(table, ManagedTable::Main),
    );

    match after_predicate(DIALECT, after, 1) {
        Some((clause, params)) => {
            sql.push_str(" AND ");
            sql.push_str(&clause);
            (sql, params)
        }
        None => (sql, Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::query_errors;
    use chrono::NaiveDate;

    fn customer_table() -> Table {
        Table::new(
            "dw",
            Some("sales"),
            "customer",
            vec!["customer_id".to_string()],
            vec![
                Column::new("customer_id", DataType::Int, false, None, None, None),
                Column::new("first_name", DataType::Text, false, None, None, None),
                Column::new("purchases", DataType::Decimal, true, None, None, None),
                Column::new("date_added", DataType::TimestampTz, false, None, None, None),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_create_table_sql_managed_layout() {
        let sql = build_create_table_sql(&customer_table(), ManagedTable::Main);

        assert!(sql.starts_with("CREATE TABLE \"sales\".\"customer\" ("));
        assert!(sql.contains("\"customer_id\" INT NOT NULL"));
        assert!(sql.contains("\"first_name\" TEXT NOT NULL"));
        assert!(sql.contains("\"purchases\" NUMERIC(18, 4) NULL"));
        assert!(sql.contains("\"date_added\" TIMESTAMPTZ NOT NULL"));
        assert!(sql.contains("poa_hd CHAR(32) NOT NULL"));
        assert!(sql.contains("poa_op CHAR(1) NOT NULL CHECK (poa_op IN ('a', 'd', 'u'))"));
        assert!(sql.contains("poa_ts TIMESTAMPTZ(3) NOT NULL DEFAULT now()"));
        assert!(sql.contains("PRIMARY KEY (\"customer_id\")"));
        assert!(!sql.contains("IF NOT EXISTS"));
    }

    #[test]
    fn test_decimal_precision_carried_through() {
        let table = Table::new(
            "dw",
            None,
            "orders",
            vec!["order_id".to_string()],
            vec![
                Column::new("order_id", DataType::Int, false, None, None, None),
                Column::new("total", DataType::Decimal, false, None, Some(12), Some(2)),
            ],
        )
        .unwrap();
        let sql = build_create_table_sql(&table, ManagedTable::Main);
        assert!(sql.contains("\"total\" NUMERIC(12, 2) NOT NULL"));
    }

    #[test]
    fn test_staging_and_history_key_on_poa_ts() {
        let staging = build_create_table_sql(&customer_table(), ManagedTable::Staging);
        assert!(staging.starts_with("CREATE TABLE IF NOT EXISTS \"sales\".\"customer_staging\""));
        assert!(staging.contains("PRIMARY KEY (\"customer_id\", poa_ts)"));

        let history = build_create_table_sql(&customer_table(), ManagedTable::History);
        assert!(history.starts_with("CREATE TABLE IF NOT EXISTS \"sales\".\"customer_history\""));
        assert!(history.contains("PRIMARY KEY (\"customer_id\", poa_ts)"));
    }

    #[test]
    fn test_control_index_sql() {
        let indices = build_control_index_sql(&customer_table(), ManagedTable::Main);
        assert_eq!(
            indices[0],
            "CREATE INDEX ix_customer_poa_ts ON \"sales\".\"customer\" (poa_ts DESC)"
        );
        assert_eq!(
            indices[1],
            "CREATE INDEX ix_customer_poa_op ON \"sales\".\"customer\" (poa_op)"
        );

        let staging = build_control_index_sql(&customer_table(), ManagedTable::Staging);
        assert!(staging[0].contains("IF NOT EXISTS ix_customer_staging_poa_ts"));
    }

    #[test]
    fn test_staging_insert_sql() {
        let sql = build_staging_insert_sql(&customer_table());
        assert_eq!(
            sql,
            "INSERT INTO \"sales\".\"customer_staging\" \
             (\"customer_id\", \"date_added\", \"first_name\", \"purchases\", poa_op, poa_hd) \
             VALUES ($1, $2, $3, $4, 'a', \
             md5(row($5::TIMESTAMPTZ, $6::TEXT, $7::NUMERIC)::TEXT)) \
             ON CONFLICT DO NOTHING"
        );
    }

    #[test]
    fn test_staging_insert_params_order_matches_sql() {
        let table = customer_table();
        let mut row = Row::new();
        row.insert("customer_id".into(), Value::Int(1));
        row.insert("first_name".into(), Value::Text("Steve".into()));
        row.insert("purchases".into(), Value::Null);
        row.insert(
            "date_added".into(),
            Value::Date(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()),
        );

        let params = staging_insert_params(&table, &row).unwrap();
        // Four column values, then the three non-key values for the hash.
        assert_eq!(params.len(), 7);
        assert_eq!(params[0], Value::Int(1));
        assert_eq!(params[2], Value::Text("Steve".into()));
        assert_eq!(params[5], Value::Text("Steve".into()));

        let mut incomplete = row.clone();
        incomplete.remove("purchases");
        assert!(staging_insert_params(&table, &incomplete).is_err());
    }

    #[test]
    fn test_upsert_sql_is_idempotent_on_unchanged_content() {
        let sql = build_upsert_sql(&customer_table());

        assert!(sql.starts_with("INSERT INTO \"sales\".\"customer\" AS dst ("));
        assert!(sql.contains("SELECT stg.\"customer_id\""));
        assert!(sql.contains("FROM \"sales\".\"customer_staging\" AS stg"));
        assert!(sql.contains("ON CONFLICT (\"customer_id\") DO UPDATE SET"));
        assert!(sql.contains("\"first_name\" = EXCLUDED.\"first_name\""));
        assert!(!sql.contains("\"customer_id\" = EXCLUDED"));
        assert!(sql.contains("poa_hd = EXCLUDED.poa_hd"));
        assert!(sql.contains("poa_op = 'u'"));
        assert!(sql.ends_with("WHERE dst.poa_hd <> EXCLUDED.poa_hd OR dst.poa_op = 'd'"));
    }

    #[test]
    fn test_delete_sql_is_a_soft_delete() {
        let sql = build_delete_sql(&customer_table(), &["customer_id".to_string()]);
        assert_eq!(
            sql,
            "UPDATE \"sales\".\"customer\" SET poa_op = 'd', poa_ts = now() \
             WHERE \"customer_id\" = $1 AND poa_op <> 'd'"
        );
        assert!(!sql.contains("DELETE"));
    }

    #[test]
    fn test_history_insert_sql_appends_novel_snapshots() {
        let sql = build_history_insert_sql(&customer_table());
        assert!(sql.contains("INSERT INTO \"sales\".\"customer_history\""));
        assert!(sql.contains("FROM \"sales\".\"customer\" AS d"));
        assert!(sql.contains(
            "WHERE NOT EXISTS (SELECT 1 FROM \"sales\".\"customer_history\" AS h \
             WHERE d.\"customer_id\" = h.\"customer_id\" AND d.poa_ts = h.poa_ts)"
        ));
    }

    #[test]
    fn test_fetch_rows_sql_excludes_soft_deleted() {
        let (sql, params) = build_fetch_rows_sql(
            &customer_table(),
            &["customer_id".to_string(), "first_name".to_string()],
            &After::new(),
        );
        assert_eq!(
            sql,
            "SELECT \"customer_id\", \"first_name\" FROM \"sales\".\"customer\" \
             WHERE poa_op <> 'd'"
        );
        assert!(params.is_empty());
    }

    #[test]
    fn test_fetch_rows_sql_with_after() {
        let after = After::from([(
            "date_added".to_string(),
            Value::Date(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()),
        )]);
        let (sql, params) =
            build_fetch_rows_sql(&customer_table(), &["customer_id".to_string()], &after);
        assert_eq!(
            sql,
            "SELECT \"customer_id\" FROM \"sales\".\"customer\" \
             WHERE poa_op <> 'd' AND (\"date_added\" > $1)"
        );
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_all_generated_sql_passes_the_guard() {
        let table = customer_table();
        let statements = vec![
            build_create_table_sql(&table, ManagedTable::Main),
            build_create_table_sql(&table, ManagedTable::Staging),
            build_create_table_sql(&table, ManagedTable::History),
            build_staging_insert_sql(&table),
            build_upsert_sql(&table),
            build_delete_sql(&table, &["customer_id".to_string()]),
            build_history_insert_sql(&table),
            build_fetch_rows_sql(&table, &["customer_id".to_string()], &After::new()).0,
        ];
        for sql in statements
            .into_iter()
            .chain(build_control_index_sql(&table, ManagedTable::Main))
        {
            assert!(query_errors(&sql, &[]).is_empty(), "guard refused: {sql}");
        }
    }

    #[test]
    fn test_keys_to_json() {
        let mut row = Row::new();
        row.insert("customer_id".into(), Value::Int(3));
        let key = RowKey::from_row(&row, &["customer_id".to_string()]).unwrap();
        let json = keys_to_json(&BTreeSet::from([key])).unwrap();
        assert_eq!(json, "[{\"customer_id\":\"3\"}]");
    }
}
