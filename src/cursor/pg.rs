// ABOUTME: PostgreSQL cursor over tokio-postgres with TLS support
// ABOUTME: Decodes result rows into portable values by the column's wire type

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::{ToSql, Type};
use uuid::Uuid;

use crate::cursor::check_query;
use crate::error::{PoaError, Result};
use crate::model::{Row, Value};

/// One PostgreSQL session.
///
/// The connection driver runs on a spawned task that winds down when the
/// cursor is dropped, so sessions never outlive the invocation.
pub struct PgCursor {
    client: tokio_postgres::Client,
    driver: tokio::task::JoinHandle<()>,
}

impl PgCursor {
    pub async fn connect(conn_str: &str) -> Result<Self> {
        let connector = native_tls::TlsConnector::builder()
            .build()
            .map_err(|e| PoaError::Connection(e.to_string()))?;
        let tls = postgres_native_tls::MakeTlsConnector::new(connector);

        let (client, connection) = tokio_postgres::connect(conn_str, tls)
            .await
            .map_err(|e| PoaError::Connection(e.to_string()))?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("postgres connection error: {}", e);
            }
        });

        Ok(PgCursor { client, driver })
    }

    /// Session limits applied to destination connections: a transaction may
    /// not sit idle past 15 minutes, and no lock wait may exceed 5.
    pub async fn apply_session_limits(&self) -> Result<()> {
        self.execute("SET idle_in_transaction_session_timeout = '15min'", &[])
            .await?;
        self.execute("SET lock_timeout = '5min'", &[]).await?;
        Ok(())
    }

    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        check_query(sql, params)?;
        let refs = param_refs(params);
        Ok(self.client.execute(sql, &refs).await?)
    }

    /// Run the same statement once per parameter row, prepared up front.
    pub async fn execute_many(&self, sql: &str, param_rows: &[Vec<Value>]) -> Result<u64> {
        check_query(sql, &[])?;
        let statement = self.client.prepare(sql).await?;
        let mut affected = 0;
        for params in param_rows {
            check_query("", params)?;
            let refs = param_refs(params);
            affected += self.client.execute(&statement, &refs).await?;
        }
        Ok(affected)
    }

    pub async fn fetch_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        check_query(sql, params)?;
        let refs = param_refs(params);
        match self.client.query_opt(sql, &refs).await? {
            Some(row) => Ok(Some(decode_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        check_query(sql, params)?;
        let refs = param_refs(params);
        let rows = self.client.query(sql, &refs).await?;
        rows.iter().map(decode_row).collect()
    }
}

impl Drop for PgCursor {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

fn param_refs<'a>(params: &'a [Value]) -> Vec<&'a (dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

fn decode_row(row: &tokio_postgres::Row) -> Result<Row> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_lowercase(), decode_cell(row, idx)?);
    }
    Ok(out)
}

fn decode_cell(row: &tokio_postgres::Row, idx: usize) -> Result<Value> {
    let ty = row.columns()[idx].type_();

    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?.map_or(Value::Null, Value::Bool)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?
            .map_or(Value::Null, |v| Value::Int(v as i64))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?
            .map_or(Value::Null, |v| Value::Int(v as i64))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.map_or(Value::Null, Value::Int)
    } else if *ty == Type::OID {
        row.try_get::<_, Option<u32>>(idx)?
            .map_or(Value::Null, |v| Value::Int(v as i64))
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?
            .map_or(Value::Null, |v| Value::Float(v as f64))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.map_or(Value::Null, Value::Float)
    } else if *ty == Type::NUMERIC {
        row.try_get::<_, Option<Decimal>>(idx)?
            .map_or(Value::Null, Value::Decimal)
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
    {
        row.try_get::<_, Option<String>>(idx)?.map_or(Value::Null, Value::Text)
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<NaiveDate>>(idx)?
            .map_or(Value::Null, Value::Date)
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(idx)?
            .map_or(Value::Null, Value::Timestamp)
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map_or(Value::Null, Value::TimestampTz)
    } else if *ty == Type::UUID {
        row.try_get::<_, Option<Uuid>>(idx)?
            .map_or(Value::Null, Value::Uuid)
    } else {
        return Err(PoaError::UnsupportedType(ty.name().to_string()));
    };

    Ok(value)
}
