// ABOUTME: SQL Server cursor over tiberius
// ABOUTME: Decodes result rows into portable values by the cell's wire representation

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use tiberius::{ColumnData, FromSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::cursor::check_query;
use crate::error::{PoaError, Result};
use crate::model::{Row, Value};

/// One SQL Server session.
pub struct MssqlCursor {
    client: tiberius::Client<Compat<TcpStream>>,
}

impl MssqlCursor {
    /// Connect from an ADO-style connection string
    /// (`Server=tcp:host,1433;Database=...;User Id=...;Password=...`).
    pub async fn connect(conn_str: &str) -> Result<Self> {
        let config = tiberius::Config::from_ado_string(conn_str)
            .map_err(|e| PoaError::Connection(e.to_string()))?;

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| PoaError::Connection(e.to_string()))?;
        tcp.set_nodelay(true)
            .map_err(|e| PoaError::Connection(e.to_string()))?;

        let client = tiberius::Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| PoaError::Connection(e.to_string()))?;

        Ok(MssqlCursor { client })
    }

    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        check_query(sql, params)?;
        let refs = param_refs(params);
        let result = self.client.execute(sql, &refs).await?;
        Ok(result.total())
    }

    pub async fn execute_many(&mut self, sql: &str, param_rows: &[Vec<Value>]) -> Result<u64> {
        check_query(sql, &[])?;
        let mut affected = 0;
        for params in param_rows {
            check_query("", params)?;
            let refs = param_refs(params);
            affected += self.client.execute(sql, &refs).await?.total();
        }
        Ok(affected)
    }

    pub async fn fetch_one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }

    pub async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        check_query(sql, params)?;
        let refs = param_refs(params);
        let stream = self.client.query(sql, &refs).await?;
        let rows = stream.into_first_result().await?;
        rows.iter().map(decode_row).collect()
    }
}

fn param_refs<'a>(params: &'a [Value]) -> Vec<&'a dyn tiberius::ToSql> {
    params.iter().map(|p| p as &dyn tiberius::ToSql).collect()
}

fn decode_row(row: &tiberius::Row) -> Result<Row> {
    let mut out = Row::new();
    for (column, data) in row.cells() {
        out.insert(column.name().to_lowercase(), decode_cell(data)?);
    }
    Ok(out)
}

fn decode_cell(data: &ColumnData<'static>) -> Result<Value> {
    let value = match data {
        ColumnData::Bit(v) => v.map_or(Value::Null, Value::Bool),
        ColumnData::U8(v) => v.map_or(Value::Null, |x| Value::Int(x as i64)),
        ColumnData::I16(v) => v.map_or(Value::Null, |x| Value::Int(x as i64)),
        ColumnData::I32(v) => v.map_or(Value::Null, |x| Value::Int(x as i64)),
        ColumnData::I64(v) => v.map_or(Value::Null, Value::Int),
        ColumnData::F32(v) => v.map_or(Value::Null, |x| Value::Float(x as f64)),
        ColumnData::F64(v) => v.map_or(Value::Null, Value::Float),
        ColumnData::String(v) => v
            .as_ref()
            .map_or(Value::Null, |s| Value::Text(s.to_string())),
        ColumnData::Guid(v) => v.map_or(Value::Null, Value::Uuid),
        ColumnData::Numeric(_) => {
            Decimal::from_sql(data)?.map_or(Value::Null, Value::Decimal)
        }
        ColumnData::Date(_) => NaiveDate::from_sql(data)?.map_or(Value::Null, Value::Date),
        ColumnData::DateTime(_) | ColumnData::DateTime2(_) | ColumnData::SmallDateTime(_) => {
            NaiveDateTime::from_sql(data)?.map_or(Value::Null, Value::Timestamp)
        }
        ColumnData::DateTimeOffset(_) => DateTime::<Utc>::from_sql(data)?
            .map_or(Value::Null, Value::TimestampTz),
        other => {
            return Err(PoaError::UnsupportedType(format!("{other:?}")));
        }
    };
    Ok(value)
}
