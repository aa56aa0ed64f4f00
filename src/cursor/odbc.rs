// ABOUTME: ODBC cursor for the HH dialect and generic ODBC sources
// ABOUTME: Synchronous driver calls from the async engine; values decoded from text buffers

use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use odbc_api::buffers::TextRowSet;
use odbc_api::{
    ColumnDescription, ConnectionOptions, Cursor, Environment, IntoParameter, Nullability,
    ResultSetMetadata,
};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::cursor::check_query;
use crate::error::{PoaError, Result};
use crate::model::{Column, DataType, Row, Value};

/// Rows fetched per driver round-trip.
const FETCH_BATCH_SIZE: usize = 1_000;

/// Upper bound on any single text cell. Cells past this are truncated by
/// the driver, which the decoder treats as an error-free best effort.
const MAX_TEXT_BYTES: usize = 32_768;

fn environment() -> Result<&'static Environment> {
    static ENV: OnceLock<Environment> = OnceLock::new();
    if let Some(env) = ENV.get() {
        return Ok(env);
    }
    let env = Environment::new().map_err(|e| PoaError::Connection(e.to_string()))?;
    Ok(ENV.get_or_init(|| env))
}

/// One ODBC session.
///
/// ODBC drivers are synchronous, so every call here blocks the calling
/// task for the duration of the round-trip; the engine is sequential, so
/// nothing else is waiting on the executor.
pub struct OdbcCursor {
    conn: odbc_api::Connection<'static>,
}

impl OdbcCursor {
    pub fn connect(conn_str: &str) -> Result<Self> {
        let env = environment()?;
        let conn = env
            .connect_with_connection_string(conn_str, ConnectionOptions::default())
            .map_err(|e| PoaError::Connection(e.to_string()))?;
        Ok(OdbcCursor { conn })
    }

    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<()> {
        check_query(sql, params)?;
        let odbc_params = to_odbc_params(params);
        self.conn.execute(sql, &odbc_params[..])?;
        Ok(())
    }

    pub fn execute_many(&self, sql: &str, param_rows: &[Vec<Value>]) -> Result<()> {
        check_query(sql, &[])?;
        let mut prepared = self.conn.prepare(sql)?;
        for params in param_rows {
            check_query("", params)?;
            let odbc_params = to_odbc_params(params);
            prepared.execute(&odbc_params[..])?;
        }
        Ok(())
    }

    pub fn fetch_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.fetch_all(sql, params)?.into_iter().next())
    }

    pub fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        check_query(sql, params)?;
        let odbc_params = to_odbc_params(params);
        match self.conn.execute(sql, &odbc_params[..])? {
            Some(cursor) => read_rows(cursor),
            None => Ok(Vec::new()),
        }
    }

    /// Probe the driver's table catalog for the table.
    pub fn table_exists(&self, schema_name: Option<&str>, table_name: &str) -> Result<bool> {
        let mut cursor = self
            .conn
            .tables("", schema_name.unwrap_or(""), table_name, "")?;
        let mut buffers = TextRowSet::for_cursor(1, &mut cursor, Some(1_024))?;
        let mut row_set = cursor.bind_buffer(&mut buffers)?;
        let found = match row_set.fetch()? {
            Some(batch) => batch.num_rows() > 0,
            None => false,
        };
        Ok(found)
    }

    /// Describe the shape of a query's result set without fetching rows.
    /// Sources use this with a zero-row probe to introspect a table.
    pub fn describe_columns(&self, sql: &str) -> Result<Vec<Column>> {
        check_query(sql, &[])?;
        let mut cursor = match self.conn.execute(sql, ())? {
            Some(cursor) => cursor,
            None => {
                return Err(PoaError::Logic(format!(
                    "the probe query returned no result set: {sql}"
                )))
            }
        };

        let col_count = cursor.num_result_cols()? as u16;
        let mut columns = Vec::with_capacity(col_count as usize);
        for i in 1..=col_count {
            let mut description = ColumnDescription::default();
            cursor.describe_col(i, &mut description)?;
            let name = description
                .name_to_string()
                .map_err(|e| PoaError::Io(format!("column name is not utf-16: {e}")))?
                .to_lowercase();
            let data_type = data_type_from_odbc(description.data_type)?;
            let nullable = !matches!(description.nullability, Nullability::NoNulls);
            columns.push(Column::new(&name, data_type, nullable, None, None, None));
        }
        Ok(columns)
    }
}

/// Every parameter crosses the wire as text; ODBC drivers coerce to the
/// target type. NULL is a null VARCHAR.
fn to_odbc_params(params: &[Value]) -> Vec<Box<dyn odbc_api::parameter::InputParameter>> {
    params
        .iter()
        .map(
            |value| -> Box<dyn odbc_api::parameter::InputParameter> {
                match value.render_text() {
                    Some(text) => Box::new(text.into_parameter()),
                    None => Box::new(None::<String>.into_parameter()),
                }
            },
        )
        .collect()
}

fn read_rows(mut cursor: impl Cursor) -> Result<Vec<Row>> {
    let col_count = cursor.num_result_cols()? as u16;
    let mut names = Vec::with_capacity(col_count as usize);
    let mut types = Vec::with_capacity(col_count as usize);
    for i in 1..=col_count {
        let mut description = ColumnDescription::default();
        cursor.describe_col(i, &mut description)?;
        let name = description
            .name_to_string()
            .map_err(|e| PoaError::Io(format!("column name is not utf-16: {e}")))?
            .to_lowercase();
        names.push(name);
        types.push(data_type_from_odbc(description.data_type)?);
    }

    let mut buffers = TextRowSet::for_cursor(FETCH_BATCH_SIZE, &mut cursor, Some(MAX_TEXT_BYTES))?;
    let mut row_set = cursor.bind_buffer(&mut buffers)?;

    let mut rows = Vec::new();
    while let Some(batch) = row_set.fetch()? {
        for row_index in 0..batch.num_rows() {
            let mut row = Row::new();
            for (col_index, name) in names.iter().enumerate() {
                let cell = batch.at(col_index, row_index);
                row.insert(name.clone(), decode_cell(cell, types[col_index])?);
            }
            rows.push(row);
        }
    }
    Ok(rows)
}

fn data_type_from_odbc(data_type: odbc_api::DataType) -> Result<DataType> {
    use odbc_api::DataType as Odbc;
    let mapped = match data_type {
        Odbc::TinyInt | Odbc::SmallInt | Odbc::Integer => DataType::Int,
        Odbc::BigInt => DataType::BigInt,
        Odbc::Real => DataType::Float,
        Odbc::Float { .. } | Odbc::Double => DataType::BigFloat,
        Odbc::Numeric { .. } | Odbc::Decimal { .. } => DataType::Decimal,
        Odbc::Bit => DataType::Bool,
        Odbc::Char { .. }
        | Odbc::WChar { .. }
        | Odbc::Varchar { .. }
        | Odbc::WVarchar { .. }
        | Odbc::LongVarchar { .. } => DataType::Text,
        Odbc::Date => DataType::Date,
        Odbc::Timestamp { .. } => DataType::Timestamp,
        other => {
            return Err(PoaError::UnsupportedType(format!("{other:?}")));
        }
    };
    Ok(mapped)
}

fn decode_cell(cell: Option<&[u8]>, data_type: DataType) -> Result<Value> {
    let bytes = match cell {
        None => return Ok(Value::Null),
        Some(bytes) => bytes,
    };
    let text = String::from_utf8_lossy(bytes);

    let value = match data_type {
        DataType::Bool => match text.as_ref() {
            "1" | "true" => Value::Bool(true),
            "0" | "false" => Value::Bool(false),
            other => {
                return Err(PoaError::Io(format!(
                    "expected a boolean cell, but got {other:?}"
                )))
            }
        },
        DataType::Int | DataType::BigInt => Value::Int(parse_cell(&text, "an integer")?),
        DataType::Float | DataType::BigFloat => Value::Float(parse_cell(&text, "a float")?),
        DataType::Decimal => Value::Decimal(
            Decimal::from_str(text.trim())
                .map_err(|_| PoaError::Io(format!("expected a decimal cell, but got {text:?}")))?,
        ),
        DataType::Text => Value::Text(text.into_owned()),
        DataType::Date => Value::Date(
            NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
                .map_err(|_| PoaError::Io(format!("expected a date cell, but got {text:?}")))?,
        ),
        DataType::Timestamp => Value::Timestamp(parse_timestamp(text.trim())?),
        DataType::TimestampTz => {
            let trimmed = text.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
                Value::TimestampTz(ts.with_timezone(&Utc))
            } else if let Ok(ts) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f%#z") {
                Value::TimestampTz(ts.with_timezone(&Utc))
            } else {
                // Drivers commonly render timestamptz without an offset.
                Value::TimestampTz(DateTime::<Utc>::from_naive_utc_and_offset(
                    parse_timestamp(trimmed)?,
                    Utc,
                ))
            }
        }
        DataType::Uuid => Value::Uuid(
            Uuid::parse_str(text.trim())
                .map_err(|_| PoaError::Io(format!("expected a uuid cell, but got {text:?}")))?,
        ),
    };
    Ok(value)
}

fn parse_cell<T: FromStr>(text: &str, expected: &str) -> Result<T> {
    text.trim()
        .parse()
        .map_err(|_| PoaError::Io(format!("expected {expected} cell, but got {text:?}")))
}

fn parse_timestamp(text: &str) -> Result<NaiveDateTime> {
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(ts);
        }
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Ok(date.and_time(NaiveTime::MIN));
        }
    }
    Err(PoaError::Io(format!(
        "expected a timestamp cell, but got {text:?}"
    )))
}
