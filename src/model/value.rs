// ABOUTME: Scalar value type flowing between dialect adapters and the diff engine
// ABOUTME: Hashable, orderable, and encodable as a postgres or mssql parameter

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{PoaError, Result};

/// A single scalar cell value.
///
/// Adapters normalize driver rows into this type at the boundary, so the
/// diff engine never sees driver-specific row objects. Equality is
/// structural within a variant; floats compare and hash by bit pattern so
/// the type can key hash maps.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(Uuid),
}

/// A row keyed by lowercased column name.
pub type Row = BTreeMap<String, Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Canonical text rendering, used for ODBC parameters and diagnostics.
    /// `None` for SQL NULL.
    pub fn render_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(v) => Some(if *v { "true".into() } else { "false".into() }),
            Value::Int(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Decimal(v) => Some(v.to_string()),
            Value::Text(v) => Some(v.clone()),
            Value::Date(v) => Some(v.format("%Y-%m-%d").to_string()),
            Value::Timestamp(v) => Some(v.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            Value::TimestampTz(v) => Some(v.to_rfc3339()),
            Value::Uuid(v) => Some(v.to_string()),
        }
    }

    /// Coerce a temporal value to a naive datetime so thresholds of mixed
    /// granularity (date vs datetime) can be compared. `None` for anything
    /// that is not a date or timestamp.
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(d) => Some(d.and_time(NaiveTime::MIN)),
            Value::Timestamp(t) => Some(*t),
            Value::TimestampTz(t) => Some(t.naive_utc()),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::Decimal(_) => 4,
            Value::Text(_) => 5,
            Value::Date(_) => 6,
            Value::Timestamp(_) => 7,
            Value::TimestampTz(_) => 8,
            Value::Uuid(_) => 9,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::TimestampTz(a), Value::TimestampTz(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Decimal(v) => v.hash(state),
            Value::Text(v) => v.hash(state),
            Value::Date(v) => v.hash(state),
            Value::Timestamp(v) => v.hash(state),
            Value::TimestampTz(v) => v.hash(state),
            Value::Uuid(v) => v.hash(state),
        }
    }
}

/// A row projected onto its primary-key columns.
///
/// Frozen once built; equality and hashing are structural, so keys from the
/// source and destination sides of a diff collide exactly when the pk
/// values match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(BTreeMap<String, Value>);

impl RowKey {
    /// Project `row` onto `key_cols`. A missing key column is a logic error:
    /// callers always fetch at least the primary key.
    pub fn from_row(row: &Row, key_cols: &[String]) -> Result<Self> {
        let mut key = BTreeMap::new();
        for col in key_cols {
            let value = row
                .get(col)
                .ok_or_else(|| PoaError::Logic(format!("row is missing key column, {col}")))?;
            key.insert(col.clone(), value.clone());
        }
        Ok(RowKey(key))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn get(&self, col: &str) -> Option<&Value> {
        self.0.get(col)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Diagnostic rendering, e.g. `customer_id=3`.
    pub fn describe(&self) -> String {
        self.0
            .iter()
            .map(|(col, val)| {
                format!("{col}={}", val.render_text().unwrap_or_else(|| "null".into()))
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ── postgres parameter encoding ────────────────────────────────────────────
//
// The wire type is whatever the server inferred for the placeholder, so the
// encoder coerces each variant to the expected representation instead of
// assuming its natural one.

mod pg {
    use super::*;
    use bytes::BytesMut;
    use rust_decimal::prelude::FromPrimitive;
    use tokio_postgres::types::{IsNull, ToSql, Type};

    type BoxError = Box<dyn std::error::Error + Sync + Send>;

    fn is_textual(ty: &Type) -> bool {
        *ty == Type::TEXT
            || *ty == Type::VARCHAR
            || *ty == Type::BPCHAR
            || *ty == Type::NAME
            || *ty == Type::UNKNOWN
    }

    fn utc_midnight(date: NaiveDate) -> DateTime<Utc> {
        DateTime::<Utc>::from_naive_utc_and_offset(date.and_time(NaiveTime::MIN), Utc)
    }

    impl ToSql for Value {
        fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
            if is_textual(ty) {
                return match self.render_text() {
                    Some(text) => text.to_sql(ty, out),
                    None => Ok(IsNull::Yes),
                };
            }
            match self {
                Value::Null => Ok(IsNull::Yes),
                Value::Bool(v) => v.to_sql(ty, out),
                Value::Int(v) => {
                    if *ty == Type::INT2 {
                        (*v as i16).to_sql(ty, out)
                    } else if *ty == Type::INT4 {
                        (*v as i32).to_sql(ty, out)
                    } else if *ty == Type::NUMERIC {
                        Decimal::from(*v).to_sql(ty, out)
                    } else if *ty == Type::FLOAT8 {
                        (*v as f64).to_sql(ty, out)
                    } else {
                        v.to_sql(ty, out)
                    }
                }
                Value::Float(v) => {
                    if *ty == Type::FLOAT4 {
                        (*v as f32).to_sql(ty, out)
                    } else if *ty == Type::NUMERIC {
                        Decimal::from_f64(*v)
                            .ok_or_else(|| {
                                BoxError::from(format!("{v} cannot be represented as NUMERIC"))
                            })?
                            .to_sql(ty, out)
                    } else {
                        v.to_sql(ty, out)
                    }
                }
                Value::Decimal(v) => v.to_sql(ty, out),
                Value::Text(v) => v.to_sql(ty, out),
                Value::Date(v) => {
                    if *ty == Type::TIMESTAMP {
                        v.and_time(NaiveTime::MIN).to_sql(ty, out)
                    } else if *ty == Type::TIMESTAMPTZ {
                        utc_midnight(*v).to_sql(ty, out)
                    } else {
                        v.to_sql(ty, out)
                    }
                }
                Value::Timestamp(v) => {
                    if *ty == Type::TIMESTAMPTZ {
                        DateTime::<Utc>::from_naive_utc_and_offset(*v, Utc).to_sql(ty, out)
                    } else if *ty == Type::DATE {
                        v.date().to_sql(ty, out)
                    } else {
                        v.to_sql(ty, out)
                    }
                }
                Value::TimestampTz(v) => {
                    if *ty == Type::TIMESTAMP {
                        v.naive_utc().to_sql(ty, out)
                    } else if *ty == Type::DATE {
                        v.naive_utc().date().to_sql(ty, out)
                    } else {
                        v.to_sql(ty, out)
                    }
                }
                Value::Uuid(v) => v.to_sql(ty, out),
            }
        }

        fn accepts(_ty: &Type) -> bool {
            true
        }

        fn to_sql_checked(
            &self,
            ty: &Type,
            out: &mut BytesMut,
        ) -> std::result::Result<IsNull, BoxError> {
            self.to_sql(ty, out)
        }
    }
}

// ── mssql parameter encoding ───────────────────────────────────────────────

impl tiberius::ToSql for Value {
    fn to_sql(&self) -> tiberius::ColumnData<'_> {
        use tiberius::ColumnData;
        match self {
            Value::Null => ColumnData::String(None),
            Value::Bool(v) => ColumnData::Bit(Some(*v)),
            Value::Int(v) => ColumnData::I64(Some(*v)),
            Value::Float(v) => ColumnData::F64(Some(*v)),
            Value::Decimal(v) => tiberius::ToSql::to_sql(v),
            Value::Text(v) => ColumnData::String(Some(Cow::Borrowed(v.as_str()))),
            Value::Date(v) => tiberius::ToSql::to_sql(v),
            Value::Timestamp(v) => tiberius::ToSql::to_sql(v),
            Value::TimestampTz(v) => tiberius::ToSql::to_sql(v),
            Value::Uuid(v) => ColumnData::Guid(Some(*v)),
        }
    }
}
