// ABOUTME: Closed tag set of portable column types
// ABOUTME: Every dialect mapping must be total over this set or fail with UnsupportedType

use crate::error::{PoaError, Result};

/// Portable column type.
///
/// Each source dialect maps its native types into this set during
/// introspection, and the destination maps it back out at DDL emission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    BigFloat,
    BigInt,
    Bool,
    Date,
    Decimal,
    Float,
    Int,
    Text,
    Timestamp,
    TimestampTz,
    Uuid,
}

impl DataType {
    /// Stable name used by the schema cache.
    pub fn db_name(self) -> &'static str {
        match self {
            DataType::BigFloat => "big_float",
            DataType::BigInt => "big_int",
            DataType::Bool => "bool",
            DataType::Date => "date",
            DataType::Decimal => "decimal",
            DataType::Float => "float",
            DataType::Int => "int",
            DataType::Text => "text",
            DataType::Timestamp => "timestamp",
            DataType::TimestampTz => "timestamptz",
            DataType::Uuid => "uuid",
        }
    }

    /// Inverse of [`DataType::db_name`], used when reading the schema cache.
    pub fn from_db_name(name: &str) -> Result<Self> {
        match name {
            "big_float" => Ok(DataType::BigFloat),
            "big_int" => Ok(DataType::BigInt),
            "bool" => Ok(DataType::Bool),
            "date" => Ok(DataType::Date),
            "decimal" => Ok(DataType::Decimal),
            "float" => Ok(DataType::Float),
            "int" => Ok(DataType::Int),
            "text" => Ok(DataType::Text),
            "timestamp" => Ok(DataType::Timestamp),
            "timestamptz" => Ok(DataType::TimestampTz),
            "uuid" => Ok(DataType::Uuid),
            other => Err(PoaError::UnsupportedType(other.to_string())),
        }
    }
}
