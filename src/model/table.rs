// ABOUTME: Immutable column and table descriptions bridged between dialects
// ABOUTME: Built by introspection or read from the schema cache, never mutated afterward

use crate::error::{PoaError, Result};
use crate::model::DataType;
use std::collections::BTreeSet;

/// A single column of a source table.
///
/// `name` is lowercased at construction so identifier handling is uniform
/// across dialects. `length`, `precision`, and `scale` are carried through
/// from introspection when the dialect reports them; a `Decimal` without
/// precision/scale falls back to (18, 4) at DDL emission time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub length: Option<i64>,
    pub precision: Option<i64>,
    pub scale: Option<i64>,
}

impl Column {
    pub fn new(
        name: &str,
        data_type: DataType,
        nullable: bool,
        length: Option<i64>,
        precision: Option<i64>,
        scale: Option<i64>,
    ) -> Self {
        Column {
            name: name.to_lowercase(),
            data_type,
            nullable,
            length,
            precision,
            scale,
        }
    }
}

/// The shape of a table: identity, primary key, and column set.
///
/// Invariants enforced at construction:
/// - the primary key is non-empty,
/// - every pk name appears in `columns`,
/// - column names are unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub db_name: String,
    pub schema_name: Option<String>,
    pub table_name: String,
    pub pk: Vec<String>,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(
        db_name: &str,
        schema_name: Option<&str>,
        table_name: &str,
        pk: Vec<String>,
        mut columns: Vec<Column>,
    ) -> Result<Self> {
        if pk.is_empty() {
            return Err(PoaError::Logic(format!(
                "the table, {table_name}, has no primary key columns"
            )));
        }

        columns.sort_by(|a, b| a.name.cmp(&b.name));

        let mut seen = BTreeSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(PoaError::Logic(format!(
                    "the table, {table_name}, has a duplicate column named {}",
                    col.name
                )));
            }
        }

        let pk: Vec<String> = pk.into_iter().map(|c| c.to_lowercase()).collect();
        for key_col in &pk {
            if !seen.contains(key_col.as_str()) {
                return Err(PoaError::Logic(format!(
                    "the pk column, {key_col}, is not a column of the table, {table_name}"
                )));
            }
        }

        Ok(Table {
            db_name: db_name.to_string(),
            schema_name: schema_name.map(str::to_string),
            table_name: table_name.to_string(),
            pk,
            columns,
        })
    }

    /// Column names in sorted order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Column names that are not part of the primary key, in sorted order.
    pub fn non_pk_column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !self.pk.contains(&c.name))
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Same shape under a different identity. Used to derive the destination
    /// table description from the source one.
    pub fn with_identity(&self, db_name: &str, schema_name: Option<&str>, table_name: &str) -> Self {
        Table {
            db_name: db_name.to_string(),
            schema_name: schema_name.map(str::to_string),
            table_name: table_name.to_string(),
            pk: self.pk.clone(),
            columns: self.columns.clone(),
        }
    }

    /// `schema.table` when a schema is set, bare table name otherwise.
    pub fn qualified_name(&self) -> String {
        match &self.schema_name {
            Some(schema) => format!("{schema}.{}", self.table_name),
            None => self.table_name.clone(),
        }
    }
}
