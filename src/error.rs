// ABOUTME: Closed error set for the replicator
// ABOUTME: Every component boundary returns Result<T, PoaError>

/// Primary error type for the replicator.
///
/// Errors are carried as return values across every component boundary.
/// Driver-level failures are caught at the adapter boundary and wrapped in
/// [`PoaError::Io`] (or [`PoaError::Connection`] during session setup), so
/// the orchestrator only ever sees this closed set.
#[derive(Debug, thiserror::Error)]
pub enum PoaError {
    /// A bad or missing configuration entry.
    #[error("config error: {0}")]
    Config(String),

    /// The config names a database api the engine does not implement.
    #[error("the database api specified, {0}, was not recognized")]
    UnrecognizedDatabaseApi(String),

    /// A session could not be established.
    #[error("connection error: {0}")]
    Connection(String),

    /// The named table is absent from the source or destination.
    #[error("the table, {0}, does not exist")]
    TableDoesntExist(String),

    /// A dialect type map had no entry for the column's declared type.
    #[error("the data type {0} is not supported")]
    UnsupportedType(String),

    /// The cached primary key disagrees with the caller's pk argument.
    #[error("the cached primary key columns ({cached}) do not match the pk argument ({requested})")]
    PkMismatch { cached: String, requested: String },

    /// Two rows within a single result set projected to the same key.
    #[error("duplicate key within one result set: {0}")]
    DuplicateKey(String),

    /// The pre-execution guard refused a query or parameter.
    #[error("{0}")]
    SqlInjectionRefused(String),

    /// A wrapped driver-level failure.
    #[error("io error: {0}")]
    Io(String),

    /// An impossible state was reached. Indicates a bug.
    #[error("logic error: {0}")]
    Logic(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PoaError>;

impl PoaError {
    /// Name the table that could not be found, schema-qualified when known.
    pub fn table_doesnt_exist(schema_name: Option<&str>, table_name: &str) -> Self {
        match schema_name {
            Some(schema) => PoaError::TableDoesntExist(format!("{schema}.{table_name}")),
            None => PoaError::TableDoesntExist(table_name.to_string()),
        }
    }

    pub fn pk_mismatch(cached: &[String], requested: &[String]) -> Self {
        PoaError::PkMismatch {
            cached: cached.join(", "),
            requested: requested.join(", "),
        }
    }
}

impl From<std::io::Error> for PoaError {
    fn from(e: std::io::Error) -> Self {
        PoaError::Io(e.to_string())
    }
}

impl From<tokio_postgres::Error> for PoaError {
    fn from(e: tokio_postgres::Error) -> Self {
        PoaError::Io(e.to_string())
    }
}

impl From<tiberius::error::Error> for PoaError {
    fn from(e: tiberius::error::Error) -> Self {
        PoaError::Io(e.to_string())
    }
}

impl From<odbc_api::Error> for PoaError {
    fn from(e: odbc_api::Error) -> Self {
        PoaError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for PoaError {
    fn from(e: serde_json::Error) -> Self {
        PoaError::Logic(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_doesnt_exist_message() {
        let err = PoaError::table_doesnt_exist(Some("sales"), "customer");
        assert_eq!(err.to_string(), "the table, sales.customer, does not exist");

        let err = PoaError::table_doesnt_exist(None, "customer");
        assert_eq!(err.to_string(), "the table, customer, does not exist");
    }

    #[test]
    fn test_pk_mismatch_message() {
        let err = PoaError::pk_mismatch(
            &["customer_id".to_string()],
            &["customer_id".to_string(), "region".to_string()],
        );
        assert!(err.to_string().contains("customer_id"));
        assert!(err.to_string().contains("region"));
    }

    #[test]
    fn test_driver_errors_wrap_as_io() {
        let err: PoaError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, PoaError::Io(_)));
    }
}
