// ABOUTME: Driver adapters: one cursor per database family, plus the shared query guard
// ABOUTME: Every statement and every string parameter passes the guard before execution

pub mod mssql;
pub mod odbc;
pub mod pg;

pub use mssql::MssqlCursor;
pub use odbc::OdbcCursor;
pub use pg::PgCursor;

use crate::error::{PoaError, Result};
use crate::model::Value;

const FORBIDDEN: [&str; 4] = [";", "--", "/*", "*/"];

/// Collect guard violations for a query and its parameters.
///
/// The engine only ever runs single statements it generated itself, so a
/// statement separator or comment marker in the SQL, or in any string
/// parameter, means something upstream smuggled text in.
pub fn query_errors(sql: &str, params: &[Value]) -> Vec<String> {
    let mut errors = Vec::new();

    for token in FORBIDDEN {
        if sql.contains(token) {
            errors.push(format!("{token} is not allowed in sql queries."));
        }
    }

    for param in params {
        if let Value::Text(text) = param {
            for token in FORBIDDEN {
                if text.contains(token) {
                    errors.push(format!("{token} is not allowed in parameters."));
                }
            }
        }
    }

    errors
}

/// Refuse the query when the guard finds anything.
pub fn check_query(sql: &str, params: &[Value]) -> Result<()> {
    let errors = query_errors(sql, params);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(PoaError::SqlInjectionRefused(errors.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_query_passes() {
        assert!(check_query("SELECT count(*) AS ct FROM \"sales\".\"customer\"", &[]).is_ok());
    }

    #[test]
    fn test_statement_separator_refused() {
        let result = check_query("SELECT 1; DROP TABLE customer", &[]);
        assert!(matches!(result, Err(PoaError::SqlInjectionRefused(_))));
    }

    #[test]
    fn test_comment_markers_refused() {
        for sql in [
            "SELECT 1 -- hidden",
            "SELECT /* hidden */ 1",
            "SELECT 1 */",
        ] {
            assert!(check_query(sql, &[]).is_err(), "{sql} should be refused");
        }
    }

    #[test]
    fn test_string_parameters_are_checked() {
        let params = vec![Value::Text("Robert'); DROP TABLE students".into())];
        assert!(check_query("SELECT 1", &params).is_err());
    }

    #[test]
    fn test_non_string_parameters_are_not_flagged() {
        let params = vec![Value::Int(42), Value::Null];
        assert!(check_query("SELECT 1", &params).is_ok());
    }

    #[test]
    fn test_all_violations_reported() {
        let errors = query_errors("SELECT 1; -- x", &[Value::Text(";".into())]);
        assert_eq!(errors.len(), 3);
    }
}
