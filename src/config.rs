// ABOUTME: JSON configuration file describing the known databases and engine limits
// ABOUTME: The caller supplies the path; nothing here is memoized process-wide

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::error::{PoaError, Result};

/// Database driver family used to reach a configured database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Api {
    /// The HH proprietary dialect, reached over ODBC.
    Hh,
    /// SQL Server.
    Mssql,
    /// Any other ODBC source.
    Pyodbc,
    /// PostgreSQL.
    Psycopg,
}

impl Api {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "hh" => Ok(Api::Hh),
            "mssql" => Ok(Api::Mssql),
            "pyodbc" => Ok(Api::Pyodbc),
            "psycopg" => Ok(Api::Psycopg),
            other => Err(PoaError::UnrecognizedDatabaseApi(other.to_string())),
        }
    }
}

impl fmt::Display for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Api::Hh => "hh",
            Api::Mssql => "mssql",
            Api::Pyodbc => "pyodbc",
            Api::Psycopg => "psycopg",
        };
        write!(f, "{name}")
    }
}

/// One `databases` entry.
///
/// Either `connection-string` is given directly, or all of `host`,
/// `db-name`, and the two credential entries are; the credential entries
/// name environment variables holding the username and password (the
/// secret store itself is outside this program).
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub name: String,
    pub api: Api,
    pub host: Option<String>,
    pub db_name: Option<String>,
    pub username_entry: Option<String>,
    pub password_entry: Option<String>,
    pub connection_string: Option<String>,
}

impl DbConfig {
    /// The database name syncs are recorded under: the configured
    /// `db-name` when present, the entry name otherwise.
    pub fn db_name(&self) -> &str {
        self.db_name.as_deref().unwrap_or(&self.name)
    }

    /// Resolve the connection string, building one from host, db-name, and
    /// the credential environment variables when none was configured.
    pub fn resolve_connection_string(&self) -> Result<String> {
        if let Some(conn_str) = &self.connection_string {
            return Ok(conn_str.clone());
        }

        let host = self.required_field(self.host.as_deref(), "host")?;
        let db_name = self.required_field(self.db_name.as_deref(), "db-name")?;
        let username = self.credential(self.username_entry.as_deref(), "keyring-db-username-entry")?;
        let password = self.credential(self.password_entry.as_deref(), "keyring-db-password-entry")?;

        let conn_str = match self.api {
            Api::Psycopg => {
                format!("host={host} dbname={db_name} user={username} password={password}")
            }
            Api::Mssql => format!(
                "Server=tcp:{host},1433;Database={db_name};User Id={username};Password={password};TrustServerCertificate=true"
            ),
            Api::Hh | Api::Pyodbc => {
                format!("DSN={host};DATABASE={db_name};UID={username};PWD={password}")
            }
        };
        Ok(conn_str)
    }

    fn required_field<'a>(&self, value: Option<&'a str>, key: &str) -> Result<&'a str> {
        value.ok_or_else(|| {
            PoaError::Config(format!(
                "database entry {} has no connection-string, so '{key}' is required",
                self.name
            ))
        })
    }

    fn credential(&self, entry: Option<&str>, key: &str) -> Result<String> {
        let entry = self.required_field(entry, key)?;
        std::env::var(entry).map_err(|_| {
            PoaError::Config(format!(
                "the credential entry, {entry}, named by '{key}' for database {} is not set",
                self.name
            ))
        })
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub seconds_between_cleanups: u32,
    pub days_logs_to_keep: u32,
    pub batch_size: usize,
    pub databases: Vec<DbConfig>,
}

impl Config {
    pub fn db(&self, name: &str) -> Result<&DbConfig> {
        self.databases
            .iter()
            .find(|db| db.name == name)
            .ok_or_else(|| {
                PoaError::Config(format!(
                    "could not find a database entry named {name} in the config file"
                ))
            })
    }
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(rename = "seconds-between-cleanups")]
    seconds_between_cleanups: i64,
    #[serde(rename = "days-logs-to-keep")]
    days_logs_to_keep: i64,
    #[serde(rename = "batch-size")]
    batch_size: i64,
    databases: Vec<RawDbConfig>,
}

#[derive(Deserialize)]
struct RawDbConfig {
    name: String,
    api: String,
    #[serde(default)]
    host: Option<String>,
    #[serde(rename = "db-name", default)]
    db_name: Option<String>,
    #[serde(rename = "keyring-db-username-entry", default)]
    username_entry: Option<String>,
    #[serde(rename = "keyring-db-password-entry", default)]
    password_entry: Option<String>,
    #[serde(rename = "connection-string", default)]
    connection_string: Option<String>,
}

/// Load and validate the config file at `path`.
pub fn load(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Err(PoaError::Config(format!(
            "the config file specified, {}, does not exist",
            path.display()
        )));
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| PoaError::Config(format!("could not read {}: {e}", path.display())))?;

    let raw: RawConfig = serde_json::from_str(&contents)
        .map_err(|e| PoaError::Config(format!("could not parse {}: {e}", path.display())))?;

    parse(raw)
}

fn parse(raw: RawConfig) -> Result<Config> {
    let seconds_between_cleanups = positive(raw.seconds_between_cleanups, "seconds-between-cleanups")? as u32;
    let days_logs_to_keep = positive(raw.days_logs_to_keep, "days-logs-to-keep")? as u32;
    let batch_size = positive(raw.batch_size, "batch-size")? as usize;

    let mut names = BTreeSet::new();
    let mut databases = Vec::with_capacity(raw.databases.len());
    for db in raw.databases {
        if !names.insert(db.name.clone()) {
            return Err(PoaError::Config(format!(
                "the database entry, {}, appears more than once",
                db.name
            )));
        }

        let api = Api::parse(&db.api)?;

        if db.connection_string.is_none() {
            let complete = db.host.is_some()
                && db.db_name.is_some()
                && db.username_entry.is_some()
                && db.password_entry.is_some();
            if !complete {
                return Err(PoaError::Config(format!(
                    "database entry {} must provide either 'connection-string' or all of \
                     'host', 'db-name', 'keyring-db-username-entry', and 'keyring-db-password-entry'",
                    db.name
                )));
            }
        }

        databases.push(DbConfig {
            name: db.name,
            api,
            host: db.host,
            db_name: db.db_name,
            username_entry: db.username_entry,
            password_entry: db.password_entry,
            connection_string: db.connection_string,
        });
    }

    Ok(Config {
        seconds_between_cleanups,
        days_logs_to_keep,
        batch_size,
        databases,
    })
}

fn positive(value: i64, key: &str) -> Result<i64> {
    if value <= 0 {
        return Err(PoaError::Config(format!(
            "'{key}' must be a positive integer, but got {value}"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const GOOD: &str = r#"{
        "seconds-between-cleanups": 3600,
        "days-logs-to-keep": 3,
        "batch-size": 1000,
        "databases": [
            {
                "name": "dw",
                "api": "psycopg",
                "connection-string": "host=localhost dbname=dw user=poa password=poa"
            },
            {
                "name": "sales",
                "api": "mssql",
                "host": "sqlserver01",
                "db-name": "sales",
                "keyring-db-username-entry": "SALES_DB_USER",
                "keyring-db-password-entry": "SALES_DB_PASSWORD"
            }
        ]
    }"#;

    #[test]
    fn test_load_good_config() {
        let file = write_config(GOOD);
        let config = load(file.path()).unwrap();

        assert_eq!(config.seconds_between_cleanups, 3600);
        assert_eq!(config.days_logs_to_keep, 3);
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.databases.len(), 2);

        let dw = config.db("dw").unwrap();
        assert_eq!(dw.api, Api::Psycopg);
        assert!(dw.connection_string.is_some());

        let sales = config.db("sales").unwrap();
        assert_eq!(sales.api, Api::Mssql);
        assert!(config.db("absent").is_err());
    }

    #[test]
    fn test_missing_file_is_a_config_error() {
        let result = load(Path::new("/nonexistent/config.json"));
        assert!(matches!(result, Err(PoaError::Config(_))));
    }

    #[test]
    fn test_unrecognized_api() {
        let contents = GOOD.replace("\"psycopg\"", "\"oracle\"");
        let file = write_config(&contents);
        assert!(matches!(
            load(file.path()),
            Err(PoaError::UnrecognizedDatabaseApi(api)) if api == "oracle"
        ));
    }

    #[test]
    fn test_connection_invariant() {
        // Null out the password entry so the four-field fallback is
        // incomplete and there is no connection string either.
        let contents = GOOD.replace(
            "\"keyring-db-password-entry\": \"SALES_DB_PASSWORD\"",
            "\"keyring-db-password-entry\": null",
        );
        let file = write_config(&contents);
        assert!(matches!(load(file.path()), Err(PoaError::Config(_))));
    }

    #[test]
    fn test_nonpositive_batch_size() {
        let contents = GOOD.replace("\"batch-size\": 1000", "\"batch-size\": 0");
        let file = write_config(&contents);
        assert!(matches!(load(file.path()), Err(PoaError::Config(_))));
    }

    #[test]
    fn test_explicit_connection_string_wins() {
        let file = write_config(GOOD);
        let config = load(file.path()).unwrap();
        let conn = config.db("dw").unwrap().resolve_connection_string().unwrap();
        assert_eq!(conn, "host=localhost dbname=dw user=poa password=poa");
    }

    #[test]
    fn test_api_round_trip() {
        for api in ["hh", "mssql", "pyodbc", "psycopg"] {
            assert_eq!(Api::parse(api).unwrap().to_string(), api);
        }
    }
}
