// ABOUTME: Per-dialect SQL text rules: identifier quoting, placeholders, lowercasing aliases
// ABOUTME: SQL builders take a Dialect so the same query shapes serve every source

/// SQL text conventions for one database dialect.
///
/// The engine never translates queries between dialects; it only varies the
/// fixed set of rules here: how identifiers are quoted, how parameter
/// placeholders are spelled, and how mixed-case source columns are aliased
/// down to the lowercased names the portable model uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Hh,
    Mssql,
    OdbcDefault,
}

impl Dialect {
    /// Quote an identifier verbatim.
    pub fn wrap(self, name: &str) -> String {
        match self {
            Dialect::Hh => format!("`{name}`"),
            Dialect::Postgres | Dialect::Mssql | Dialect::OdbcDefault => format!("\"{name}\""),
        }
    }

    /// Quote an identifier, lowercasing it first. Used on the destination
    /// side, where every managed identifier is lowercase.
    pub fn wrap_lower(self, name: &str) -> String {
        self.wrap(&name.to_lowercase())
    }

    /// Placeholder for the 1-based parameter `n`.
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${n}"),
            Dialect::Mssql => format!("@P{n}"),
            Dialect::Hh | Dialect::OdbcDefault => "?".to_string(),
        }
    }

    /// A select-list item for `col_name`, aliased to its lowercase form when
    /// the source spells it with any uppercase characters, e.g.
    /// `"Name" AS "name"`.
    pub fn col_with_alias(self, col_name: &str) -> String {
        let lowered = col_name.to_lowercase();
        if lowered == col_name {
            self.wrap(col_name)
        } else {
            format!("{} AS {}", self.wrap(col_name), self.wrap(&lowered))
        }
    }

    /// `schema`.`table` or bare `table`, quoted.
    pub fn qualified_table(self, schema_name: Option<&str>, table_name: &str) -> String {
        match schema_name {
            Some(schema) => format!("{}.{}", self.wrap(schema), self.wrap(table_name)),
            None => self.wrap(table_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_per_dialect() {
        assert_eq!(Dialect::Postgres.wrap("customer"), "\"customer\"");
        assert_eq!(Dialect::Hh.wrap("customer"), "`customer`");
        assert_eq!(Dialect::Mssql.wrap("customer"), "\"customer\"");
        assert_eq!(Dialect::OdbcDefault.wrap("customer"), "\"customer\"");
    }

    #[test]
    fn test_wrap_lower() {
        assert_eq!(Dialect::Postgres.wrap_lower("Customer_Id"), "\"customer_id\"");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::Postgres.placeholder(3), "$3");
        assert_eq!(Dialect::Mssql.placeholder(2), "@P2");
        assert_eq!(Dialect::Hh.placeholder(1), "?");
        assert_eq!(Dialect::OdbcDefault.placeholder(9), "?");
    }

    #[test]
    fn test_col_with_alias_only_for_mixed_case() {
        assert_eq!(Dialect::Postgres.col_with_alias("name"), "\"name\"");
        assert_eq!(
            Dialect::Postgres.col_with_alias("Name"),
            "\"Name\" AS \"name\""
        );
        assert_eq!(Dialect::Hh.col_with_alias("Name"), "`Name` AS `name`");
    }

    #[test]
    fn test_qualified_table() {
        assert_eq!(
            Dialect::Postgres.qualified_table(Some("sales"), "customer"),
            "\"sales\".\"customer\""
        );
        assert_eq!(
            Dialect::Hh.qualified_table(None, "customer"),
            "`customer`"
        );
    }
}
