use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// The two catalog/DDL conventions this crate speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "postgresql", alias = "postgres")]
    Postgres,
}

impl Dialect {
    pub fn quote_char(self) -> char {
        match self {
            Dialect::MySql => '`',
            Dialect::Postgres => '"',
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Dialect::MySql => 3306,
            Dialect::Postgres => 5432,
        }
    }

    /// Quote a user-supplied identifier for DDL. Identifiers carrying the
    /// quote character are rejected rather than escaped.
    pub fn quote_identifier(self, ident: &str) -> Result<String, ValidationError> {
        let quote = self.quote_char();
        if ident.contains(quote) {
            return Err(ValidationError::IllegalIdentifier {
                identifier: ident.to_string(),
                quote,
            });
        }
        Ok(format!("{quote}{ident}{quote}"))
    }

    /// Quote a catalog-reported identifier, doubling any embedded quote.
    pub(crate) fn escape_identifier(self, ident: &str) -> String {
        let quote = self.quote_char();
        let doubled = format!("{quote}{quote}");
        format!("{quote}{}{quote}", ident.replace(quote, &doubled))
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::MySql => f.write_str("mysql"),
            Dialect::Postgres => f.write_str("postgresql"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown dialect '{0}', expected 'mysql' or 'postgresql'")]
pub struct UnknownDialect(pub String);

impl FromStr for Dialect {
    type Err = UnknownDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "postgresql" | "postgres" | "pg" => Ok(Dialect::Postgres),
            other => Err(UnknownDialect(other.to_string())),
        }
    }
}
