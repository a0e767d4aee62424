use thiserror::Error;

use crate::db::Dialect;

/// Malformed input to the DDL synthesizer. Raised before any connection is opened.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("table name must not be empty")]
    EmptyTableName,

    #[error("a table needs at least one column")]
    NoColumns,

    #[error("column #{position} has an empty name")]
    EmptyColumnName { position: usize },

    #[error("column '{0}' is defined more than once")]
    DuplicateColumn(String),

    #[error("identifier {identifier:?} contains the quote character {quote:?}")]
    IllegalIdentifier { identifier: String, quote: char },

    #[error("column '{0}' is marked as a foreign key but has no reference")]
    MissingReference(String),

    #[error("column '{0}' references an empty table or column name")]
    EmptyReference(String),
}

/// A statement failed at the server or the transport.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("mysql error: {0}")]
    MySql(#[from] sqlx::Error),

    #[error("tls error: {0}")]
    Tls(#[from] native_tls::Error),
}

impl DriverError {
    /// The message reported by the database server, falling back to the
    /// driver's own description when the failure never reached the server.
    pub fn server_message(&self) -> String {
        match self {
            DriverError::Postgres(e) => e
                .as_db_error()
                .map(|db| db.message().to_string())
                .unwrap_or_else(|| e.to_string()),
            DriverError::MySql(sqlx::Error::Database(db)) => db.message().to_string(),
            DriverError::MySql(e) => e.to_string(),
            DriverError::Tls(e) => e.to_string(),
        }
    }
}

/// Catalog queries failed or returned rows that cannot be normalized.
#[derive(Debug, Error)]
pub enum IntrospectionError {
    #[error("catalog query failed: {0}")]
    Driver(#[from] DriverError),

    #[error("malformed catalog row for table '{table}': {detail}")]
    MalformedRow { table: String, detail: String },

    #[error("{found} catalog rows handed to the {expected} normalizer (table '{table}')")]
    DialectMismatch {
        table: String,
        expected: Dialect,
        found: Dialect,
    },

    #[error("catalog fetch task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IntrospectionError {
    pub(crate) fn malformed(table: &str, detail: impl Into<String>) -> Self {
        IntrospectionError::MalformedRow {
            table: table.to_string(),
            detail: detail.into(),
        }
    }
}

impl From<tokio_postgres::Error> for IntrospectionError {
    fn from(e: tokio_postgres::Error) -> Self {
        IntrospectionError::Driver(e.into())
    }
}

impl From<sqlx::Error> for IntrospectionError {
    fn from(e: sqlx::Error) -> Self {
        IntrospectionError::Driver(e.into())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Introspection(#[from] IntrospectionError),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
