//! Operations exposed to the UI.
//!
//! Each call opens its own connection from the given config, does its work
//! and closes the connection again before returning, on success or failure.

use crate::db::{
    self, ColumnDefinition, Connection, ConnectionConfig, DatabaseInfo, QueryResult, Table,
};
use crate::diagram::{self, Diagram};
use crate::error::{IntrospectionError, Result};

/// `true` when a session can be opened and answers a trivial query.
pub async fn test_connection(config: &ConnectionConfig) -> bool {
    match server_version(config).await {
        Ok(version) => {
            tracing::debug!(%version, "connection test succeeded");
            true
        }
        Err(e) => {
            tracing::debug!(error = %e, "connection test failed");
            false
        }
    }
}

pub async fn server_version(config: &ConnectionConfig) -> Result<String> {
    let mut conn = Connection::open(config, None).await?;
    let result = conn.server_version().await;
    conn.close().await;
    Ok(result?)
}

pub async fn get_databases(config: &ConnectionConfig) -> Result<Vec<DatabaseInfo>> {
    let mut conn = Connection::open(config, None)
        .await
        .map_err(IntrospectionError::from)?;
    let result = db::list_databases(&mut conn).await;
    conn.close().await;
    Ok(result?)
}

/// Connection failures surface as [`IntrospectionError::Driver`], like any
/// other failed catalog call.
pub async fn get_tables(config: &ConnectionConfig, database: &str) -> Result<Vec<Table>> {
    let mut conn = Connection::open(config, Some(database))
        .await
        .map_err(IntrospectionError::from)?;
    let result = db::list_tables(&mut conn, database).await;
    conn.close().await;
    Ok(result?)
}

/// Validation runs first; an invalid definition never opens a connection.
pub async fn create_table(
    config: &ConnectionConfig,
    database: &str,
    table_name: &str,
    columns: &[ColumnDefinition],
) -> Result<()> {
    let sql = db::synthesize(config.dialect, table_name, columns)?;
    tracing::info!(table = table_name, database, "creating table");

    let mut conn = Connection::open(config, Some(database)).await?;
    let result = conn.execute_statement(&sql).await;
    conn.close().await;
    Ok(result?)
}

pub async fn execute_query(
    config: &ConnectionConfig,
    database: &str,
    sql: &str,
) -> Result<QueryResult> {
    let mut conn = Connection::open(config, Some(database)).await?;
    let result = db::execute_query(&mut conn, sql).await;
    conn.close().await;
    Ok(result?)
}

/// Diagram of `database`, limited to `selection` when one is given.
pub async fn get_diagram(
    config: &ConnectionConfig,
    database: &str,
    selection: Option<&[String]>,
) -> Result<Diagram> {
    let tables = get_tables(config, database).await?;
    let diagram = match selection {
        Some(names) => diagram::build(&diagram::select_tables(&tables, names)),
        None => diagram::build(&tables),
    };
    Ok(diagram)
}
