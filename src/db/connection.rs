use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlSslMode};
use sqlx::Connection as _;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};
use tracing::Instrument;

use super::Dialect;
use crate::error::DriverError;

/// Database used by Postgres operations that are not scoped to one.
const POSTGRES_MAINTENANCE_DB: &str = "postgres";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub host: String,
    /// Falls back to the dialect's default port.
    #[serde(default)]
    pub port: Option<u16>,
    pub user: String,
    /// Accepted on input, never serialized back out
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(alias = "type")]
    pub dialect: Dialect,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub ssl_mode: SslMode,
}

impl ConnectionConfig {
    pub fn new(dialect: Dialect, host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            user: user.into(),
            password: String::new(),
            dialect,
            database: None,
            ssl_mode: SslMode::default(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.dialect.default_port())
    }
}

/// TLS policy, with libpq's meaning: `Prefer` and `Require` encrypt without
/// verifying the server certificate, `VerifyFull` checks the chain and the
/// host name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    /// TLS when the server offers it, plain text otherwise.
    #[default]
    Prefer,
    Require,
    VerifyFull,
    Disable,
}

/// One live driver connection, owned by a single operation.
///
/// Open it, do the work, then [`Connection::close`] it before returning.
/// Dropping it also releases the socket, so an early `?` never leaks it.
pub enum Connection {
    Postgres(PgConnection),
    MySql(MySqlConnection),
}

pub struct PgConnection {
    client: Arc<Client>,
    driver: JoinHandle<()>,
}

impl PgConnection {
    pub(crate) fn client(&self) -> &Arc<Client> {
        &self.client
    }
}

impl Connection {
    /// Open a connection, optionally scoped to `database`. Without one the
    /// config's own database is used, and Postgres falls back to `postgres`.
    pub async fn open(config: &ConnectionConfig, database: Option<&str>) -> Result<Self, DriverError> {
        let database = database.or(config.database.as_deref());
        let span = tracing::debug_span!(
            "db.connect",
            dialect = %config.dialect,
            host = %config.host,
            port = config.port(),
            database = database.unwrap_or(""),
        );
        async move {
            let conn = match config.dialect {
                Dialect::Postgres => Connection::Postgres(connect_postgres(config, database).await?),
                Dialect::MySql => Connection::MySql(connect_mysql(config, database).await?),
            };
            tracing::debug!("connection opened");
            Ok(conn)
        }
        .instrument(span)
        .await
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Connection::Postgres(_) => Dialect::Postgres,
            Connection::MySql(_) => Dialect::MySql,
        }
    }

    /// Server version string, which also proves the session is usable.
    pub async fn server_version(&mut self) -> Result<String, DriverError> {
        match self {
            Connection::Postgres(pg) => {
                let row = pg.client.query_one("SELECT version()", &[]).await?;
                Ok(row.try_get::<_, String>(0)?)
            }
            Connection::MySql(conn) => {
                let version: String = sqlx::query_scalar("SELECT VERSION()")
                    .fetch_one(&mut *conn)
                    .await?;
                Ok(version)
            }
        }
    }

    /// Run one statement whose result rows are not needed (DDL).
    pub async fn execute_statement(&mut self, sql: &str) -> Result<(), DriverError> {
        let span = tracing::debug_span!("db.execute", dialect = %self.dialect(), sql = %sql);
        match self {
            Connection::Postgres(pg) => pg.client.batch_execute(sql).instrument(span).await?,
            Connection::MySql(conn) => {
                sqlx::raw_sql(sql).execute(&mut *conn).instrument(span).await?;
            }
        }
        Ok(())
    }

    pub async fn close(self) {
        match self {
            Connection::Postgres(PgConnection { client, driver }) => {
                // The driver task finishes once the last client handle is gone.
                drop(client);
                if let Err(e) = driver.await {
                    tracing::warn!(error = %e, "postgres driver task did not shut down cleanly");
                }
            }
            Connection::MySql(conn) => {
                if let Err(e) = conn.close().await {
                    tracing::warn!(error = %e, "mysql connection did not close cleanly");
                }
            }
        }
        tracing::debug!("connection closed");
    }
}

async fn connect_postgres(
    config: &ConnectionConfig,
    database: Option<&str>,
) -> Result<PgConnection, DriverError> {
    let mut pg = tokio_postgres::Config::new();
    pg.host(&config.host)
        .port(config.port())
        .user(&config.user)
        .password(&config.password)
        .dbname(database.unwrap_or(POSTGRES_MAINTENANCE_DB));

    let (client, driver) = match config.ssl_mode {
        SslMode::Disable => {
            let (client, connection) = pg.connect(NoTls).await?;
            (client, spawn_driver(connection))
        }
        mode => {
            pg.ssl_mode(match mode {
                SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
                _ => tokio_postgres::config::SslMode::Require,
            });
            let (client, connection) = pg.connect(tls_connector(mode)?).await?;
            (client, spawn_driver(connection))
        }
    };

    Ok(PgConnection {
        client: Arc::new(client),
        driver,
    })
}

fn tls_connector(mode: SslMode) -> Result<MakeTlsConnector, DriverError> {
    let verify = mode == SslMode::VerifyFull;
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(!verify)
        .danger_accept_invalid_hostnames(!verify)
        .build()?;
    Ok(MakeTlsConnector::new(connector))
}

fn spawn_driver<S, T>(connection: tokio_postgres::Connection<S, T>) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!(error = %e, "postgres connection error");
        }
    })
}

async fn connect_mysql(
    config: &ConnectionConfig,
    database: Option<&str>,
) -> Result<MySqlConnection, DriverError> {
    let mut options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port())
        .username(&config.user)
        .password(&config.password)
        .ssl_mode(match config.ssl_mode {
            SslMode::Prefer => MySqlSslMode::Preferred,
            SslMode::Require => MySqlSslMode::Required,
            SslMode::VerifyFull => MySqlSslMode::VerifyIdentity,
            SslMode::Disable => MySqlSslMode::Disabled,
        });
    if let Some(database) = database {
        options = options.database(database);
    }

    Ok(MySqlConnection::connect_with(&options).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_ui_json() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{"host":"localhost","user":"root","password":"secret","type":"mysql"}"#,
        )
        .unwrap();
        assert_eq!(config.dialect, Dialect::MySql);
        assert_eq!(config.port(), 3306);
        assert_eq!(config.ssl_mode, SslMode::Prefer);
        assert_eq!(config.password, "secret");
    }

    #[test]
    fn explicit_port_wins() {
        let mut config = ConnectionConfig::new(Dialect::Postgres, "db", "app");
        assert_eq!(config.port(), 5432);
        config.port = Some(6543);
        assert_eq!(config.port(), 6543);
    }

    #[test]
    fn password_is_not_serialized() {
        let mut config = ConnectionConfig::new(Dialect::Postgres, "db", "app");
        config.password = "hunter2".into();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("\"sslMode\":\"prefer\""));
    }

    #[test]
    fn ssl_modes_from_json() {
        let mode: SslMode = serde_json::from_str("\"verify-full\"").unwrap();
        assert_eq!(mode, SslMode::VerifyFull);
        let mode: SslMode = serde_json::from_str("\"require\"").unwrap();
        assert_eq!(mode, SslMode::Require);
    }

    #[test]
    fn every_tls_mode_builds_a_connector() {
        for mode in [SslMode::Prefer, SslMode::Require, SslMode::VerifyFull] {
            assert!(tls_connector(mode).is_ok(), "{mode:?}");
        }
    }
}
