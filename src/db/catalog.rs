//! Raw catalog rows and the dialect-specific queries that produce them.
//!
//! Nothing here interprets the rows; see [`super::introspection`] for that.

use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::{ColumnIndex, Row as _};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_postgres::Client;
use tracing::Instrument;

use super::{Connection, Dialect};
use crate::error::IntrospectionError;

/// Catalog rows describing one table, not yet normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    pub name: String,
    pub columns: RawColumns,
    pub foreign_keys: Vec<ForeignKeyRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawColumns {
    MySql(Vec<MySqlColumnRow>),
    Postgres(Vec<PgColumnRow>),
}

impl RawColumns {
    pub fn dialect(&self) -> Dialect {
        match self {
            RawColumns::MySql(_) => Dialect::MySql,
            RawColumns::Postgres(_) => Dialect::Postgres,
        }
    }
}

/// One row of `DESCRIBE <table>`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MySqlColumnRow {
    pub field: String,
    pub column_type: String,
    /// `YES` or `NO`
    pub null: String,
    /// `PRI`, `UNI`, `MUL` or empty
    pub key: String,
    pub default: Option<String>,
}

/// One (column, constraint) row from `information_schema`. A column with
/// several constraints appears several times; one without any appears once
/// with `constraint_type = None`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PgColumnRow {
    pub column_name: String,
    pub data_type: String,
    pub character_maximum_length: Option<i32>,
    /// `YES` or `NO`
    pub is_nullable: String,
    pub column_default: Option<String>,
    pub constraint_type: Option<String>,
    /// Number of columns covered by `constraint_type`'s constraint.
    pub constraint_columns: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ForeignKeyRow {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
    pub update_rule: Option<String>,
    pub delete_rule: Option<String>,
}

pub(crate) async fn fetch_databases(conn: &mut Connection) -> Result<Vec<String>, IntrospectionError> {
    match conn {
        Connection::Postgres(pg) => {
            let rows = pg
                .client()
                .query(
                    "SELECT datname::text FROM pg_database
                     WHERE datistemplate = false
                     ORDER BY datname",
                    &[],
                )
                .await?;
            rows.iter()
                .map(|row| Ok(row.try_get::<_, String>(0)?))
                .collect()
        }
        Connection::MySql(conn) => {
            let rows = sqlx::query("SHOW DATABASES").fetch_all(&mut *conn).await?;
            rows.iter()
                .map(|row| Ok(text(row, 0)?.unwrap_or_default()))
                .collect()
        }
    }
}

/// Fetch raw catalog rows for every base table of `database`, in catalog order.
pub(crate) async fn fetch_tables(
    conn: &mut Connection,
    database: &str,
) -> Result<Vec<RawTable>, IntrospectionError> {
    match conn {
        Connection::Postgres(pg) => fetch_postgres_tables(pg.client()).await,
        Connection::MySql(conn) => fetch_mysql_tables(conn, database).await,
    }
}

// ── PostgreSQL ──────────────────────────────────────────────────

const PG_TABLES: &str = "
    SELECT table_name::text
    FROM information_schema.tables
    WHERE table_schema = current_schema()
      AND table_type = 'BASE TABLE'
    ORDER BY table_name";

const PG_COLUMNS: &str = "
    SELECT
        c.column_name::text,
        c.data_type::text,
        c.character_maximum_length::int,
        c.is_nullable::text,
        c.column_default::text,
        tc.constraint_type::text,
        (SELECT count(*)
         FROM information_schema.key_column_usage k2
         WHERE k2.constraint_schema = tc.constraint_schema
           AND k2.constraint_name = tc.constraint_name
           AND k2.table_name = tc.table_name) AS constraint_columns
    FROM information_schema.columns c
    LEFT JOIN information_schema.key_column_usage kcu
        ON kcu.table_schema = c.table_schema
        AND kcu.table_name = c.table_name
        AND kcu.column_name = c.column_name
    LEFT JOIN information_schema.table_constraints tc
        ON tc.constraint_schema = kcu.constraint_schema
        AND tc.constraint_name = kcu.constraint_name
        AND tc.table_name = kcu.table_name
        AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE')
    WHERE c.table_schema = current_schema() AND c.table_name = $1::text
    ORDER BY c.ordinal_position";

const PG_FOREIGN_KEYS: &str = "
    SELECT
        kcu.column_name::text,
        ccu.table_name::text AS referenced_table,
        ccu.column_name::text AS referenced_column,
        rc.update_rule::text,
        rc.delete_rule::text
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
        ON tc.constraint_schema = kcu.constraint_schema
        AND tc.constraint_name = kcu.constraint_name
    JOIN information_schema.referential_constraints rc
        ON rc.constraint_schema = tc.constraint_schema
        AND rc.constraint_name = tc.constraint_name
    JOIN information_schema.constraint_column_usage ccu
        ON ccu.constraint_schema = tc.constraint_schema
        AND ccu.constraint_name = tc.constraint_name
    WHERE tc.constraint_type = 'FOREIGN KEY'
      AND tc.table_schema = current_schema()
      AND tc.table_name = $1::text
    ORDER BY kcu.ordinal_position";

async fn fetch_postgres_tables(client: &Arc<Client>) -> Result<Vec<RawTable>, IntrospectionError> {
    let names: Vec<String> = client
        .query(PG_TABLES, &[])
        .await?
        .iter()
        .map(|row| row.try_get::<_, String>(0))
        .collect::<Result<_, _>>()?;

    // Tables are independent, so they share the pipelined client
    // concurrently; slots keep the catalog order for the caller.
    let mut tasks = JoinSet::new();
    for (index, name) in names.iter().cloned().enumerate() {
        let client = Arc::clone(client);
        let span = tracing::debug_span!("catalog.table", table = %name);
        tasks.spawn(
            async move { (index, fetch_postgres_table(&client, name).await) }.instrument(span),
        );
    }

    let mut slots: Vec<Option<RawTable>> = vec![None; names.len()];
    while let Some(joined) = tasks.join_next().await {
        let (index, table) = joined?;
        slots[index] = Some(table?);
    }

    Ok(slots.into_iter().flatten().collect())
}

async fn fetch_postgres_table(client: &Client, name: String) -> Result<RawTable, IntrospectionError> {
    let columns = client
        .query(PG_COLUMNS, &[&name])
        .await?
        .iter()
        .map(|row| {
            Ok(PgColumnRow {
                column_name: row.try_get(0)?,
                data_type: row.try_get(1)?,
                character_maximum_length: row.try_get(2)?,
                is_nullable: row.try_get(3)?,
                column_default: row.try_get(4)?,
                constraint_type: row.try_get(5)?,
                constraint_columns: row.try_get(6)?,
            })
        })
        .collect::<Result<Vec<_>, tokio_postgres::Error>>()?;

    let foreign_keys = client
        .query(PG_FOREIGN_KEYS, &[&name])
        .await?
        .iter()
        .map(|row| {
            Ok(ForeignKeyRow {
                column: row.try_get(0)?,
                referenced_table: row.try_get(1)?,
                referenced_column: row.try_get(2)?,
                update_rule: row.try_get(3)?,
                delete_rule: row.try_get(4)?,
            })
        })
        .collect::<Result<Vec<_>, tokio_postgres::Error>>()?;

    tracing::debug!(columns = columns.len(), foreign_keys = foreign_keys.len(), "fetched");
    Ok(RawTable {
        name,
        columns: RawColumns::Postgres(columns),
        foreign_keys,
    })
}

// ── MySQL ───────────────────────────────────────────────────────

const MYSQL_FOREIGN_KEYS: &str = "
    SELECT
        k.COLUMN_NAME,
        k.REFERENCED_TABLE_NAME,
        k.REFERENCED_COLUMN_NAME,
        r.UPDATE_RULE,
        r.DELETE_RULE
    FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE k
    JOIN INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS r
        ON r.CONSTRAINT_SCHEMA = k.CONSTRAINT_SCHEMA
        AND r.CONSTRAINT_NAME = k.CONSTRAINT_NAME
        AND r.TABLE_NAME = k.TABLE_NAME
    WHERE k.TABLE_SCHEMA = ?
      AND k.TABLE_NAME = ?
      AND k.REFERENCED_TABLE_NAME IS NOT NULL
    ORDER BY k.ORDINAL_POSITION";

async fn fetch_mysql_tables(
    conn: &mut MySqlConnection,
    database: &str,
) -> Result<Vec<RawTable>, IntrospectionError> {
    let mut names = Vec::new();
    for row in sqlx::query("SHOW FULL TABLES").fetch_all(&mut *conn).await? {
        let kind = text(&row, 1)?.unwrap_or_default();
        if kind == "BASE TABLE" {
            names.push(text(&row, 0)?.unwrap_or_default());
        }
    }

    // One connection cannot serve overlapping statements, so tables go in turn.
    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let span = tracing::debug_span!("catalog.table", table = %name);
        let table = fetch_mysql_table(conn, database, name).instrument(span).await?;
        tables.push(table);
    }
    Ok(tables)
}

async fn fetch_mysql_table(
    conn: &mut MySqlConnection,
    database: &str,
    name: String,
) -> Result<RawTable, IntrospectionError> {
    let describe = format!("DESCRIBE {}", Dialect::MySql.escape_identifier(&name));
    let columns = sqlx::query(&describe)
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|row| {
            Ok(MySqlColumnRow {
                field: text(row, "Field")?.unwrap_or_default(),
                column_type: text(row, "Type")?.unwrap_or_default(),
                null: text(row, "Null")?.unwrap_or_default(),
                key: text(row, "Key")?.unwrap_or_default(),
                default: text(row, "Default")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

    let foreign_keys = sqlx::query(MYSQL_FOREIGN_KEYS)
        .bind(database)
        .bind(name.as_str())
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|row| {
            Ok(ForeignKeyRow {
                column: text(row, 0)?.unwrap_or_default(),
                referenced_table: text(row, 1)?.unwrap_or_default(),
                referenced_column: text(row, 2)?.unwrap_or_default(),
                update_rule: text(row, 3)?,
                delete_rule: text(row, 4)?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

    tracing::debug!(columns = columns.len(), foreign_keys = foreign_keys.len(), "fetched");
    Ok(RawTable {
        name,
        columns: RawColumns::MySql(columns),
        foreign_keys,
    })
}

/// Read a textual catalog cell. Depending on server version, MySQL reports
/// `SHOW`/`DESCRIBE` and `INFORMATION_SCHEMA` columns as binary strings,
/// which `String` refuses to decode.
fn text<I>(row: &MySqlRow, index: I) -> Result<Option<String>, sqlx::Error>
where
    I: ColumnIndex<MySqlRow> + Copy,
{
    match row.try_get::<Option<String>, _>(index) {
        Ok(value) => Ok(value),
        Err(sqlx::Error::ColumnDecode { .. }) => Ok(row
            .try_get::<Option<Vec<u8>>, _>(index)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) => Err(e),
    }
}
