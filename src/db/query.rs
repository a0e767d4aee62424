use postgres_types::{FromSql, Type};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::mysql::{MySql, MySqlConnection, MySqlRow};
use sqlx::{Column as _, Decode, Executor as _, Row as _, Statement as _, TypeInfo as _, ValueRef as _};
use std::error::Error as StdError;
use std::time::Instant;
use tokio_postgres::{Client, Row};
use tracing::Instrument;

use super::Connection;
use crate::error::DriverError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Result-set fields in server order.
    pub columns: Vec<String>,
    /// One map per row; SQL `NULL` is `Value::Null`, never an empty string.
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
    pub execution_time_ms: u128,
}

/// Run `sql` exactly as given. No parsing, rewriting or validation happens
/// here, so callers own the safety of whatever they send.
pub async fn execute_query(conn: &mut Connection, sql: &str) -> Result<QueryResult, DriverError> {
    let span = tracing::debug_span!(
        "db.query",
        dialect = %conn.dialect(),
        sql = %sql,
        rows = tracing::field::Empty,
    );
    let start = Instant::now();

    let (columns, rows) = match conn {
        Connection::Postgres(pg) => execute_postgres(pg.client(), sql).instrument(span.clone()).await?,
        Connection::MySql(conn) => execute_mysql(conn, sql).instrument(span.clone()).await?,
    };

    let execution_time_ms = start.elapsed().as_millis();
    span.record("rows", rows.len());

    Ok(QueryResult {
        columns,
        row_count: rows.len(),
        rows,
        execution_time_ms,
    })
}

// ── PostgreSQL ──────────────────────────────────────────────────

async fn execute_postgres(
    client: &Client,
    sql: &str,
) -> Result<(Vec<String>, Vec<Map<String, Value>>), DriverError> {
    let stmt = client.prepare(sql).await?;
    let rows = client.query(&stmt, &[]).await?;

    let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();

    let mut result_rows = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut values = Map::with_capacity(columns.len());
        for (i, col) in stmt.columns().iter().enumerate() {
            values.insert(col.name().to_string(), pg_value_to_json(row, i, col.type_()));
        }
        result_rows.push(values);
    }

    Ok((columns, result_rows))
}

fn pg_value_to_json(row: &Row, idx: usize, pg_type: &Type) -> Value {
    let value = match *pg_type {
        Type::BOOL => decode(row, idx, Value::Bool),
        Type::INT2 => decode(row, idx, |v: i16| Value::Number(v.into())),
        Type::INT4 => decode(row, idx, |v: i32| Value::Number(v.into())),
        Type::INT8 => decode(row, idx, |v: i64| Value::Number(v.into())),
        Type::OID => decode(row, idx, |v: u32| Value::Number(v.into())),
        Type::FLOAT4 => decode(row, idx, |v: f32| float(v as f64)),
        Type::FLOAT8 => decode(row, idx, float),
        Type::NUMERIC => decode(row, idx, |v: PgNumeric| Value::String(v.0)),
        Type::JSON | Type::JSONB => decode(row, idx, |v: Value| v),
        Type::TIMESTAMP => decode(row, idx, |v: chrono::NaiveDateTime| Value::String(v.to_string())),
        Type::TIMESTAMPTZ => decode(row, idx, |v: chrono::DateTime<chrono::Utc>| {
            Value::String(v.to_rfc3339())
        }),
        Type::DATE => decode(row, idx, |v: chrono::NaiveDate| Value::String(v.to_string())),
        Type::TIME => decode(row, idx, |v: chrono::NaiveTime| Value::String(v.to_string())),
        Type::UUID => decode(row, idx, |v: uuid::Uuid| Value::String(v.to_string())),
        Type::BYTEA => decode(row, idx, |v: Vec<u8>| Value::String(hex_literal(&v))),
        _ => decode(row, idx, Value::String),
    };

    // Types without a JSON mapping are still reported as present.
    value.unwrap_or_else(|| match row.try_get::<_, Option<Opaque>>(idx) {
        Ok(None) => Value::Null,
        _ => Value::String(format!("<{}>", pg_type.name())),
    })
}

/// `Some(Value::Null)` for SQL `NULL`, `None` when `T` cannot decode the column.
fn decode<'a, T, F>(row: &'a Row, idx: usize, into: F) -> Option<Value>
where
    T: FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    match row.try_get::<_, Option<T>>(idx) {
        Ok(Some(v)) => Some(into(v)),
        Ok(None) => Some(Value::Null),
        Err(_) => None,
    }
}

fn float(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(v.to_string()))
}

fn hex_literal(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Accepts any type; only used to tell `NULL` apart from an undecodable value.
struct Opaque;

impl<'a> FromSql<'a> for Opaque {
    fn from_sql(_: &Type, _: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(Opaque)
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

/// `numeric` rendered in its exact decimal form.
struct PgNumeric(String);

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        let word = |i: usize| -> Result<u16, Box<dyn StdError + Sync + Send>> {
            raw.get(i * 2..i * 2 + 2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .ok_or_else(|| "truncated numeric value".into())
        };

        let ndigits = word(0)? as usize;
        let weight = word(1)? as i16 as i32;
        let sign = word(2)?;
        let dscale = word(3)? as usize;
        let digits = (0..ndigits)
            .map(|i| word(4 + i))
            .collect::<Result<Vec<_>, _>>()?;

        match sign {
            NUMERIC_NAN => return Ok(PgNumeric("NaN".into())),
            NUMERIC_PINF => return Ok(PgNumeric("Infinity".into())),
            NUMERIC_NINF => return Ok(PgNumeric("-Infinity".into())),
            _ => {}
        }

        // Digits are base-10000 groups; group `i` is worth 10000^(weight - i).
        let group = |i: i32| -> u16 {
            usize::try_from(i)
                .ok()
                .and_then(|i| digits.get(i).copied())
                .unwrap_or(0)
        };

        let mut out = String::new();
        if sign == NUMERIC_NEG {
            out.push('-');
        }
        if weight < 0 {
            out.push('0');
        } else {
            out.push_str(&group(0).to_string());
            for i in 1..=weight {
                out.push_str(&format!("{:04}", group(i)));
            }
        }

        if dscale > 0 {
            let mut fraction = String::with_capacity(dscale + 4);
            let mut i = weight + 1;
            while fraction.len() < dscale {
                fraction.push_str(&format!("{:04}", group(i)));
                i += 1;
            }
            fraction.truncate(dscale);
            out.push('.');
            out.push_str(&fraction);
        }

        Ok(PgNumeric(out))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

// ── MySQL ───────────────────────────────────────────────────────

async fn execute_mysql(
    conn: &mut MySqlConnection,
    sql: &str,
) -> Result<(Vec<String>, Vec<Map<String, Value>>), DriverError> {
    let rows = sqlx::raw_sql(sql).fetch_all(&mut *conn).await?;
    let columns = match rows.first() {
        Some(row) => column_names(row.columns()),
        None => describe_mysql(conn, sql).await,
    };
    Ok((columns, mysql_rows(&rows)))
}

/// Result-set fields of `sql` without running it again. Statements the
/// server refuses to prepare (several statements in one string, some admin
/// commands) report no fields.
async fn describe_mysql(conn: &mut MySqlConnection, sql: &str) -> Vec<String> {
    match (&mut *conn).prepare(sql).await {
        Ok(statement) => column_names(statement.columns()),
        Err(e) => {
            tracing::debug!(error = %e, "statement could not be described");
            Vec::new()
        }
    }
}

fn column_names<C: sqlx::Column>(columns: &[C]) -> Vec<String> {
    columns.iter().map(|c| c.name().to_string()).collect()
}

/// Rows from the text protocol carry every value as its textual form.
fn mysql_rows(rows: &[MySqlRow]) -> Vec<Map<String, Value>> {
    rows.iter()
        .map(|row| {
            row.columns()
                .iter()
                .enumerate()
                .map(|(i, col)| {
                    let value = mysql_value_to_json(row, i, col.type_info().name());
                    (col.name().to_string(), value)
                })
                .collect()
        })
        .collect()
}

fn mysql_value_to_json(row: &MySqlRow, idx: usize, type_name: &str) -> Value {
    let opaque = || Value::String(format!("<{type_name}>"));
    let text = match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => <&str as Decode<'_, MySql>>::decode(raw),
        Err(_) => return opaque(),
    };
    let text = match text {
        Ok(text) => text,
        Err(_) => {
            return match row.try_get_raw(idx).map(<&[u8] as Decode<'_, MySql>>::decode) {
                Ok(Ok(bytes)) => Value::String(hex_literal(bytes)),
                _ => opaque(),
            }
        }
    };

    let base = type_name.split_whitespace().next().unwrap_or_default();
    let value = match base {
        "BOOLEAN" => Some(Value::Bool(text != "0")),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            if type_name.ends_with("UNSIGNED") {
                text.parse::<u64>().ok().map(Value::from)
            } else {
                text.parse::<i64>().ok().map(Value::from)
            }
        }
        "FLOAT" | "DOUBLE" => text.parse::<f64>().ok().map(float),
        _ => None,
    };

    value.unwrap_or_else(|| Value::String(text.to_string()))
}
