//! Checks that need a running server. Each test reads a JSON
//! `ConnectionConfig` (database included) from its environment variable and
//! returns early when the variable is unset, e.g.
//!
//! ```text
//! SCHEMASCOPE_MYSQL='{"type":"mysql","host":"127.0.0.1","user":"root","password":"root","database":"test"}'
//! ```

use schemascope::commands;
use schemascope::db::{self, Connection};
use schemascope::ConnectionConfig;

fn config(var: &str) -> Option<ConnectionConfig> {
    let json = std::env::var(var).ok()?;
    Some(serde_json::from_str(&json).expect("valid ConnectionConfig JSON"))
}

#[tokio::test]
async fn mysql_empty_result_still_lists_fields() {
    let Some(config) = config("SCHEMASCOPE_MYSQL") else {
        return;
    };
    let database = config.database.clone().expect("database in config");

    let mut conn = Connection::open(&config, Some(&database)).await.unwrap();
    conn.execute_statement(
        "CREATE TEMPORARY TABLE empty_fields (id INT PRIMARY KEY, label VARCHAR(20))",
    )
    .await
    .unwrap();

    let result = db::execute_query(&mut conn, "SELECT id, label FROM empty_fields WHERE 1 = 0")
        .await
        .unwrap();
    conn.close().await;

    assert_eq!(result.columns, vec!["id", "label"]);
    assert!(result.rows.is_empty());
    assert_eq!(result.row_count, 0);
}

#[tokio::test]
async fn postgres_empty_result_still_lists_fields() {
    let Some(config) = config("SCHEMASCOPE_POSTGRES") else {
        return;
    };
    let database = config.database.clone().expect("database in config");

    let result = commands::execute_query(
        &config,
        &database,
        "SELECT 1 AS id, 'x'::text AS label WHERE false",
    )
    .await
    .unwrap();

    assert_eq!(result.columns, vec!["id", "label"]);
    assert!(result.rows.is_empty());
}
