use std::collections::HashMap;

use super::catalog::{self, ForeignKeyRow, MySqlColumnRow, PgColumnRow, RawColumns, RawTable};
use super::ddl::is_quoted_literal_type;
use super::{CascadeAction, Column, Connection, DatabaseInfo, Dialect, Reference, Table};
use crate::error::IntrospectionError;

pub async fn list_databases(conn: &mut Connection) -> Result<Vec<DatabaseInfo>, IntrospectionError> {
    Ok(catalog::fetch_databases(conn)
        .await?
        .into_iter()
        .map(|name| DatabaseInfo { name })
        .collect())
}

/// Introspect every base table of `database` into the canonical model.
pub async fn list_tables(conn: &mut Connection, database: &str) -> Result<Vec<Table>, IntrospectionError> {
    let dialect = conn.dialect();
    let raw = catalog::fetch_tables(conn, database).await?;
    normalize(dialect, raw)
}

/// Convert raw catalog rows into canonical tables, keeping their order.
pub fn normalize(dialect: Dialect, tables: Vec<RawTable>) -> Result<Vec<Table>, IntrospectionError> {
    tables
        .into_iter()
        .map(|raw| normalize_table(dialect, raw))
        .collect()
}

fn normalize_table(dialect: Dialect, raw: RawTable) -> Result<Table, IntrospectionError> {
    let RawTable {
        name,
        columns,
        foreign_keys,
    } = raw;

    if name.is_empty() {
        return Err(IntrospectionError::malformed("", "catalog reported an empty table name"));
    }
    let found = columns.dialect();
    if found != dialect {
        return Err(IntrospectionError::DialectMismatch {
            table: name,
            expected: dialect,
            found,
        });
    }

    let mut columns = match columns {
        RawColumns::MySql(rows) => mysql_columns(&name, rows)?,
        RawColumns::Postgres(rows) => postgres_columns(&name, rows)?,
    };
    attach_foreign_keys(&name, &mut columns, foreign_keys)?;

    tracing::debug!(table = %name, columns = columns.len(), "normalized");
    Ok(Table::new(name, columns))
}

fn mysql_columns(table: &str, rows: Vec<MySqlColumnRow>) -> Result<Vec<Column>, IntrospectionError> {
    let mut columns = Vec::with_capacity(rows.len());
    let mut seen = HashMap::new();

    for row in rows {
        if row.field.is_empty() {
            return Err(IntrospectionError::malformed(table, "column with an empty name"));
        }
        if seen.insert(row.field.clone(), columns.len()).is_some() {
            return Err(IntrospectionError::malformed(
                table,
                format!("column '{}' described twice", row.field),
            ));
        }

        let is_primary_key = row.key == "PRI";
        columns.push(Column {
            is_nullable: nullability(table, &row.field, &row.null)?,
            is_unique: is_primary_key || row.key == "UNI",
            is_primary_key,
            name: row.field,
            data_type: row.column_type,
            default_value: row.default,
            references: None,
        });
    }

    Ok(columns)
}

fn postgres_columns(table: &str, rows: Vec<PgColumnRow>) -> Result<Vec<Column>, IntrospectionError> {
    let mut columns: Vec<Column> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for row in rows {
        if row.column_name.is_empty() {
            return Err(IntrospectionError::malformed(table, "column with an empty name"));
        }

        let is_primary_key = row.constraint_type.as_deref() == Some("PRIMARY KEY");
        // Only a single-column UNIQUE constraint makes the column itself unique.
        let is_unique = row.constraint_type.as_deref() == Some("UNIQUE")
            && row.constraint_columns == Some(1);

        // One row per (column, constraint): later rows only add constraint flags.
        if let Some(&position) = positions.get(&row.column_name) {
            let column = &mut columns[position];
            column.is_primary_key |= is_primary_key;
            column.is_unique |= is_unique || is_primary_key;
            continue;
        }

        let data_type = match row.character_maximum_length {
            Some(length) => format!("{}({length})", row.data_type),
            None => row.data_type,
        };
        let default_value = row
            .column_default
            .and_then(|expr| postgres_default(expr, &data_type));
        positions.insert(row.column_name.clone(), columns.len());
        columns.push(Column {
            is_nullable: nullability(table, &row.column_name, &row.is_nullable)?,
            is_unique: is_unique || is_primary_key,
            is_primary_key,
            name: row.column_name,
            data_type,
            default_value,
            references: None,
        });
    }

    Ok(columns)
}

/// Postgres reports defaults as expressions. For types whose defaults the
/// synthesizer writes as quoted literals, a cast string literal
/// (`'it''s'::text`) is reduced to the text between its quotes (`it''s`),
/// which is what goes back between the quotes of a `DEFAULT` clause. A cast
/// `NULL` means no default. Everything else (`nextval(...)`, `now()`,
/// `'{}'::jsonb`) is kept as written.
fn postgres_default(expr: String, data_type: &str) -> Option<String> {
    if expr == "NULL" || expr.starts_with("NULL::") {
        return None;
    }
    if !is_quoted_literal_type(data_type) {
        return Some(expr);
    }
    let Some(body) = expr.strip_prefix('\'') else {
        return Some(expr);
    };

    let mut chars = body.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '\'' {
            continue;
        }
        if chars.peek().map(|&(_, next)| next) == Some('\'') {
            chars.next();
            continue;
        }
        // Closing quote: only a trailing cast may follow.
        let rest = &body[i + 1..];
        let cast_only = rest.strip_prefix("::").is_some_and(|ty| {
            ty.chars()
                .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '.' | '"' | '[' | ']'))
        });
        return if rest.is_empty() || cast_only {
            Some(body[..i].to_string())
        } else {
            Some(expr)
        };
    }
    Some(expr)
}

fn nullability(table: &str, column: &str, flag: &str) -> Result<bool, IntrospectionError> {
    match flag {
        "YES" => Ok(true),
        "NO" => Ok(false),
        other => Err(IntrospectionError::malformed(
            table,
            format!("column '{column}' has nullability flag '{other}'"),
        )),
    }
}

fn attach_foreign_keys(
    table: &str,
    columns: &mut [Column],
    rows: Vec<ForeignKeyRow>,
) -> Result<(), IntrospectionError> {
    for row in rows {
        if row.referenced_table.is_empty() || row.referenced_column.is_empty() {
            return Err(IntrospectionError::malformed(
                table,
                format!("foreign key on '{}' has no target", row.column),
            ));
        }

        let Some(column) = columns.iter_mut().find(|c| c.name == row.column) else {
            tracing::warn!(
                table,
                column = %row.column,
                "foreign key on a column the catalog did not describe; skipped"
            );
            continue;
        };

        // At most one reference per column: the first constraint wins.
        if column.references.is_some() {
            tracing::debug!(
                table,
                column = %row.column,
                referenced_table = %row.referenced_table,
                "additional foreign key on an already-referenced column ignored"
            );
            continue;
        }

        column.references = Some(Reference {
            on_delete: cascade_rule(table, row.delete_rule.as_deref())?,
            on_update: cascade_rule(table, row.update_rule.as_deref())?,
            table: row.referenced_table,
            column: row.referenced_column,
        });
    }
    Ok(())
}

fn cascade_rule(table: &str, rule: Option<&str>) -> Result<Option<CascadeAction>, IntrospectionError> {
    rule.map(|rule| {
        rule.parse::<CascadeAction>()
            .map_err(|e| IntrospectionError::malformed(table, format!("{e}")))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mysql_col(field: &str, ty: &str, null: &str, key: &str) -> MySqlColumnRow {
        MySqlColumnRow {
            field: field.into(),
            column_type: ty.into(),
            null: null.into(),
            key: key.into(),
            default: None,
        }
    }

    fn pg_col(name: &str, ty: &str, nullable: &str, constraint: Option<(&str, i64)>) -> PgColumnRow {
        PgColumnRow {
            column_name: name.into(),
            data_type: ty.into(),
            character_maximum_length: None,
            is_nullable: nullable.into(),
            column_default: None,
            constraint_type: constraint.map(|(c, _)| c.to_string()),
            constraint_columns: constraint.map(|(_, n)| n),
        }
    }

    fn fk(column: &str, table: &str, target: &str) -> ForeignKeyRow {
        ForeignKeyRow {
            column: column.into(),
            referenced_table: table.into(),
            referenced_column: target.into(),
            update_rule: Some("NO ACTION".into()),
            delete_rule: Some("CASCADE".into()),
        }
    }

    #[test]
    fn mysql_describe_rows() {
        let raw = RawTable {
            name: "orders".into(),
            columns: RawColumns::MySql(vec![
                mysql_col("id", "int", "NO", "PRI"),
                mysql_col("user_id", "int", "YES", "MUL"),
                mysql_col("code", "varchar(32)", "NO", "UNI"),
            ]),
            foreign_keys: vec![fk("user_id", "users", "id")],
        };

        let tables = normalize(Dialect::MySql, vec![raw]).unwrap();
        let orders = &tables[0];
        assert_eq!(orders.name, "orders");

        let id = orders.column("id").unwrap();
        assert!(id.is_primary_key && id.is_unique && !id.is_nullable);

        let user_id = orders.column("user_id").unwrap();
        assert!(user_id.is_nullable);
        assert!(!user_id.is_unique);
        let reference = user_id.references.as_ref().unwrap();
        assert_eq!(reference.table, "users");
        assert_eq!(reference.column, "id");
        assert_eq!(reference.on_delete, Some(CascadeAction::Cascade));
        assert_eq!(reference.on_update, Some(CascadeAction::NoAction));

        let code = orders.column("code").unwrap();
        assert_eq!(code.data_type, "varchar(32)");
        assert!(code.is_unique && !code.is_primary_key);
    }

    #[test]
    fn postgres_rows_are_merged_per_column() {
        let raw = RawTable {
            name: "accounts".into(),
            columns: RawColumns::Postgres(vec![
                pg_col("id", "integer", "NO", Some(("PRIMARY KEY", 1))),
                pg_col("email", "character varying", "NO", None),
                pg_col("tenant_id", "integer", "NO", Some(("UNIQUE", 2))),
                pg_col("slug", "text", "YES", Some(("UNIQUE", 2))),
                pg_col("slug", "text", "YES", Some(("UNIQUE", 1))),
            ]),
            foreign_keys: vec![],
        };

        let table = normalize(Dialect::Postgres, vec![raw]).unwrap().remove(0);
        let names: Vec<_> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "email", "tenant_id", "slug"]);

        assert!(table.column("id").unwrap().is_primary_key);
        // Member of a composite unique constraint only.
        assert!(!table.column("tenant_id").unwrap().is_unique);
        // Also has its own single-column unique constraint.
        assert!(table.column("slug").unwrap().is_unique);
        assert!(!table.column("email").unwrap().is_nullable);
    }

    #[test]
    fn postgres_character_length_is_folded_into_the_type() {
        let mut row = pg_col("name", "character varying", "YES", None);
        row.character_maximum_length = Some(50);
        let raw = RawTable {
            name: "t".into(),
            columns: RawColumns::Postgres(vec![row]),
            foreign_keys: vec![],
        };
        let table = normalize(Dialect::Postgres, vec![raw]).unwrap().remove(0);
        assert_eq!(table.columns[0].data_type, "character varying(50)");
    }

    #[test]
    fn composite_primary_key_columns_are_all_keys() {
        let raw = RawTable {
            name: "memberships".into(),
            columns: RawColumns::Postgres(vec![
                pg_col("user_id", "integer", "NO", Some(("PRIMARY KEY", 2))),
                pg_col("group_id", "integer", "NO", Some(("PRIMARY KEY", 2))),
            ]),
            foreign_keys: vec![],
        };
        let table = normalize(Dialect::Postgres, vec![raw]).unwrap().remove(0);
        assert_eq!(table.primary_key().count(), 2);
        assert!(table.columns.iter().all(|c| c.is_unique && !c.is_nullable));
    }

    #[test]
    fn reference_to_unknown_table_is_kept() {
        let raw = RawTable {
            name: "orders".into(),
            columns: RawColumns::Postgres(vec![pg_col("customer_id", "integer", "YES", None)]),
            foreign_keys: vec![fk("customer_id", "customers_archive", "legacy_id")],
        };
        let table = normalize(Dialect::Postgres, vec![raw]).unwrap().remove(0);
        let reference = table.columns[0].references.as_ref().unwrap();
        assert_eq!(reference.table, "customers_archive");
        assert_eq!(reference.column, "legacy_id");
    }

    #[test]
    fn first_foreign_key_wins_and_unknown_columns_are_skipped() {
        let raw = RawTable {
            name: "orders".into(),
            columns: RawColumns::MySql(vec![mysql_col("user_id", "int", "YES", "MUL")]),
            foreign_keys: vec![
                fk("user_id", "users", "id"),
                fk("user_id", "people", "id"),
                fk("ghost", "users", "id"),
            ],
        };
        let table = normalize(Dialect::MySql, vec![raw]).unwrap().remove(0);
        assert_eq!(table.columns.len(), 1);
        assert_eq!(table.columns[0].references.as_ref().unwrap().table, "users");
    }

    #[test]
    fn table_order_is_preserved() {
        let raw: Vec<_> = ["b", "a", "c"]
            .iter()
            .map(|name| RawTable {
                name: name.to_string(),
                columns: RawColumns::MySql(vec![mysql_col("id", "int", "NO", "PRI")]),
                foreign_keys: vec![],
            })
            .collect();
        let names: Vec<_> = normalize(Dialect::MySql, raw)
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, ["b", "a", "c"]);
    }

    #[test]
    fn malformed_rows_are_rejected() {
        let bad_null = RawTable {
            name: "t".into(),
            columns: RawColumns::MySql(vec![mysql_col("id", "int", "maybe", "")]),
            foreign_keys: vec![],
        };
        assert!(matches!(
            normalize(Dialect::MySql, vec![bad_null]),
            Err(IntrospectionError::MalformedRow { .. })
        ));

        let mut rule = fk("user_id", "users", "id");
        rule.delete_rule = Some("EXPLODE".into());
        let bad_rule = RawTable {
            name: "t".into(),
            columns: RawColumns::MySql(vec![mysql_col("user_id", "int", "YES", "")]),
            foreign_keys: vec![rule],
        };
        assert!(matches!(
            normalize(Dialect::MySql, vec![bad_rule]),
            Err(IntrospectionError::MalformedRow { .. })
        ));

        let empty_target = RawTable {
            name: "t".into(),
            columns: RawColumns::MySql(vec![mysql_col("user_id", "int", "YES", "")]),
            foreign_keys: vec![fk("user_id", "", "id")],
        };
        assert!(normalize(Dialect::MySql, vec![empty_target]).is_err());
    }

    #[test]
    fn dialect_mismatch() {
        let raw = RawTable {
            name: "t".into(),
            columns: RawColumns::MySql(vec![mysql_col("id", "int", "NO", "PRI")]),
            foreign_keys: vec![],
        };
        let err = normalize(Dialect::Postgres, vec![raw]).unwrap_err();
        assert!(matches!(
            err,
            IntrospectionError::DialectMismatch {
                expected: Dialect::Postgres,
                found: Dialect::MySql,
                ..
            }
        ));
    }

    #[test]
    fn postgres_literal_defaults_lose_their_cast() {
        let lit = |expr: &str| postgres_default(expr.to_string(), "text");
        assert_eq!(lit("'new'::text").as_deref(), Some("new"));
        assert_eq!(lit("'it''s'::character varying").as_deref(), Some("it''s"));
        assert_eq!(lit("'2024-01-01'::date").as_deref(), Some("2024-01-01"));
        assert_eq!(lit("'plain'").as_deref(), Some("plain"));
        assert_eq!(lit("NULL::character varying"), None);
        assert_eq!(lit("0").as_deref(), Some("0"));
        assert_eq!(lit("now()").as_deref(), Some("now()"));
        assert_eq!(
            lit("nextval('orders_id_seq'::regclass)").as_deref(),
            Some("nextval('orders_id_seq'::regclass)")
        );
        assert_eq!(lit("'a'::text || 'b'::text").as_deref(), Some("'a'::text || 'b'::text"));
    }

    #[test]
    fn unquoted_types_keep_their_default_expression() {
        let json = postgres_default("'{}'::jsonb".into(), "jsonb");
        assert_eq!(json.as_deref(), Some("'{}'::jsonb"));
        assert_eq!(postgres_default("NULL::integer".into(), "integer"), None);
        let date = postgres_default("'2024-01-01'::date".into(), "date");
        assert_eq!(date.as_deref(), Some("2024-01-01"));
    }

    #[test]
    fn postgres_default_normalized_before_synthesis() {
        let raw = RawTable {
            name: "tickets".into(),
            columns: RawColumns::Postgres(vec![PgColumnRow {
                column_default: Some("'new'::text".into()),
                ..pg_col("status", "text", "NO", None)
            }]),
            foreign_keys: vec![],
        };
        let table = normalize(Dialect::Postgres, vec![raw]).unwrap().remove(0);
        let status = table.column("status").unwrap();
        assert_eq!(status.default_value.as_deref(), Some("new"));

        let sql = crate::db::synthesize(
            Dialect::Postgres,
            "tickets",
            &[crate::db::ColumnDefinition::from(status)],
        )
        .unwrap();
        assert!(sql.contains("\"status\" text NOT NULL DEFAULT 'new'"), "{sql}");

        let quoted = RawTable {
            name: "notes".into(),
            columns: RawColumns::Postgres(vec![PgColumnRow {
                column_default: Some("'it''s'::text".into()),
                ..pg_col("body", "text", "YES", None)
            }]),
            foreign_keys: vec![],
        };
        let table = normalize(Dialect::Postgres, vec![quoted]).unwrap().remove(0);
        let defs: Vec<_> = table.columns.iter().map(crate::db::ColumnDefinition::from).collect();
        let sql = crate::db::synthesize(Dialect::Postgres, "notes", &defs).unwrap();
        assert!(sql.contains("\"body\" text DEFAULT 'it''s'"), "{sql}");
    }
}
