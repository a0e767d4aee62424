//! `CREATE TABLE` synthesis.
//!
//! Pure string building: nothing here talks to a server. The output layout
//! is fixed (column definitions, then one `PRIMARY KEY`, then one
//! `FOREIGN KEY` per referencing column) so statements can be compared
//! byte for byte.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{Column, Dialect, Reference};
use crate::error::ValidationError;

/// One column as submitted by the table form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    /// Appended as `type(length)` for character types only.
    pub length: Option<String>,
    pub is_primary_key: bool,
    pub is_nullable: bool,
    pub is_unique: bool,
    pub default_value: Option<String>,
    pub is_foreign_key: bool,
    pub references: Option<Reference>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            ..Default::default()
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.is_nullable = false;
        self.is_unique = true;
        self
    }

    pub fn length(mut self, length: impl Into<String>) -> Self {
        self.length = Some(length.into());
        self
    }

    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn references(mut self, reference: Reference) -> Self {
        self.is_foreign_key = true;
        self.references = Some(reference);
        self
    }
}

impl From<&Column> for ColumnDefinition {
    fn from(column: &Column) -> Self {
        Self {
            name: column.name.clone(),
            data_type: column.data_type.clone(),
            length: None,
            is_primary_key: column.is_primary_key,
            is_nullable: column.is_nullable,
            is_unique: column.is_unique,
            default_value: column.default_value.clone(),
            is_foreign_key: column.is_foreign_key(),
            references: column.references.clone(),
        }
    }
}

/// Build the `CREATE TABLE` statement for `table_name` in `dialect`.
pub fn synthesize(
    dialect: Dialect,
    table_name: &str,
    columns: &[ColumnDefinition],
) -> Result<String, ValidationError> {
    validate(table_name, columns)?;
    let quote = |ident: &str| dialect.quote_identifier(ident);

    let mut parts = Vec::with_capacity(columns.len() + 1);
    for column in columns {
        parts.push(column_definition(dialect, column)?);
    }

    let primary_key = columns
        .iter()
        .filter(|c| c.is_primary_key)
        .map(|c| quote(&c.name))
        .collect::<Result<Vec<_>, _>>()?;
    if !primary_key.is_empty() {
        parts.push(format!("PRIMARY KEY ({})", primary_key.join(", ")));
    }

    for column in columns.iter().filter(|c| c.is_foreign_key) {
        let reference = column
            .references
            .as_ref()
            .ok_or_else(|| ValidationError::MissingReference(column.name.clone()))?;
        let mut clause = format!(
            "FOREIGN KEY ({}) REFERENCES {}({})",
            quote(&column.name)?,
            quote(&reference.table)?,
            quote(&reference.column)?,
        );
        if let Some(action) = reference.on_delete {
            clause.push_str(" ON DELETE ");
            clause.push_str(action.as_sql());
        }
        if let Some(action) = reference.on_update {
            clause.push_str(" ON UPDATE ");
            clause.push_str(action.as_sql());
        }
        parts.push(clause);
    }

    Ok(format!(
        "CREATE TABLE {} (\n{}\n)",
        quote(table_name)?,
        parts.join(",\n")
    ))
}

fn validate(table_name: &str, columns: &[ColumnDefinition]) -> Result<(), ValidationError> {
    if table_name.is_empty() {
        return Err(ValidationError::EmptyTableName);
    }
    if columns.is_empty() {
        return Err(ValidationError::NoColumns);
    }

    let mut seen = HashSet::new();
    for (position, column) in columns.iter().enumerate() {
        if column.name.is_empty() {
            return Err(ValidationError::EmptyColumnName { position });
        }
        if !seen.insert(column.name.as_str()) {
            return Err(ValidationError::DuplicateColumn(column.name.clone()));
        }
        if column.is_foreign_key {
            match &column.references {
                None => return Err(ValidationError::MissingReference(column.name.clone())),
                Some(r) if r.table.is_empty() || r.column.is_empty() => {
                    return Err(ValidationError::EmptyReference(column.name.clone()))
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

fn column_definition(dialect: Dialect, column: &ColumnDefinition) -> Result<String, ValidationError> {
    let mut def = format!("{} {}", dialect.quote_identifier(&column.name)?, column.data_type);

    if let Some(length) = column.length.as_deref().map(str::trim) {
        if !length.is_empty() && is_character_type(&column.data_type) && !column.data_type.contains('(') {
            def.push_str(&format!("({length})"));
        }
    }
    if !column.is_nullable || column.is_primary_key {
        def.push_str(" NOT NULL");
    }
    if column.is_unique && !column.is_primary_key {
        def.push_str(" UNIQUE");
    }
    if let Some(value) = column.default_value.as_deref().filter(|v| !v.is_empty()) {
        if is_quoted_literal_type(&column.data_type) {
            def.push_str(&format!(" DEFAULT '{value}'"));
        } else {
            def.push_str(&format!(" DEFAULT {value}"));
        }
    }

    Ok(def)
}

/// Lowercased type name without parameters: `VARCHAR(20)` -> `varchar`.
fn base_type(data_type: &str) -> String {
    data_type
        .split('(')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn is_character_type(data_type: &str) -> bool {
    base_type(data_type).contains("char")
}

// Character, text and date/time families take quoted default literals.
pub(crate) fn is_quoted_literal_type(data_type: &str) -> bool {
    let base = base_type(data_type);
    base.contains("char")
        || base.contains("text")
        || base.starts_with("date")
        || base.starts_with("time")
        || base == "year"
}
