//! Canonical, dialect-independent schema model.
//!
//! Every catalog, whatever the server, is normalized into these types before
//! the DDL synthesizer or the diagram builder sees it.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    /// Build a table, forcing every primary-key column to be non-null and unique.
    ///
    /// This is the constructor that keeps that invariant; code that fills the
    /// public fields directly (a `Table { .. }` literal) must run
    /// [`Column::enforce_key_invariants`] itself. The normalizer, the diagram
    /// builder and `ColumnDefinition::from` rely on it.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns: columns
                .into_iter()
                .map(Column::enforce_key_invariants)
                .collect(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.is_primary_key)
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = (&Column, &Reference)> {
        self.columns
            .iter()
            .filter_map(|c| c.references.as_ref().map(|r| (c, r)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Type as reported by the server, parameters included (`varchar(255)`).
    pub data_type: String,
    pub is_primary_key: bool,
    pub is_nullable: bool,
    pub is_unique: bool,
    pub default_value: Option<String>,
    /// Present exactly when the column is a foreign key.
    pub references: Option<Reference>,
}

impl Column {
    /// A plain nullable column with no constraints.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_primary_key: false,
            is_nullable: true,
            is_unique: false,
            default_value: None,
            references: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.enforce_key_invariants()
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
        self.references = Some(reference);
        self
    }

    pub fn is_foreign_key(&self) -> bool {
        self.references.is_some()
    }

    pub fn enforce_key_invariants(mut self) -> Self {
        if self.is_primary_key {
            self.is_nullable = false;
            self.is_unique = true;
        }
        self
    }
}

// `isForeignKey` is derived from `references`, so it is written out by hand.
impl Serialize for Column {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Column", 8)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("type", &self.data_type)?;
        s.serialize_field("isPrimaryKey", &self.is_primary_key)?;
        s.serialize_field("isNullable", &self.is_nullable)?;
        s.serialize_field("isUnique", &self.is_unique)?;
        s.serialize_field("defaultValue", &self.default_value)?;
        s.serialize_field("isForeignKey", &self.is_foreign_key())?;
        s.serialize_field("references", &self.references)?;
        s.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub table: String,
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<CascadeAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update: Option<CascadeAction>,
}

impl Reference {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            on_delete: None,
            on_update: None,
        }
    }

    pub fn on_delete(mut self, action: CascadeAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    pub fn on_update(mut self, action: CascadeAction) -> Self {
        self.on_update = Some(action);
        self
    }
}

/// Referential action applied when the referenced row is deleted or updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CascadeAction {
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
    NoAction,
}

impl CascadeAction {
    pub fn as_sql(self) -> &'static str {
        match self {
            CascadeAction::Cascade => "CASCADE",
            CascadeAction::SetNull => "SET NULL",
            CascadeAction::SetDefault => "SET DEFAULT",
            CascadeAction::Restrict => "RESTRICT",
            CascadeAction::NoAction => "NO ACTION",
        }
    }
}

impl fmt::Display for CascadeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown referential action '{0}'")]
pub struct UnknownCascadeAction(pub String);

impl FromStr for CascadeAction {
    type Err = UnknownCascadeAction;

    /// Accepts `SET NULL` as well as `SET_NULL`, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('_', " ").to_ascii_uppercase();
        match normalized.as_str() {
            "CASCADE" => Ok(CascadeAction::Cascade),
            "SET NULL" => Ok(CascadeAction::SetNull),
            "SET DEFAULT" => Ok(CascadeAction::SetDefault),
            "RESTRICT" => Ok(CascadeAction::Restrict),
            "NO ACTION" => Ok(CascadeAction::NoAction),
            _ => Err(UnknownCascadeAction(s.to_string())),
        }
    }
}

impl TryFrom<String> for CascadeAction {
    type Error = UnknownCascadeAction;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CascadeAction> for String {
    fn from(action: CascadeAction) -> Self {
        action.as_sql().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_key_is_never_nullable() {
        let col = Column::new("id", "integer").primary_key();
        assert!(col.is_primary_key);
        assert!(!col.is_nullable);
        assert!(col.is_unique);

        let mut raw = Column::new("id", "integer");
        raw.is_primary_key = true;
        let table = Table::new("t", vec![raw]);
        assert!(!table.columns[0].is_nullable);
        assert!(table.columns[0].is_unique);
    }

    #[test]
    fn foreign_key_flag_follows_reference() {
        let plain = Column::new("name", "text");
        assert!(!plain.is_foreign_key());

        let fk = Column::new("user_id", "integer").references(Reference::new("users", "id"));
        assert!(fk.is_foreign_key());
    }

    #[test]
    fn cascade_action_spellings() {
        assert_eq!("SET NULL".parse::<CascadeAction>().unwrap(), CascadeAction::SetNull);
        assert_eq!("set_null".parse::<CascadeAction>().unwrap(), CascadeAction::SetNull);
        assert_eq!("No Action".parse::<CascadeAction>().unwrap(), CascadeAction::NoAction);
        assert!("DROP".parse::<CascadeAction>().is_err());
        assert_eq!(CascadeAction::SetDefault.to_string(), "SET DEFAULT");
    }

    #[test]
    fn column_serializes_in_camel_case() {
        let col = Column::new("user_id", "integer")
            .not_null()
            .references(Reference::new("users", "id").on_delete(CascadeAction::Cascade));
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(json["type"], "integer");
        assert_eq!(json["isForeignKey"], true);
        assert_eq!(json["isNullable"], false);
        assert_eq!(json["references"]["table"], "users");
        assert_eq!(json["references"]["onDelete"], "CASCADE");
        assert!(json["references"].get("onUpdate").is_none());
    }

    #[test]
    fn reference_deserializes_underscored_actions() {
        let r: Reference = serde_json::from_str(
            r#"{"table":"users","column":"id","onDelete":"SET_NULL","onUpdate":"CASCADE"}"#,
        )
        .unwrap();
        assert_eq!(r.on_delete, Some(CascadeAction::SetNull));
        assert_eq!(r.on_update, Some(CascadeAction::Cascade));
    }

    #[test]
    fn table_new_repairs_hand_built_key_columns() {
        let loose = Column {
            is_primary_key: true,
            is_nullable: true,
            is_unique: false,
            ..Column::new("id", "int")
        };
        let table = Table::new("t", vec![loose.clone()]);
        let id = table.column("id").unwrap();
        assert!(!id.is_nullable);
        assert!(id.is_unique);

        // A literal skips the repair.
        let literal = Table {
            name: "t".into(),
            columns: vec![loose],
        };
        assert!(literal.columns[0].is_nullable);
    }
}
