//! Relationship graph of a loaded schema: one node per table, one edge per
//! foreign key whose target table is part of the same set.

use serde::Serialize;
use std::collections::HashSet;

use crate::db::{Column, Table};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: String,
    pub label: String,
    pub position: Position,
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    /// Referencing column.
    pub source_handle: String,
    /// Referenced column.
    pub target_handle: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Diagram {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Row-major grid used to place nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct GridLayout {
    pub columns: usize,
    pub start_x: f64,
    pub start_y: f64,
    pub x_gap: f64,
    pub y_gap: f64,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self {
            columns: 3,
            start_x: 50.0,
            start_y: 50.0,
            x_gap: 350.0,
            y_gap: 300.0,
        }
    }
}

impl GridLayout {
    pub fn position(&self, index: usize) -> Position {
        let columns = self.columns.max(1);
        let (row, col) = (index / columns, index % columns);
        Position {
            x: self.start_x + col as f64 * self.x_gap,
            y: self.start_y + row as f64 * self.y_gap,
        }
    }
}

pub fn build(tables: &[Table]) -> Diagram {
    build_with(tables, &GridLayout::default())
}

pub fn build_with(tables: &[Table], layout: &GridLayout) -> Diagram {
    let nodes = tables
        .iter()
        .enumerate()
        .map(|(i, table)| Node {
            id: table.name.clone(),
            label: table.name.clone(),
            position: layout.position(i),
            columns: table.columns.clone(),
        })
        .collect();

    let present: HashSet<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    let mut edges = Vec::new();
    for table in tables {
        for (column, reference) in table.foreign_keys() {
            if !present.contains(reference.table.as_str()) {
                continue;
            }
            edges.push(Edge {
                id: edge_id(&table.name, &column.name, &reference.table, &reference.column),
                source: table.name.clone(),
                target: reference.table.clone(),
                source_handle: column.name.clone(),
                target_handle: reference.column.clone(),
                label: format!("{} → {}", column.name, reference.column),
            });
        }
    }

    tracing::debug!(nodes = tables.len(), edges = edges.len(), "diagram built");
    Diagram { nodes, edges }
}

/// `source-column-target-column`, with `\` and `-` inside each part
/// escaped by a `\` so distinct foreign keys never share an id.
fn edge_id(source: &str, column: &str, target: &str, target_column: &str) -> String {
    [source, column, target, target_column]
        .iter()
        .map(|part| part.replace('\\', "\\\\").replace('-', "\\-"))
        .collect::<Vec<_>>()
        .join("-")
}

/// Tables whose name contains `query`, ignoring case. A blank query keeps all.
pub fn filter_tables<'a>(tables: &'a [Table], query: &str) -> Vec<&'a Table> {
    let query = query.trim().to_lowercase();
    tables
        .iter()
        .filter(|t| query.is_empty() || t.name.to_lowercase().contains(&query))
        .collect()
}

/// The named tables, kept in input order. Unknown names are ignored.
pub fn select_tables(tables: &[Table], names: &[String]) -> Vec<Table> {
    let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
    tables
        .iter()
        .filter(|t| wanted.contains(t.name.as_str()))
        .cloned()
        .collect()
}
