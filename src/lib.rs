//! Schema introspection, `CREATE TABLE` synthesis and relationship diagrams
//! for MySQL and PostgreSQL.

pub mod commands;
pub mod db;
pub mod diagram;
pub mod error;

pub use db::{
    CascadeAction, Column, ColumnDefinition, ConnectionConfig, DatabaseInfo, Dialect, QueryResult,
    Reference, SslMode, Table,
};
pub use diagram::{Diagram, Edge, GridLayout, Node, Position};
pub use error::{DriverError, Error, IntrospectionError, Result, ValidationError};
