mod catalog;
mod connection;
mod ddl;
mod dialect;
mod introspection;
mod model;
mod query;

pub use catalog::{ForeignKeyRow, MySqlColumnRow, PgColumnRow, RawColumns, RawTable};
pub use connection::*;
pub use ddl::*;
pub use dialect::*;
pub use introspection::*;
pub use model::*;
pub use query::*;
