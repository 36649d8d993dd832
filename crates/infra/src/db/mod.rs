//! Database adapters: connection factory and the generic tabular result type.

pub mod connection;
pub mod tabular;

pub use connection::{ConnectionFactory, PgConnectionFactory};
pub use tabular::{CellValue, QueryResult, QueryRow};
