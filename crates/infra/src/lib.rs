//! Infrastructure layer: database access for invoices and their line items.

pub mod config;
pub mod db;
pub mod error;
pub mod invoice_store;

pub use config::{ConfigError, StoreConfig};
pub use db::{CellValue, ConnectionFactory, PgConnectionFactory, QueryResult, QueryRow};
pub use error::{BoxError, StoreError, StoreOperation};
pub use invoice_store::{
    ConstraintViolation, InMemoryInvoiceStore, InvoiceStore, PostgresInvoiceStore, QueryRunner,
};
