//! Invoicing entities.
//!
//! Plain records passed into and returned from the invoice store. This crate
//! holds no IO; persistence lives in `invoicedb-infra`.

pub mod invoice;
pub mod line_item;

pub use invoice::{Invoice, InvoiceStatus};
pub use line_item::{LineItem, LineItemChanges, PricedLineItem};
