//! Invoice store boundary.
//!
//! `InvoiceStore` is the synchronous, blocking contract for writing and reading
//! invoices with their line items. Every write runs in one all-or-nothing
//! transaction on a connection used only by that call.

pub mod in_memory;
pub mod postgres;
pub mod queries;
pub mod r#trait;

pub use in_memory::{ConstraintViolation, InMemoryInvoiceStore};
pub use postgres::PostgresInvoiceStore;
pub use r#trait::{InvoiceStore, QueryRunner};

use invoicedb_core::InvoiceId;
use invoicedb_invoicing::{Invoice, LineItem, LineItemChanges};

use crate::error::StoreError;

/// Argument checks shared by every implementation of the insert path.
pub(crate) fn validate_new_invoice(items: &[LineItem]) -> Result<(), StoreError> {
    if items.is_empty() {
        return Err(StoreError::invalid_input(
            "an invoice must be created with at least one line item",
        ));
    }
    Ok(())
}

/// Argument checks shared by every implementation of the update path.
///
/// Updated and removed items are addressed by identifier, so they must carry one.
pub(crate) fn validate_changes(
    invoice: &Invoice,
    changes: &LineItemChanges,
) -> Result<InvoiceId, StoreError> {
    let invoice_id = invoice.require_id()?;

    let missing = changes
        .updated
        .iter()
        .chain(changes.removed.iter())
        .position(|item| item.id.is_none());
    if let Some(idx) = missing {
        return Err(StoreError::invalid_input(format!(
            "updated and removed line items need an identifier (index {idx})"
        )));
    }

    Ok(invoice_id)
}
