use std::sync::Arc;

use invoicedb_core::InvoiceId;
use invoicedb_invoicing::{Invoice, InvoiceStatus, LineItem, LineItemChanges, PricedLineItem};

use crate::db::QueryResult;
use crate::error::StoreError;

/// Runs ad hoc read queries and returns a generic tabular result.
///
/// Failures are passed through unwrapped; there is no transaction to undo.
pub trait QueryRunner: Send + Sync {
    fn run_query(&self, sql: &str) -> Result<QueryResult, StoreError>;
}

/// Data-access contract for invoices and their line items.
///
/// ## Write Semantics
///
/// `create_invoice_with_items`, `update_invoice_with_items` and `void_invoice`
/// each wrap their statements in a single transaction:
/// - every statement succeeds and the transaction commits, or
/// - the first failure rolls back everything and `StoreError::Storage` is returned
///   with the operation and the original cause attached.
///
/// Nothing is retried. Argument problems are reported as `StoreError::InvalidInput`
/// before any database work happens.
///
/// ## Read Semantics
///
/// Reads are single statements outside any transaction; failures are passed
/// through unwrapped. Unknown invoice identifiers read as empty, never as errors.
///
/// ## Concurrency
///
/// Calls block until the database answers. No locking or caching happens here;
/// concurrent callers are isolated by the database's own transactions.
pub trait InvoiceStore: Send + Sync {
    /// Insert an invoice and its initial line items, returning the new identifier.
    ///
    /// Items are inserted in the given order under the new identifier; any `id`
    /// or `invoice_id` already set on them is ignored. Fails with `InvalidInput`
    /// when `items` is empty.
    fn create_invoice_with_items(
        &self,
        invoice: &Invoice,
        items: &[LineItem],
    ) -> Result<InvoiceId, StoreError>;

    /// Apply an edit to a stored invoice in one transaction.
    ///
    /// Phases, in order: update customer/date, delete `removed`, insert `added`
    /// under the invoice's identifier, update `updated` by identifier. Empty
    /// lists skip their phase.
    fn update_invoice_with_items(
        &self,
        invoice: &Invoice,
        changes: &LineItemChanges,
    ) -> Result<(), StoreError>;

    /// Line items of an invoice with their computed totals, in storage order.
    fn items_for_invoice(&self, invoice_id: InvoiceId) -> Result<Vec<PricedLineItem>, StoreError>;

    /// Mark a stored invoice as voided. Voiding twice is not an error.
    fn void_invoice(&self, invoice: &Invoice) -> Result<(), StoreError>;

    /// One invoice with its line items loaded, or `None` if it does not exist.
    fn get_invoice(&self, invoice_id: InvoiceId) -> Result<Option<Invoice>, StoreError>;

    /// Invoice headers ordered by identifier, optionally filtered by status.
    fn list_invoices(&self, status: Option<InvoiceStatus>) -> Result<Vec<Invoice>, StoreError>;
}

impl<S> InvoiceStore for Arc<S>
where
    S: InvoiceStore + ?Sized,
{
    fn create_invoice_with_items(
        &self,
        invoice: &Invoice,
        items: &[LineItem],
    ) -> Result<InvoiceId, StoreError> {
        (**self).create_invoice_with_items(invoice, items)
    }

    fn update_invoice_with_items(
        &self,
        invoice: &Invoice,
        changes: &LineItemChanges,
    ) -> Result<(), StoreError> {
        (**self).update_invoice_with_items(invoice, changes)
    }

    fn items_for_invoice(&self, invoice_id: InvoiceId) -> Result<Vec<PricedLineItem>, StoreError> {
        (**self).items_for_invoice(invoice_id)
    }

    fn void_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        (**self).void_invoice(invoice)
    }

    fn get_invoice(&self, invoice_id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        (**self).get_invoice(invoice_id)
    }

    fn list_invoices(&self, status: Option<InvoiceStatus>) -> Result<Vec<Invoice>, StoreError> {
        (**self).list_invoices(status)
    }
}
