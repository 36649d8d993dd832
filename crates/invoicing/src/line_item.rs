use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use invoicedb_core::{Entity, InvoiceId, LineItemId};

/// A child record under an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Assigned by storage on insert.
    pub id: Option<LineItemId>,
    /// Owning invoice. Writes always use the invoice being written instead.
    pub invoice_id: Option<InvoiceId>,
    pub product: String,
    /// Expected to be non-negative; storage does not enforce it.
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn new(product: impl Into<String>, quantity: i32, unit_price: Decimal) -> Self {
        Self {
            id: None,
            invoice_id: None,
            product: product.into(),
            quantity,
            unit_price,
        }
    }

    pub fn with_id(mut self, id: LineItemId) -> Self {
        self.id = Some(id);
        self
    }

    /// Quantity × unit price. Derived, never stored.
    pub fn total(&self) -> Decimal {
        Decimal::from(self.quantity) * self.unit_price
    }
}

impl Entity for LineItem {
    type Id = LineItemId;

    fn id(&self) -> Option<LineItemId> {
        self.id
    }
}

/// Line item as read back from storage, with the total computed by the query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLineItem {
    #[serde(flatten)]
    pub item: LineItem,
    pub total: Decimal,
}

impl PricedLineItem {
    pub fn new(item: LineItem, total: Decimal) -> Self {
        Self { item, total }
    }

    pub fn into_item(self) -> LineItem {
        self.item
    }
}

/// Diff of line items applied to an existing invoice in one transaction.
///
/// Phases run in this order: removed, added, updated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemChanges {
    pub added: Vec<LineItem>,
    pub updated: Vec<LineItem>,
    pub removed: Vec<LineItem>,
}

impl LineItemChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, item: LineItem) -> Self {
        self.added.push(item);
        self
    }

    pub fn update(mut self, item: LineItem) -> Self {
        self.updated.push(item);
        self
    }

    pub fn remove(mut self, item: LineItem) -> Self {
        self.removed.push(item);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}
