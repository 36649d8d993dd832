use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use invoicedb_core::{DomainError, DomainResult, Entity, InvoiceId};

use crate::line_item::LineItem;

/// Invoice status, persisted as the integer `state` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Active,
    /// Soft-deactivated. The row and its line items are kept.
    Voided,
}

impl InvoiceStatus {
    pub fn as_state(self) -> i32 {
        match self {
            InvoiceStatus::Active => 1,
            InvoiceStatus::Voided => 0,
        }
    }

    pub fn from_state(state: i32) -> DomainResult<Self> {
        match state {
            1 => Ok(InvoiceStatus::Active),
            0 => Ok(InvoiceStatus::Voided),
            other => Err(DomainError::validation(format!(
                "unknown invoice state {other}"
            ))),
        }
    }
}

impl TryFrom<i32> for InvoiceStatus {
    type Error = DomainError;

    fn try_from(state: i32) -> Result<Self, Self::Error> {
        Self::from_state(state)
    }
}

/// Invoice header plus the line items loaded with it.
///
/// `items` is only populated by reads that load them; writes take the items
/// separately, so the association is by foreign key rather than ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Assigned by storage on creation, immutable afterwards.
    pub id: Option<InvoiceId>,
    pub customer: String,
    pub date: NaiveDateTime,
    pub status: InvoiceStatus,
    #[serde(default)]
    pub items: Vec<LineItem>,
}

impl Invoice {
    /// Build an unsaved, active invoice.
    pub fn new(customer: impl Into<String>, date: NaiveDateTime) -> Self {
        Self {
            id: None,
            customer: customer.into(),
            date,
            status: InvoiceStatus::Active,
            items: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: InvoiceId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_items(mut self, items: Vec<LineItem>) -> Self {
        self.items = items;
        self
    }

    /// The storage identifier, required by every operation on an existing invoice.
    pub fn require_id(&self) -> DomainResult<InvoiceId> {
        self.id
            .ok_or_else(|| DomainError::validation("invoice has not been stored yet"))
    }

    pub fn is_voided(&self) -> bool {
        self.status == InvoiceStatus::Voided
    }

    /// Sum of the loaded items' totals.
    pub fn total(&self) -> Decimal {
        self.items.iter().map(LineItem::total).sum()
    }
}

impl Entity for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> Option<InvoiceId> {
        self.id
    }
}
