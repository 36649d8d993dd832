//! Invoice store error model.
//!
//! ## Error Categories
//!
//! - **InvalidInput**: the caller's arguments were rejected before any database work
//! - **Storage**: a transactional operation failed; its transaction was rolled back
//! - **RollbackFailed**: a transactional operation failed and so did the rollback
//! - **Database**: a plain read failed (no transaction involved), passed through as-is
//! - **Config**: connection settings could not be turned into connect options
//! - **Runtime**: the blocking runtime backing the synchronous API could not start

use thiserror::Error;

use invoicedb_core::DomainError;

use crate::config::ConfigError;

/// Boxed originating error carried by transactional failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Transactional operations, used to label `StoreError::Storage`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    CreateInvoice,
    UpdateInvoice,
    VoidInvoice,
}

impl StoreOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreOperation::CreateInvoice => "create_invoice_with_items",
            StoreOperation::UpdateInvoice => "update_invoice_with_items",
            StoreOperation::VoidInvoice => "void_invoice",
        }
    }

    fn failure_message(self) -> &'static str {
        match self {
            StoreOperation::CreateInvoice => "failed to insert the invoice and its line items",
            StoreOperation::UpdateInvoice => "failed to update the invoice and its line items",
            StoreOperation::VoidInvoice => "failed to void the invoice",
        }
    }
}

impl core::fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice store operation error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{}; transaction rolled back", .operation.failure_message())]
    Storage {
        operation: StoreOperation,
        #[source]
        cause: BoxError,
    },

    #[error("{}; rollback failed as well: {rollback}", .operation.failure_message())]
    RollbackFailed {
        operation: StoreOperation,
        #[source]
        cause: BoxError,
        rollback: BoxError,
    },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to start the store runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl StoreError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn storage(operation: StoreOperation, cause: impl Into<BoxError>) -> Self {
        Self::Storage {
            operation,
            cause: cause.into(),
        }
    }

    pub fn rollback_failed(
        operation: StoreOperation,
        cause: impl Into<BoxError>,
        rollback: impl Into<BoxError>,
    ) -> Self {
        Self::RollbackFailed {
            operation,
            cause: cause.into(),
            rollback: rollback.into(),
        }
    }

    /// The transactional operation that failed, if any.
    pub fn operation(&self) -> Option<StoreOperation> {
        match self {
            StoreError::Storage { operation, .. }
            | StoreError::RollbackFailed { operation, .. } => Some(*operation),
            _ => None,
        }
    }
}

impl From<DomainError> for StoreError {
    fn from(err: DomainError) -> Self {
        StoreError::InvalidInput(err.to_string())
    }
}
