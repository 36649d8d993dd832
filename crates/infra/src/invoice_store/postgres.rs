//! Postgres-backed invoice store implementation.
//!
//! Every public operation opens its own connection through a
//! [`ConnectionFactory`], uses it exclusively and closes it before returning.
//! Writes run inside one transaction on that connection.
//!
//! ## Failure Mapping
//!
//! | Where it fails | Result |
//! |----------------|--------|
//! | Argument checks | `StoreError::InvalidInput`, no connection opened |
//! | Connect / begin / any statement of a write | rollback, then `StoreError::Storage` |
//! | Rollback itself | `StoreError::RollbackFailed` (carries both errors) |
//! | Commit | `StoreError::Storage` (the server discards the transaction) |
//! | Any read | `StoreError::Database`, the sqlx error unchanged |
//!
//! ## Blocking API
//!
//! The async inherent methods are the implementation. The [`InvoiceStore`] and
//! [`QueryRunner`] impls block on a current-thread tokio runtime owned by the
//! store, so they must be called from ordinary threads, not from inside an
//! async task.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Column, Connection, Executor, FromRow, Postgres, Row, Statement, Transaction};
use tokio::runtime::{Builder, Runtime};
use tracing::{Span, instrument};

use invoicedb_core::{InvoiceId, LineItemId};
use invoicedb_invoicing::{Invoice, InvoiceStatus, LineItem, LineItemChanges, PricedLineItem};

use super::queries;
use super::r#trait::{InvoiceStore, QueryRunner};
use super::{validate_changes, validate_new_invoice};
use crate::config::StoreConfig;
use crate::db::connection::release;
use crate::db::{ConnectionFactory, PgConnectionFactory, QueryResult};
use crate::error::{StoreError, StoreOperation};

/// Postgres invoice store.
///
/// Holds no connection between calls; only the factory and the runtime that
/// drives the blocking API.
pub struct PostgresInvoiceStore<F = PgConnectionFactory> {
    factory: F,
    runtime: Runtime,
}

impl PostgresInvoiceStore<PgConnectionFactory> {
    /// Build a store that dials the database described by `config`.
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        Self::new(PgConnectionFactory::from_config(config)?)
    }
}

impl<F> PostgresInvoiceStore<F>
where
    F: ConnectionFactory,
{
    pub fn new(factory: F) -> Result<Self, StoreError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(StoreError::Runtime)?;
        Ok(Self { factory, runtime })
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Execute an arbitrary read query and return its rows as cells.
    #[instrument(skip(self, sql), fields(row_count = tracing::field::Empty))]
    pub async fn run_query(&self, sql: &str) -> Result<QueryResult, StoreError> {
        let mut conn = self.factory.connect().await?;
        let fetched = fetch_table(&mut conn, sql).await;
        release(conn).await;

        let result = fetched?;
        Span::current().record("row_count", result.len());
        Ok(result)
    }

    /// Insert the invoice and its items in one transaction.
    ///
    /// This method:
    /// 1. Opens a connection and starts a transaction
    /// 2. Inserts the invoice row with state 1, reading back the generated id
    /// 3. Inserts each item under that id, in order
    /// 4. Commits, or rolls everything back on the first failure
    #[instrument(
        skip(self, invoice, items),
        fields(item_count = items.len(), invoice_id = tracing::field::Empty)
    )]
    pub async fn create_invoice_with_items(
        &self,
        invoice: &Invoice,
        items: &[LineItem],
    ) -> Result<InvoiceId, StoreError> {
        validate_new_invoice(items)?;

        let operation = StoreOperation::CreateInvoice;
        let mut conn = self
            .factory
            .connect()
            .await
            .map_err(|e| StoreError::storage(operation, e))?;

        let outcome = match conn.begin().await {
            Ok(mut tx) => {
                let result = insert_invoice_rows(&mut tx, invoice, items).await;
                finish(tx, operation, result).await
            }
            Err(e) => Err(StoreError::storage(operation, e)),
        };
        release(conn).await;

        let invoice_id = outcome?;
        Span::current().record("invoice_id", invoice_id.get());
        Ok(invoice_id)
    }

    /// Apply header changes and an item diff in one transaction.
    #[instrument(
        skip(self, invoice, changes),
        fields(
            invoice_id = ?invoice.id,
            added = changes.added.len(),
            updated = changes.updated.len(),
            removed = changes.removed.len()
        )
    )]
    pub async fn update_invoice_with_items(
        &self,
        invoice: &Invoice,
        changes: &LineItemChanges,
    ) -> Result<(), StoreError> {
        let invoice_id = validate_changes(invoice, changes)?;

        let operation = StoreOperation::UpdateInvoice;
        let mut conn = self
            .factory
            .connect()
            .await
            .map_err(|e| StoreError::storage(operation, e))?;

        let outcome = match conn.begin().await {
            Ok(mut tx) => {
                let result = apply_changes(&mut tx, invoice_id, invoice, changes).await;
                finish(tx, operation, result).await
            }
            Err(e) => Err(StoreError::storage(operation, e)),
        };
        release(conn).await;
        outcome
    }

    /// Line items of one invoice with `cantidad * precio` computed by the database.
    ///
    /// Returns an empty vector when the invoice has no items or does not exist.
    #[instrument(skip(self), fields(invoice_id = %invoice_id, item_count = tracing::field::Empty))]
    pub async fn items_for_invoice(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<PricedLineItem>, StoreError> {
        let mut conn = self.factory.connect().await?;
        let items = select_items(&mut conn, invoice_id).await;
        release(conn).await;

        let items = items?;
        Span::current().record("item_count", items.len());
        Ok(items)
    }

    /// Set the invoice's state to 0 in its own transaction.
    #[instrument(skip(self, invoice), fields(invoice_id = ?invoice.id))]
    pub async fn void_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let invoice_id = invoice.require_id()?;

        let operation = StoreOperation::VoidInvoice;
        let mut conn = self
            .factory
            .connect()
            .await
            .map_err(|e| StoreError::storage(operation, e))?;

        let outcome = match conn.begin().await {
            Ok(mut tx) => {
                let result = sqlx::query(queries::VOID_INVOICE)
                    .bind(invoice_id.get())
                    .execute(&mut *tx)
                    .await
                    .map(|_| ());
                finish(tx, operation, result).await
            }
            Err(e) => Err(StoreError::storage(operation, e)),
        };
        release(conn).await;
        outcome
    }

    /// One invoice with its items, read on a single connection without a transaction.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn get_invoice(&self, invoice_id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        let mut conn = self.factory.connect().await?;
        let invoice = select_invoice(&mut conn, invoice_id).await;
        release(conn).await;
        Ok(invoice?)
    }

    /// Invoice headers ordered by id, optionally filtered by status.
    #[instrument(skip(self), fields(invoice_count = tracing::field::Empty))]
    pub async fn list_invoices(
        &self,
        status: Option<InvoiceStatus>,
    ) -> Result<Vec<Invoice>, StoreError> {
        let mut conn = self.factory.connect().await?;
        let rows = sqlx::query(queries::LIST_INVOICES)
            .bind(status.map(InvoiceStatus::as_state))
            .fetch_all(&mut conn)
            .await;
        release(conn).await;

        let mut invoices = Vec::new();
        for row in rows? {
            invoices.push(InvoiceRow::from_row(&row)?.into_invoice()?);
        }
        Span::current().record("invoice_count", invoices.len());
        Ok(invoices)
    }
}

/// Commit on success; otherwise roll back and wrap the original cause.
async fn finish<T>(
    tx: Transaction<'_, Postgres>,
    operation: StoreOperation,
    result: Result<T, sqlx::Error>,
) -> Result<T, StoreError> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| StoreError::storage(operation, e))?;
            tracing::debug!(%operation, "transaction committed");
            Ok(value)
        }
        Err(cause) => match tx.rollback().await {
            Ok(()) => {
                tracing::debug!(%operation, error = %cause, "transaction rolled back");
                Err(StoreError::storage(operation, cause))
            }
            Err(rollback) => Err(StoreError::rollback_failed(operation, cause, rollback)),
        },
    }
}

async fn insert_invoice_rows(
    conn: &mut PgConnection,
    invoice: &Invoice,
    items: &[LineItem],
) -> Result<InvoiceId, sqlx::Error> {
    let id: i64 = sqlx::query_scalar(queries::INSERT_INVOICE)
        .bind(&invoice.customer)
        .bind(invoice.date)
        .fetch_one(&mut *conn)
        .await?;
    let invoice_id = decode_invoice_id(id)?;

    for item in items {
        insert_line_item(conn, invoice_id, item).await?;
    }
    Ok(invoice_id)
}

async fn apply_changes(
    conn: &mut PgConnection,
    invoice_id: InvoiceId,
    invoice: &Invoice,
    changes: &LineItemChanges,
) -> Result<(), sqlx::Error> {
    sqlx::query(queries::UPDATE_INVOICE)
        .bind(&invoice.customer)
        .bind(invoice.date)
        .bind(invoice_id.get())
        .execute(&mut *conn)
        .await?;

    for id in changes.removed.iter().filter_map(|item| item.id) {
        sqlx::query(queries::DELETE_LINE_ITEM)
            .bind(id.get())
            .execute(&mut *conn)
            .await?;
    }

    for item in &changes.added {
        insert_line_item(conn, invoice_id, item).await?;
    }

    for item in &changes.updated {
        let Some(id) = item.id else { continue };
        sqlx::query(queries::UPDATE_LINE_ITEM)
            .bind(&item.product)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(id.get())
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

async fn insert_line_item(
    conn: &mut PgConnection,
    invoice_id: InvoiceId,
    item: &LineItem,
) -> Result<(), sqlx::Error> {
    sqlx::query(queries::INSERT_LINE_ITEM)
        .bind(invoice_id.get())
        .bind(&item.product)
        .bind(item.quantity)
        .bind(item.unit_price)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Prepare `sql` first so the column names are known even when no row matches.
async fn fetch_table(conn: &mut PgConnection, sql: &str) -> Result<QueryResult, sqlx::Error> {
    let statement = (&mut *conn).prepare(sql).await?;
    let columns = statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let rows = statement.query().fetch_all(&mut *conn).await?;
    QueryResult::from_pg_rows(columns, &rows)
}

async fn select_items(
    conn: &mut PgConnection,
    invoice_id: InvoiceId,
) -> Result<Vec<PricedLineItem>, sqlx::Error> {
    let rows = sqlx::query(queries::SELECT_ITEMS_FOR_INVOICE)
        .bind(invoice_id.get())
        .fetch_all(&mut *conn)
        .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        items.push(LineItemRow::from_row(&row)?.into_priced()?);
    }
    Ok(items)
}

async fn select_invoice(
    conn: &mut PgConnection,
    invoice_id: InvoiceId,
) -> Result<Option<Invoice>, sqlx::Error> {
    let row = sqlx::query(queries::SELECT_INVOICE)
        .bind(invoice_id.get())
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let invoice = InvoiceRow::from_row(&row)?.into_invoice()?;

    let items = select_items(conn, invoice_id)
        .await?
        .into_iter()
        .map(PricedLineItem::into_item)
        .collect();
    Ok(Some(invoice.with_items(items)))
}

fn decode_invoice_id(id: i64) -> Result<InvoiceId, sqlx::Error> {
    InvoiceId::new(id).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

// SQLx row types

#[derive(Debug)]
struct InvoiceRow {
    id: i64,
    customer: String,
    date: NaiveDateTime,
    state: i32,
}

impl<'r> FromRow<'r, PgRow> for InvoiceRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(InvoiceRow {
            id: row.try_get("id")?,
            customer: row.try_get("cliente")?,
            date: row.try_get("fecha")?,
            state: row.try_get("state")?,
        })
    }
}

impl InvoiceRow {
    fn into_invoice(self) -> Result<Invoice, sqlx::Error> {
        let status =
            InvoiceStatus::from_state(self.state).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        Ok(Invoice {
            id: Some(decode_invoice_id(self.id)?),
            customer: self.customer,
            date: self.date,
            status,
            items: Vec::new(),
        })
    }
}

#[derive(Debug)]
struct LineItemRow {
    id: i64,
    invoice_id: i64,
    product: String,
    quantity: i32,
    price: Decimal,
    total: Decimal,
}

impl<'r> FromRow<'r, PgRow> for LineItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LineItemRow {
            id: row.try_get("id")?,
            invoice_id: row.try_get("facturaid")?,
            product: row.try_get("producto")?,
            quantity: row.try_get("cantidad")?,
            price: row.try_get("precio")?,
            total: row.try_get("total")?,
        })
    }
}

impl LineItemRow {
    fn into_priced(self) -> Result<PricedLineItem, sqlx::Error> {
        let id = LineItemId::new(self.id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let item = LineItem {
            id: Some(id),
            invoice_id: Some(decode_invoice_id(self.invoice_id)?),
            product: self.product,
            quantity: self.quantity,
            unit_price: self.price,
        };
        Ok(PricedLineItem::new(item, self.total))
    }
}

// Blocking API

impl<F> InvoiceStore for PostgresInvoiceStore<F>
where
    F: ConnectionFactory,
{
    fn create_invoice_with_items(
        &self,
        invoice: &Invoice,
        items: &[LineItem],
    ) -> Result<InvoiceId, StoreError> {
        self.runtime
            .block_on(PostgresInvoiceStore::create_invoice_with_items(self, invoice, items))
    }

    fn update_invoice_with_items(
        &self,
        invoice: &Invoice,
        changes: &LineItemChanges,
    ) -> Result<(), StoreError> {
        self.runtime
            .block_on(PostgresInvoiceStore::update_invoice_with_items(self, invoice, changes))
    }

    fn items_for_invoice(&self, invoice_id: InvoiceId) -> Result<Vec<PricedLineItem>, StoreError> {
        self.runtime
            .block_on(PostgresInvoiceStore::items_for_invoice(self, invoice_id))
    }

    fn void_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        self.runtime
            .block_on(PostgresInvoiceStore::void_invoice(self, invoice))
    }

    fn get_invoice(&self, invoice_id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        self.runtime
            .block_on(PostgresInvoiceStore::get_invoice(self, invoice_id))
    }

    fn list_invoices(&self, status: Option<InvoiceStatus>) -> Result<Vec<Invoice>, StoreError> {
        self.runtime
            .block_on(PostgresInvoiceStore::list_invoices(self, status))
    }
}

impl<F> QueryRunner for PostgresInvoiceStore<F>
where
    F: ConnectionFactory,
{
    fn run_query(&self, sql: &str) -> Result<QueryResult, StoreError> {
        self.runtime.block_on(PostgresInvoiceStore::run_query(self, sql))
    }
}
