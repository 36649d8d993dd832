use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::NaiveDateTime;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use invoicedb_core::{InvoiceId, LineItemId};
use invoicedb_invoicing::{Invoice, InvoiceStatus, LineItem, LineItemChanges, PricedLineItem};

use super::r#trait::InvoiceStore;
use super::{validate_changes, validate_new_invoice};
use crate::error::{StoreError, StoreOperation};

/// Width of the `VARCHAR` text columns.
pub const TEXT_COLUMN_WIDTH: usize = 100;

/// Digits left of the decimal point in a `NUMERIC(12, 2)` price.
const PRICE_INTEGER_DIGITS: u32 = 10;

/// Schema constraint rejected by the in-memory tables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintViolation {
    #[error("value too long for column {column} (max {max} characters, got {actual})")]
    ValueTooLong {
        column: &'static str,
        max: usize,
        actual: usize,
    },

    #[error("numeric field overflow in column {column}: {value}")]
    NumericOverflow { column: &'static str, value: Decimal },

    #[error("insert into facturadetalle violates foreign key: factura {0} does not exist")]
    ForeignKey(InvoiceId),
}

#[derive(Debug, Clone)]
struct InvoiceRow {
    customer: String,
    date: NaiveDateTime,
    state: InvoiceStatus,
}

#[derive(Debug, Clone)]
struct ItemRow {
    invoice_id: InvoiceId,
    product: String,
    quantity: i32,
    price: Decimal,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    invoices: BTreeMap<InvoiceId, InvoiceRow>,
    items: BTreeMap<LineItemId, ItemRow>,
}

/// Key generators. Like database sequences they are not transactional:
/// keys handed out inside a rolled-back write are never reused.
#[derive(Debug, Default)]
struct Sequences {
    invoice: i64,
    item: i64,
}

impl Sequences {
    fn next_invoice(&mut self) -> InvoiceId {
        self.invoice += 1;
        InvoiceId::new(self.invoice).unwrap_or_else(|_| unreachable!("sequence starts at 1"))
    }

    fn next_item(&mut self) -> LineItemId {
        self.item += 1;
        LineItemId::new(self.item).unwrap_or_else(|_| unreachable!("sequence starts at 1"))
    }
}

#[derive(Debug, Default)]
struct State {
    tables: Tables,
    sequences: Sequences,
}

/// In-memory invoice store.
///
/// Intended for tests/dev. Each write works on a copy of the tables and only
/// replaces them when every step succeeded, so a failed write leaves nothing
/// behind. The tables enforce the same constraints as the SQL schema.
#[derive(Debug, Default)]
pub struct InMemoryInvoiceStore {
    state: Mutex<State>,
}

impl InMemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invoice_count(&self) -> usize {
        self.lock().tables.invoices.len()
    }

    pub fn line_item_count(&self) -> usize {
        self.lock().tables.items.len()
    }

    // Tables are only replaced after a write fully succeeds, so a panic while
    // the lock is held cannot leave them half-written.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_transaction<T, F>(&self, operation: StoreOperation, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Tables, &mut Sequences) -> Result<T, ConstraintViolation>,
    {
        let mut state = self.lock();
        let mut staged = state.tables.clone();

        match work(&mut staged, &mut state.sequences) {
            Ok(value) => {
                state.tables = staged;
                Ok(value)
            }
            Err(violation) => Err(StoreError::storage(operation, violation)),
        }
    }
}

impl Tables {
    fn insert_invoice(
        &mut self,
        sequences: &mut Sequences,
        invoice: &Invoice,
    ) -> Result<InvoiceId, ConstraintViolation> {
        check_text("cliente", &invoice.customer)?;
        let id = sequences.next_invoice();
        self.invoices.insert(
            id,
            InvoiceRow {
                customer: invoice.customer.clone(),
                date: invoice.date,
                state: InvoiceStatus::Active,
            },
        );
        Ok(id)
    }

    fn insert_item(
        &mut self,
        sequences: &mut Sequences,
        invoice_id: InvoiceId,
        item: &LineItem,
    ) -> Result<LineItemId, ConstraintViolation> {
        if !self.invoices.contains_key(&invoice_id) {
            return Err(ConstraintViolation::ForeignKey(invoice_id));
        }
        check_text("producto", &item.product)?;
        let price = check_price(item.unit_price)?;

        let id = sequences.next_item();
        self.items.insert(
            id,
            ItemRow {
                invoice_id,
                product: item.product.clone(),
                quantity: item.quantity,
                price,
            },
        );
        Ok(id)
    }

    fn update_invoice(
        &mut self,
        invoice_id: InvoiceId,
        invoice: &Invoice,
    ) -> Result<(), ConstraintViolation> {
        check_text("cliente", &invoice.customer)?;
        if let Some(row) = self.invoices.get_mut(&invoice_id) {
            row.customer = invoice.customer.clone();
            row.date = invoice.date;
        }
        Ok(())
    }

    fn update_item(
        &mut self,
        item_id: LineItemId,
        item: &LineItem,
    ) -> Result<(), ConstraintViolation> {
        check_text("producto", &item.product)?;
        let price = check_price(item.unit_price)?;
        if let Some(row) = self.items.get_mut(&item_id) {
            row.product = item.product.clone();
            row.quantity = item.quantity;
            row.price = price;
        }
        Ok(())
    }

    fn items_of(&self, invoice_id: InvoiceId) -> Vec<PricedLineItem> {
        self.items
            .iter()
            .filter(|(_, row)| row.invoice_id == invoice_id)
            .map(|(id, row)| {
                let item = LineItem {
                    id: Some(*id),
                    invoice_id: Some(row.invoice_id),
                    product: row.product.clone(),
                    quantity: row.quantity,
                    unit_price: row.price,
                };
                let total = item.total();
                PricedLineItem::new(item, total)
            })
            .collect()
    }

    fn invoice(&self, invoice_id: InvoiceId) -> Option<Invoice> {
        self.invoices.get(&invoice_id).map(|row| Invoice {
            id: Some(invoice_id),
            customer: row.customer.clone(),
            date: row.date,
            status: row.state,
            items: Vec::new(),
        })
    }
}

fn check_text(column: &'static str, value: &str) -> Result<(), ConstraintViolation> {
    let actual = value.chars().count();
    if actual > TEXT_COLUMN_WIDTH {
        return Err(ConstraintViolation::ValueTooLong {
            column,
            max: TEXT_COLUMN_WIDTH,
            actual,
        });
    }
    Ok(())
}

/// Stored prices are rounded to two decimals, half away from zero, as `NUMERIC(12, 2)` does.
fn check_price(value: Decimal) -> Result<Decimal, ConstraintViolation> {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let limit = Decimal::from(10i64.pow(PRICE_INTEGER_DIGITS));
    if rounded.abs() >= limit {
        return Err(ConstraintViolation::NumericOverflow {
            column: "precio",
            value,
        });
    }
    Ok(rounded)
}

impl InvoiceStore for InMemoryInvoiceStore {
    fn create_invoice_with_items(
        &self,
        invoice: &Invoice,
        items: &[LineItem],
    ) -> Result<InvoiceId, StoreError> {
        validate_new_invoice(items)?;

        self.in_transaction(StoreOperation::CreateInvoice, |tables, sequences| {
            let invoice_id = tables.insert_invoice(sequences, invoice)?;
            for item in items {
                tables.insert_item(sequences, invoice_id, item)?;
            }
            Ok(invoice_id)
        })
    }

    fn update_invoice_with_items(
        &self,
        invoice: &Invoice,
        changes: &LineItemChanges,
    ) -> Result<(), StoreError> {
        let invoice_id = validate_changes(invoice, changes)?;

        self.in_transaction(StoreOperation::UpdateInvoice, |tables, sequences| {
            tables.update_invoice(invoice_id, invoice)?;

            for item in &changes.removed {
                if let Some(id) = item.id {
                    tables.items.remove(&id);
                }
            }

            for item in &changes.added {
                tables.insert_item(sequences, invoice_id, item)?;
            }

            for item in &changes.updated {
                if let Some(id) = item.id {
                    tables.update_item(id, item)?;
                }
            }

            Ok(())
        })
    }

    fn items_for_invoice(&self, invoice_id: InvoiceId) -> Result<Vec<PricedLineItem>, StoreError> {
        Ok(self.lock().tables.items_of(invoice_id))
    }

    fn void_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let invoice_id = invoice.require_id()?;

        self.in_transaction(StoreOperation::VoidInvoice, |tables, _| {
            if let Some(row) = tables.invoices.get_mut(&invoice_id) {
                row.state = InvoiceStatus::Voided;
            }
            Ok(())
        })
    }

    fn get_invoice(&self, invoice_id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        let state = self.lock();
        Ok(state.tables.invoice(invoice_id).map(|invoice| {
            let items = state
                .tables
                .items_of(invoice_id)
                .into_iter()
                .map(PricedLineItem::into_item)
                .collect();
            invoice.with_items(items)
        }))
    }

    fn list_invoices(&self, status: Option<InvoiceStatus>) -> Result<Vec<Invoice>, StoreError> {
        let state = self.lock();
        Ok(state
            .tables
            .invoices
            .iter()
            .filter(|(_, row)| status.is_none_or(|s| row.state == s))
            .filter_map(|(id, _)| state.tables.invoice(*id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use std::error::Error as _;

    fn test_date(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn acme() -> Invoice {
        Invoice::new("Acme", test_date(1))
    }

    fn widget() -> LineItem {
        LineItem::new("Widget", 3, dec!(10.00))
    }

    fn too_long() -> String {
        "x".repeat(TEXT_COLUMN_WIDTH + 1)
    }

    fn stored(store: &InMemoryInvoiceStore, items: &[LineItem]) -> Invoice {
        let id = store.create_invoice_with_items(&acme(), items).unwrap();
        store.get_invoice(id).unwrap().unwrap()
    }

    #[test]
    fn create_returns_first_id_and_items_read_back_with_totals() {
        let store = InMemoryInvoiceStore::new();

        let id = store.create_invoice_with_items(&acme(), &[widget()]).unwrap();
        assert_eq!(id.get(), 1);

        let items = store.items_for_invoice(id).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item.product, "Widget");
        assert_eq!(items[0].item.quantity, 3);
        assert_eq!(items[0].item.unit_price, dec!(10.00));
        assert_eq!(items[0].item.invoice_id, Some(id));
        assert!(items[0].item.id.is_some());
        assert_eq!(items[0].total, dec!(30.00));
    }

    #[test]
    fn create_with_no_items_is_invalid_and_writes_nothing() {
        let store = InMemoryInvoiceStore::new();

        let err = store.create_invoice_with_items(&acme(), &[]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
        assert_eq!(store.invoice_count(), 0);
        assert_eq!(store.line_item_count(), 0);
    }

    #[test]
    fn failing_second_item_rolls_back_invoice_and_first_item() {
        let store = InMemoryInvoiceStore::new();
        let bad = LineItem::new(too_long(), 1, dec!(1.00));

        let err = store
            .create_invoice_with_items(&acme(), &[widget(), bad])
            .unwrap_err();

        assert_eq!(err.operation(), Some(StoreOperation::CreateInvoice));
        let cause = err.source().unwrap().to_string();
        assert!(cause.contains("producto"), "unexpected cause: {cause}");
        assert_eq!(store.invoice_count(), 0);
        assert_eq!(store.line_item_count(), 0);
        assert!(store.list_invoices(None).unwrap().is_empty());
    }

    #[test]
    fn keys_consumed_by_rolled_back_writes_are_not_reused() {
        let store = InMemoryInvoiceStore::new();
        let bad = LineItem::new("Widget", 1, dec!(10000000000.00));
        assert!(store.create_invoice_with_items(&acme(), &[bad]).is_err());

        let id = store.create_invoice_with_items(&acme(), &[widget()]).unwrap();
        assert_eq!(id.get(), 2);
    }

    #[test]
    fn update_applies_removed_added_and_updated_items() {
        let store = InMemoryInvoiceStore::new();
        let invoice = stored(
            &store,
            &[
                LineItem::new("Keep", 1, dec!(1.00)),
                LineItem::new("Drop", 2, dec!(2.00)),
                LineItem::new("Edit", 3, dec!(3.00)),
            ],
        );
        let keep = invoice.items[0].clone();
        let drop = invoice.items[1].clone();
        let mut edit = invoice.items[2].clone();
        edit.product = "Edited".into();
        edit.quantity = 5;
        edit.unit_price = dec!(4.50);

        let mut header = invoice.clone();
        header.customer = "Acme Ltd".into();
        header.date = test_date(2);

        let changes = LineItemChanges::new()
            .remove(drop.clone())
            .add(LineItem::new("New", 7, dec!(0.10)))
            .update(edit.clone());
        store.update_invoice_with_items(&header, &changes).unwrap();

        let reloaded = store.get_invoice(invoice.id.unwrap()).unwrap().unwrap();
        assert_eq!(reloaded.customer, "Acme Ltd");
        assert_eq!(reloaded.date, test_date(2));
        assert_eq!(reloaded.items.len(), 3);
        assert!(reloaded.items.iter().all(|i| i.id != drop.id));
        assert!(reloaded.items.contains(&keep));
        assert!(reloaded.items.contains(&edit));

        let added = reloaded.items.iter().find(|i| i.product == "New").unwrap();
        assert!(added.id.is_some());
        assert!(![keep.id, drop.id, edit.id].contains(&added.id));
        assert_eq!(added.total(), dec!(0.70));
    }

    #[test]
    fn empty_changes_only_update_header() {
        let store = InMemoryInvoiceStore::new();
        let mut invoice = stored(&store, &[widget()]);
        invoice.customer = "Renamed".into();

        store
            .update_invoice_with_items(&invoice, &LineItemChanges::new())
            .unwrap();

        let reloaded = store.get_invoice(invoice.id.unwrap()).unwrap().unwrap();
        assert_eq!(reloaded.customer, "Renamed");
        assert_eq!(reloaded.items, invoice.items);
    }

    #[test]
    fn failing_update_phase_rolls_back_earlier_phases() {
        let store = InMemoryInvoiceStore::new();
        let invoice = stored(&store, &[widget(), LineItem::new("Gadget", 1, dec!(2.00))]);

        let mut header = invoice.clone();
        header.customer = "Changed".into();
        let mut bad_edit = invoice.items[1].clone();
        bad_edit.product = too_long();

        let changes = LineItemChanges::new()
            .remove(invoice.items[0].clone())
            .add(LineItem::new("Extra", 1, dec!(1.00)))
            .update(bad_edit);
        let err = store.update_invoice_with_items(&header, &changes).unwrap_err();
        assert_eq!(err.operation(), Some(StoreOperation::UpdateInvoice));

        let reloaded = store.get_invoice(invoice.id.unwrap()).unwrap().unwrap();
        assert_eq!(reloaded, invoice);
    }

    #[test]
    fn adding_items_to_missing_invoice_violates_foreign_key() {
        let store = InMemoryInvoiceStore::new();
        let ghost = acme().with_id(InvoiceId::new(99).unwrap());

        let err = store
            .update_invoice_with_items(&ghost, &LineItemChanges::new().add(widget()))
            .unwrap_err();

        let cause = err.source().unwrap().to_string();
        assert!(cause.contains("foreign key"), "unexpected cause: {cause}");
        assert_eq!(store.line_item_count(), 0);
    }

    #[test]
    fn update_requires_stored_invoice_and_item_ids() {
        let store = InMemoryInvoiceStore::new();
        let err = store
            .update_invoice_with_items(&acme(), &LineItemChanges::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));

        let invoice = stored(&store, &[widget()]);
        let err = store
            .update_invoice_with_items(&invoice, &LineItemChanges::new().update(widget()))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(msg) if msg.contains("index 0")));
    }

    #[test]
    fn void_only_touches_target_and_is_idempotent() {
        let store = InMemoryInvoiceStore::new();
        let first = stored(&store, &[widget()]);
        let second = stored(&store, &[widget()]);

        store.void_invoice(&first).unwrap();
        store.void_invoice(&first).unwrap();

        let first = store.get_invoice(first.id.unwrap()).unwrap().unwrap();
        let second = store.get_invoice(second.id.unwrap()).unwrap().unwrap();
        assert!(first.is_voided());
        assert_eq!(first.items.len(), 1);
        assert_eq!(second.status, InvoiceStatus::Active);

        let voided = store.list_invoices(Some(InvoiceStatus::Voided)).unwrap();
        assert_eq!(voided.len(), 1);
        assert_eq!(voided[0].id, first.id);
        assert_eq!(store.list_invoices(None).unwrap().len(), 2);
    }

    #[test]
    fn void_requires_stored_invoice() {
        let store = InMemoryInvoiceStore::new();
        assert!(matches!(
            store.void_invoice(&acme()),
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn reads_of_unknown_or_empty_invoices_are_empty() {
        let store = InMemoryInvoiceStore::new();
        let unknown = InvoiceId::new(42).unwrap();
        assert!(store.items_for_invoice(unknown).unwrap().is_empty());
        assert!(store.get_invoice(unknown).unwrap().is_none());

        let invoice = stored(&store, &[widget()]);
        let removal = LineItemChanges::new().remove(invoice.items[0].clone());
        store.update_invoice_with_items(&invoice, &removal).unwrap();
        assert!(store.items_for_invoice(invoice.id.unwrap()).unwrap().is_empty());
    }

    #[test]
    fn prices_are_stored_with_two_decimals() {
        let store = InMemoryInvoiceStore::new();
        let id = store
            .create_invoice_with_items(
                &acme(),
                &[
                    LineItem::new("Bolt", 3, dec!(0.333)),
                    LineItem::new("Nut", 2, dec!(0.125)),
                    LineItem::new("Refund", 1, dec!(-0.125)),
                ],
            )
            .unwrap();

        let items = store.items_for_invoice(id).unwrap();
        assert_eq!(items[0].item.unit_price, dec!(0.33));
        assert_eq!(items[0].total, dec!(0.99));
        assert_eq!(items[1].item.unit_price, dec!(0.13));
        assert_eq!(items[1].total, dec!(0.26));
        assert_eq!(items[2].item.unit_price, dec!(-0.13));
    }

    fn item_strategy() -> impl Strategy<Value = LineItem> {
        ("[A-Za-z][A-Za-z0-9 ]{0,40}", 0i32..10_000, 0i64..100_000_000)
            .prop_map(|(product, qty, cents)| LineItem::new(product, qty, Decimal::new(cents, 2)))
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: a created invoice reads back exactly the items it was created with.
        #[test]
        fn created_items_read_back_unchanged(
            items in prop::collection::vec(item_strategy(), 1..8)
        ) {
            let store = InMemoryInvoiceStore::new();
            let id = store.create_invoice_with_items(&acme(), &items).unwrap();
            prop_assert!(id.get() > 0);

            let read = store.items_for_invoice(id).unwrap();
            prop_assert_eq!(read.len(), items.len());
            for (priced, original) in read.iter().zip(items.iter()) {
                prop_assert_eq!(&priced.item.product, &original.product);
                prop_assert_eq!(priced.item.quantity, original.quantity);
                prop_assert_eq!(priced.item.unit_price, original.unit_price);
                prop_assert_eq!(priced.total, original.total());
            }
        }
    }
}
