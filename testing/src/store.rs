//! In-memory stock store with staged-copy transactions.
//!
//! A transaction takes the store-wide async mutex (the owned guard lives in
//! the transaction), stages its changes on a copy of the tables, and swaps
//! the copy in at commit. That gives the single-writer discipline the store
//! contract requires — stronger than per-product row locks, which is fine
//! for tests — and makes rollback-on-drop trivial: dropping the transaction
//! discards the copy.
//!
//! Fault injection: [`InMemoryStockStore::fail_next_commit`] makes exactly
//! one upcoming commit fail after all statements succeeded, which is how
//! the atomicity tests prove that a movement is all-or-nothing. Back doors
//! like [`InMemoryStockStore::inject_carrier_defect`] mutate committed
//! state directly, planting the drift the reconciler must find.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

use stock_ledger_core::store::Result;
use stock_ledger_core::{
    CarrierId, CarrierState, Clock, Direction, EntryId, InventorySnapshot, LedgerEntry,
    LedgerEntryDraft, MovementFilter, NewCarrier, NewProduct, ProductId, ProductRecord,
    StockStore, StockTx, StorageError, SystemClock, UnitCarrier,
};

/// Default page size for ledger history reads.
const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Clone, Debug, Default)]
struct Tables {
    products: HashMap<ProductId, ProductRecord>,
    carriers: HashMap<CarrierId, UnitCarrier>,
    entries: Vec<LedgerEntry>,
    snapshots: HashMap<ProductId, InventorySnapshot>,
    next_product_id: i64,
    next_carrier_id: i64,
    next_entry_id: i64,
}

impl Tables {
    fn carrier_truth(&self, product_id: ProductId) -> i64 {
        self.carriers
            .values()
            .filter(|c| c.product_id == product_id && c.state.is_stocked_in())
            .map(|c| c.units_assigned)
            .sum()
    }
}

/// In-memory [`StockStore`] for fast, deterministic tests.
#[derive(Clone)]
pub struct InMemoryStockStore {
    tables: Arc<Mutex<Tables>>,
    clock: Arc<dyn Clock>,
    fail_next_commit: Arc<AtomicBool>,
}

impl Default for InMemoryStockStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryStockStore {
    /// Create an empty store whose entry timestamps come from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            clock,
            fail_next_commit: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make the next commit fail after all its statements succeeded,
    /// leaving committed state untouched.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Back door: set a carrier's unit count directly in committed state,
    /// bypassing the transaction path. Used to plant zero-unit defects.
    pub async fn inject_carrier_units(&self, carrier_id: CarrierId, units: i64) {
        let mut tables = self.tables.lock().await;
        if let Some(carrier) = tables.carriers.get_mut(&carrier_id) {
            carrier.units_assigned = units;
        }
    }

    /// Back door: plant the classic zero-unit defect (stocked in,
    /// `units_assigned = 0`).
    pub async fn inject_carrier_defect(&self, carrier_id: CarrierId) {
        let mut tables = self.tables.lock().await;
        if let Some(carrier) = tables.carriers.get_mut(&carrier_id) {
            carrier.state = CarrierState::StockedIn;
            carrier.units_assigned = 0;
        }
    }

    /// Back door: overwrite both cached views directly, planting cache
    /// drift for the reconciler to find.
    pub async fn inject_cached_views(&self, product_id: ProductId, quantity: i64) {
        let mut tables = self.tables.lock().await;
        if let Some(product) = tables.products.get_mut(&product_id) {
            product.aggregate_stock = quantity;
        }
        if let Some(snapshot) = tables.snapshots.get_mut(&product_id) {
            snapshot.quantity = quantity;
        }
    }

    /// Number of committed ledger entries for a product.
    pub async fn entry_count(&self, product_id: ProductId) -> usize {
        let tables = self.tables.lock().await;
        tables
            .entries
            .iter()
            .filter(|e| e.product_id == product_id)
            .count()
    }

    /// Insert a carrier directly into committed state (fixture path).
    pub async fn seed_carrier(&self, carrier: &NewCarrier, state: CarrierState) -> UnitCarrier {
        let mut tables = self.tables.lock().await;
        tables.next_carrier_id += 1;
        let inserted = UnitCarrier {
            id: CarrierId::new(tables.next_carrier_id),
            product_id: carrier.product_id,
            code: carrier.code.clone(),
            units_assigned: carrier.units_assigned,
            state,
        };
        tables.carriers.insert(inserted.id, inserted.clone());
        inserted
    }
}

impl StockStore for InMemoryStockStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<Self::Tx> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let staged = guard.clone();
        Ok(InMemoryTx {
            guard,
            staged,
            clock: Arc::clone(&self.clock),
            fail_next_commit: Arc::clone(&self.fail_next_commit),
        })
    }

    async fn product(&self, product_id: ProductId) -> Result<Option<ProductRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables.products.get(&product_id).cloned())
    }

    async fn insert_product(&self, product: &NewProduct) -> Result<ProductRecord> {
        let mut tables = self.tables.lock().await;
        if tables.products.values().any(|p| p.sku == product.sku) {
            return Err(StorageError::Conflict(format!(
                "sku '{}' already exists",
                product.sku
            )));
        }
        tables.next_product_id += 1;
        let record = ProductRecord {
            id: ProductId::new(tables.next_product_id),
            sku: product.sku.clone(),
            price: product.price,
            aggregate_stock: 0,
        };
        tables.products.insert(record.id, record.clone());
        Ok(record)
    }

    async fn carrier_by_code(&self, code: &str) -> Result<Option<UnitCarrier>> {
        let tables = self.tables.lock().await;
        Ok(tables.carriers.values().find(|c| c.code == code).cloned())
    }

    async fn last_movement(
        &self,
        carrier_id: CarrierId,
        direction: Direction,
    ) -> Result<Option<DateTime<Utc>>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .entries
            .iter()
            .filter(|e| e.carrier_id == Some(carrier_id) && e.direction == direction)
            .map(|e| e.created_at)
            .max())
    }

    async fn snapshot(&self, product_id: ProductId) -> Result<Option<InventorySnapshot>> {
        let tables = self.tables.lock().await;
        Ok(tables.snapshots.get(&product_id).cloned())
    }

    async fn carrier_truth(&self, product_id: ProductId) -> Result<i64> {
        let tables = self.tables.lock().await;
        Ok(tables.carrier_truth(product_id))
    }

    async fn defective_carriers(&self, product_id: ProductId) -> Result<Vec<CarrierId>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .carriers
            .values()
            .filter(|c| {
                c.product_id == product_id && c.state.is_stocked_in() && c.units_assigned == 0
            })
            .map(|c| c.id)
            .collect())
    }

    async fn ledger_truth(&self, product_id: ProductId) -> Result<i64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .entries
            .iter()
            .filter(|e| e.product_id == product_id)
            .map(LedgerEntry::signed_quantity)
            .sum())
    }

    async fn movements(&self, filter: &MovementFilter) -> Result<Vec<LedgerEntry>> {
        let tables = self.tables.lock().await;
        let mut matching: Vec<LedgerEntry> = tables
            .entries
            .iter()
            .filter(|e| filter.product_id.is_none_or(|p| e.product_id == p))
            .filter(|e| filter.direction.is_none_or(|d| e.direction == d))
            .cloned()
            .collect();
        matching.sort_by_key(|e| std::cmp::Reverse(e.id));
        let limit = filter
            .limit
            .map_or(DEFAULT_PAGE_SIZE, |l| l as usize);
        Ok(matching
            .into_iter()
            .skip(filter.offset as usize)
            .take(limit)
            .collect())
    }

    async fn product_ids(&self) -> Result<Vec<ProductId>> {
        let tables = self.tables.lock().await;
        let mut ids: Vec<ProductId> = tables.products.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

/// An open unit of work against [`InMemoryStockStore`].
///
/// Holds the store-wide lock; dropping it without commit discards all
/// staged changes.
pub struct InMemoryTx {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
    clock: Arc<dyn Clock>,
    fail_next_commit: Arc<AtomicBool>,
}

impl StockTx for InMemoryTx {
    async fn lock_product(&mut self, product_id: ProductId) -> Result<ProductRecord> {
        self.staged
            .products
            .get(&product_id)
            .cloned()
            .ok_or_else(|| StorageError::Corrupt(format!("product {product_id} missing")))
    }

    async fn lock_carrier(&mut self, carrier_id: CarrierId) -> Result<UnitCarrier> {
        self.staged
            .carriers
            .get(&carrier_id)
            .cloned()
            .ok_or_else(|| StorageError::Corrupt(format!("carrier {carrier_id} missing")))
    }

    async fn update_carrier(&mut self, carrier: &UnitCarrier) -> Result<()> {
        if !self.staged.carriers.contains_key(&carrier.id) {
            return Err(StorageError::Corrupt(format!(
                "carrier {} missing",
                carrier.id
            )));
        }
        self.staged.carriers.insert(carrier.id, carrier.clone());
        Ok(())
    }

    async fn insert_carrier(&mut self, carrier: &NewCarrier) -> Result<UnitCarrier> {
        if self.staged.carriers.values().any(|c| c.code == carrier.code) {
            return Err(StorageError::Conflict(format!(
                "carrier code '{}' already exists",
                carrier.code
            )));
        }
        self.staged.next_carrier_id += 1;
        let inserted = UnitCarrier {
            id: CarrierId::new(self.staged.next_carrier_id),
            product_id: carrier.product_id,
            code: carrier.code.clone(),
            units_assigned: carrier.units_assigned,
            state: CarrierState::Unassigned,
        };
        self.staged.carriers.insert(inserted.id, inserted.clone());
        Ok(inserted)
    }

    async fn carriers_for_product(&mut self, product_id: ProductId) -> Result<Vec<UnitCarrier>> {
        let mut carriers: Vec<UnitCarrier> = self
            .staged
            .carriers
            .values()
            .filter(|c| c.product_id == product_id)
            .cloned()
            .collect();
        carriers.sort_by_key(|c| c.id);
        Ok(carriers)
    }

    async fn append_entry(&mut self, draft: &LedgerEntryDraft) -> Result<LedgerEntry> {
        if !self.staged.products.contains_key(&draft.product_id) {
            return Err(StorageError::Corrupt(format!(
                "product {} missing",
                draft.product_id
            )));
        }
        self.staged.next_entry_id += 1;
        // Timestamps follow the clock but never go backwards, so per-product
        // commit order is preserved even under a fixed test clock.
        let floor = self
            .staged
            .entries
            .last()
            .map(|e| e.created_at + TimeDelta::milliseconds(1));
        let created_at = floor.map_or_else(|| self.clock.now(), |f| f.max(self.clock.now()));
        let entry = LedgerEntry {
            id: EntryId::new(self.staged.next_entry_id),
            product_id: draft.product_id,
            carrier_id: draft.carrier_id,
            direction: draft.direction,
            quantity: draft.quantity,
            actor: draft.actor.clone(),
            note: draft.note.clone(),
            reference: draft.reference.clone(),
            created_at,
        };
        self.staged.entries.push(entry.clone());
        Ok(entry)
    }

    async fn apply_aggregate(&mut self, product_id: ProductId, signed_delta: i64) -> Result<i64> {
        let now = self.clock.now();
        let product = self
            .staged
            .products
            .get_mut(&product_id)
            .ok_or_else(|| StorageError::Corrupt(format!("product {product_id} missing")))?;
        product.aggregate_stock += signed_delta;
        let quantity = product.aggregate_stock;
        self.staged.snapshots.insert(
            product_id,
            InventorySnapshot {
                product_id,
                quantity,
                last_updated: now,
            },
        );
        Ok(quantity)
    }

    async fn overwrite_aggregate(&mut self, product_id: ProductId, quantity: i64) -> Result<i64> {
        let now = self.clock.now();
        let product = self
            .staged
            .products
            .get_mut(&product_id)
            .ok_or_else(|| StorageError::Corrupt(format!("product {product_id} missing")))?;
        product.aggregate_stock = quantity;
        self.staged.snapshots.insert(
            product_id,
            InventorySnapshot {
                product_id,
                quantity,
                last_updated: now,
            },
        );
        Ok(quantity)
    }

    async fn carrier_truth(&mut self, product_id: ProductId) -> Result<i64> {
        Ok(self.staged.carrier_truth(product_id))
    }

    async fn commit(mut self) -> Result<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "injected commit failure".to_string(),
            ));
        }
        *self.guard = self.staged;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        // Dropping the guard releases the lock; staged changes are discarded.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code unwraps for clear failure locations

    use super::*;

    fn draft(product_id: ProductId) -> LedgerEntryDraft {
        LedgerEntryDraft {
            product_id,
            carrier_id: None,
            direction: Direction::In,
            quantity: 3,
            actor: "tester".to_string(),
            note: String::new(),
            reference: String::new(),
        }
    }

    #[tokio::test]
    async fn staged_changes_invisible_until_commit() {
        let store = InMemoryStockStore::default();
        let product = store
            .insert_product(&NewProduct {
                sku: "SKU-1".to_string(),
                price: 100,
            })
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.append_entry(&draft(product.id)).await.unwrap();
        tx.apply_aggregate(product.id, 3).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.ledger_truth(product.id).await.unwrap(), 3);
        assert_eq!(
            store.product(product.id).await.unwrap().unwrap().aggregate_stock,
            3
        );
    }

    #[tokio::test]
    async fn rollback_discards_staged_changes() {
        let store = InMemoryStockStore::default();
        let product = store
            .insert_product(&NewProduct {
                sku: "SKU-1".to_string(),
                price: 100,
            })
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.append_entry(&draft(product.id)).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.ledger_truth(product.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn injected_commit_failure_commits_nothing() {
        let store = InMemoryStockStore::default();
        let product = store
            .insert_product(&NewProduct {
                sku: "SKU-1".to_string(),
                price: 100,
            })
            .await
            .unwrap();

        store.fail_next_commit();
        let mut tx = store.begin().await.unwrap();
        tx.append_entry(&draft(product.id)).await.unwrap();
        tx.apply_aggregate(product.id, 3).await.unwrap();
        assert!(tx.commit().await.is_err());

        assert_eq!(store.entry_count(product.id).await, 0);
        assert_eq!(
            store.product(product.id).await.unwrap().unwrap().aggregate_stock,
            0
        );

        // The failure is one-shot; the retry succeeds.
        let mut tx = store.begin().await.unwrap();
        tx.append_entry(&draft(product.id)).await.unwrap();
        assert!(tx.commit().await.is_ok());
    }

    #[tokio::test]
    async fn entry_ids_strictly_increase() {
        let store = InMemoryStockStore::default();
        let product = store
            .insert_product(&NewProduct {
                sku: "SKU-1".to_string(),
                price: 100,
            })
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        let first = tx.append_entry(&draft(product.id)).await.unwrap();
        let second = tx.append_entry(&draft(product.id)).await.unwrap();
        tx.commit().await.unwrap();

        assert!(second.id > first.id);
        assert!(second.created_at > first.created_at);
    }
}
