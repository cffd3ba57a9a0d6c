//! Storage abstraction: the unit-of-work boundary.
//!
//! # Design
//!
//! Every stock movement must commit the carrier transition, the ledger
//! append, and both cached-view updates as one atomic unit. The traits here
//! make that boundary explicit: [`StockStore::begin`] opens a
//! [`StockTx`], mutations happen through the transaction, and nothing is
//! observable to other readers until [`StockTx::commit`] returns.
//!
//! Locking discipline: [`StockTx::lock_product`] must acquire an exclusive
//! row-level lock (or an equivalent single-writer guarantee) that is held
//! until commit or rollback. All writes for one product are serialized
//! through that lock; appends for different products may proceed
//! concurrently.
//!
//! Dropping an open transaction rolls it back. A request that times out
//! before commit therefore has no observable effect.
//!
//! # Implementations
//!
//! - `PostgresStockStore` (in `stock-ledger-postgres`): production
//!   implementation over sqlx transactions and `SELECT ... FOR UPDATE`.
//! - `InMemoryStockStore` (in `stock-ledger-testing`): staged-copy
//!   transactions for fast, deterministic tests with fault injection.

use crate::error::StorageError;
use crate::types::{
    CarrierId, Direction, InventorySnapshot, LedgerEntry, LedgerEntryDraft, NewCarrier,
    NewProduct, ProductId, ProductRecord, UnitCarrier,
};
use chrono::{DateTime, Utc};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Filter for paged ledger history reads.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MovementFilter {
    /// Restrict to one product.
    pub product_id: Option<ProductId>,
    /// Restrict to one direction.
    pub direction: Option<Direction>,
    /// Maximum entries to return (newest first). `None` means the
    /// implementation's default page size.
    pub limit: Option<u32>,
    /// Entries to skip before the first returned one.
    pub offset: u32,
}

/// An open atomic unit of work against the stock datastore.
///
/// All mutating methods stage changes that become visible only at
/// [`commit`](Self::commit). Implementations must roll back on drop.
pub trait StockTx: Send {
    /// Lock the product row exclusively and return it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupt`] if the product does not exist, or
    /// [`StorageError::Unavailable`] on datastore failure.
    fn lock_product(
        &mut self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<ProductRecord>> + Send;

    /// Lock a carrier row exclusively and return it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupt`] if the carrier does not exist, or
    /// [`StorageError::Unavailable`] on datastore failure.
    fn lock_carrier(
        &mut self,
        carrier_id: CarrierId,
    ) -> impl Future<Output = Result<UnitCarrier>> + Send;

    /// Persist a carrier's state and unit count.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on datastore failure.
    fn update_carrier(&mut self, carrier: &UnitCarrier)
    -> impl Future<Output = Result<()>> + Send;

    /// Insert a freshly issued carrier and return it with its assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] if the code is already taken, or
    /// [`StorageError::Unavailable`] on datastore failure.
    fn insert_carrier(
        &mut self,
        carrier: &NewCarrier,
    ) -> impl Future<Output = Result<UnitCarrier>> + Send;

    /// All carriers for a product, ordered by id, locked for update.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on datastore failure.
    fn carriers_for_product(
        &mut self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<Vec<UnitCarrier>>> + Send;

    /// Append an entry to the movement ledger.
    ///
    /// The implementation assigns the strictly increasing id and the commit
    /// timestamp. The entry is never mutated afterward.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on datastore failure. Input validation is
    /// the caller's job; by the time a draft reaches storage it is valid.
    fn append_entry(
        &mut self,
        draft: &LedgerEntryDraft,
    ) -> impl Future<Output = Result<LedgerEntry>> + Send;

    /// Apply one signed delta to both cached views (product aggregate and
    /// inventory snapshot) and return the new aggregate.
    ///
    /// Both views are written from the same delta, never computed
    /// independently per view.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on datastore failure.
    fn apply_aggregate(
        &mut self,
        product_id: ProductId,
        signed_delta: i64,
    ) -> impl Future<Output = Result<i64>> + Send;

    /// Overwrite both cached views with an absolute quantity (repair path)
    /// and return it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on datastore failure.
    fn overwrite_aggregate(
        &mut self,
        product_id: ProductId,
        quantity: i64,
    ) -> impl Future<Output = Result<i64>> + Send;

    /// Sum of `units_assigned` over stocked-in carriers for the product,
    /// computed under this transaction's locks.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on datastore failure.
    fn carrier_truth(
        &mut self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<i64>> + Send;

    /// Commit the unit of work. Consumes the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the commit fails; nothing staged in this
    /// transaction is then observable.
    fn commit(self) -> impl Future<Output = Result<()>> + Send;

    /// Roll back the unit of work explicitly. Consumes the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on datastore failure; staged changes are
    /// discarded either way.
    fn rollback(self) -> impl Future<Output = Result<()>> + Send;
}

/// Handle to the stock datastore.
///
/// Read methods take no locks and see only committed state. Mutations go
/// through [`begin`](Self::begin).
pub trait StockStore: Send + Sync {
    /// The unit-of-work type this store produces.
    type Tx: StockTx;

    /// Open an atomic unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if the datastore cannot be
    /// reached.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx>> + Send;

    /// Look up a product by id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on datastore failure.
    fn product(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<Option<ProductRecord>>> + Send;

    /// Insert a product into the catalog.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] if the sku is already taken.
    fn insert_product(
        &self,
        product: &NewProduct,
    ) -> impl Future<Output = Result<ProductRecord>> + Send;

    /// Resolve a scanned code to its carrier, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on datastore failure.
    fn carrier_by_code(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<Option<UnitCarrier>>> + Send;

    /// Commit time of the most recent ledger entry for a carrier and
    /// direction, for cooldown dedup.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on datastore failure.
    fn last_movement(
        &self,
        carrier_id: CarrierId,
        direction: Direction,
    ) -> impl Future<Output = Result<Option<DateTime<Utc>>>> + Send;

    /// The product's inventory snapshot row, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on datastore failure.
    fn snapshot(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<Option<InventorySnapshot>>> + Send;

    /// Sum of `units_assigned` over stocked-in carriers, from committed
    /// state.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on datastore failure.
    fn carrier_truth(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<i64>> + Send;

    /// Carriers violating the zero-units invariant (stocked in with
    /// `units_assigned = 0`), from committed state.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on datastore failure.
    fn defective_carriers(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<Vec<CarrierId>>> + Send;

    /// Signed sum of the product's ledger entries since inception.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on datastore failure.
    fn ledger_truth(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<i64>> + Send;

    /// Paged ledger history, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on datastore failure.
    fn movements(
        &self,
        filter: &MovementFilter,
    ) -> impl Future<Output = Result<Vec<LedgerEntry>>> + Send;

    /// Product ids known to the store, for the periodic reconciliation
    /// sweep.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on datastore failure.
    fn product_ids(&self) -> impl Future<Output = Result<Vec<ProductId>>> + Send;
}
