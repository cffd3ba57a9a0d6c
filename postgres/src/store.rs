//! Postgres-backed stock store.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use stock_ledger_core::store::Result;
use stock_ledger_core::{
    CarrierId, CarrierState, Direction, EntryId, InventorySnapshot, LedgerEntry, LedgerEntryDraft,
    MovementFilter, NewCarrier, NewProduct, ProductId, ProductRecord, StockStore, StockTx,
    StorageError, UnitCarrier,
};
use tracing::info;

/// Default page size for ledger history reads.
const DEFAULT_PAGE_SIZE: i64 = 20;

/// Production [`StockStore`] over a Postgres connection pool.
#[derive(Clone)]
pub struct PostgresStockStore {
    pool: PgPool,
}

impl PostgresStockStore {
    /// Connect to the database at `url` with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url).await.map_err(map_sqlx)?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Access the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        info!("stock ledger schema migrations applied");
        Ok(())
    }
}

impl StockStore for PostgresStockStore {
    type Tx = PostgresStockTx;

    async fn begin(&self) -> Result<Self::Tx> {
        let tx = self.pool.begin().await.map_err(map_sqlx)?;
        Ok(PostgresStockTx { tx })
    }

    async fn product(&self, product_id: ProductId) -> Result<Option<ProductRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, sku, price, aggregate_stock
            FROM products
            WHERE id = $1
            ",
        )
        .bind(product_id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(row.as_ref().map(row_to_product))
    }

    async fn insert_product(&self, product: &NewProduct) -> Result<ProductRecord> {
        let row = sqlx::query(
            r"
            INSERT INTO products (sku, price)
            VALUES ($1, $2)
            RETURNING id, sku, price, aggregate_stock
            ",
        )
        .bind(&product.sku)
        .bind(product.price)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(row_to_product(&row))
    }

    async fn carrier_by_code(&self, code: &str) -> Result<Option<UnitCarrier>> {
        let row = sqlx::query(
            r"
            SELECT id, product_id, code, units_assigned, state
            FROM unit_carriers
            WHERE code = $1
            ",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.as_ref().map(row_to_carrier).transpose()
    }

    async fn last_movement(
        &self,
        carrier_id: CarrierId,
        direction: Direction,
    ) -> Result<Option<DateTime<Utc>>> {
        let (latest,): (Option<DateTime<Utc>>,) = sqlx::query_as(
            r"
            SELECT MAX(created_at)
            FROM ledger_entries
            WHERE carrier_id = $1 AND direction = $2
            ",
        )
        .bind(carrier_id.value())
        .bind(direction.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(latest)
    }

    async fn snapshot(&self, product_id: ProductId) -> Result<Option<InventorySnapshot>> {
        let row: Option<(i64, i64, DateTime<Utc>)> = sqlx::query_as(
            r"
            SELECT product_id, quantity, last_updated
            FROM inventory_snapshots
            WHERE product_id = $1
            ",
        )
        .bind(product_id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(row.map(|(id, quantity, last_updated)| InventorySnapshot {
            product_id: ProductId::new(id),
            quantity,
            last_updated,
        }))
    }

    async fn carrier_truth(&self, product_id: ProductId) -> Result<i64> {
        let (truth,): (i64,) = sqlx::query_as(CARRIER_TRUTH_SQL)
            .bind(product_id.value())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(truth)
    }

    async fn defective_carriers(&self, product_id: ProductId) -> Result<Vec<CarrierId>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r"
            SELECT id
            FROM unit_carriers
            WHERE product_id = $1 AND state = 'stocked_in' AND units_assigned = 0
            ORDER BY id
            ",
        )
        .bind(product_id.value())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(rows.into_iter().map(|(id,)| CarrierId::new(id)).collect())
    }

    async fn ledger_truth(&self, product_id: ProductId) -> Result<i64> {
        let (truth,): (i64,) = sqlx::query_as(
            r"
            SELECT COALESCE(SUM(
                CASE WHEN direction = 'in' THEN quantity ELSE -quantity END
            ), 0)::BIGINT
            FROM ledger_entries
            WHERE product_id = $1
            ",
        )
        .bind(product_id.value())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(truth)
    }

    async fn movements(&self, filter: &MovementFilter) -> Result<Vec<LedgerEntry>> {
        let limit = filter.limit.map_or(DEFAULT_PAGE_SIZE, i64::from);
        let rows = sqlx::query(
            r"
            SELECT id, product_id, carrier_id, direction, quantity,
                   actor, note, reference, created_at
            FROM ledger_entries
            WHERE ($1::BIGINT IS NULL OR product_id = $1)
              AND ($2::TEXT IS NULL OR direction = $2)
            ORDER BY id DESC
            LIMIT $3 OFFSET $4
            ",
        )
        .bind(filter.product_id.map(ProductId::value))
        .bind(filter.direction.map(Direction::as_str))
        .bind(limit)
        .bind(i64::from(filter.offset))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn product_ids(&self) -> Result<Vec<ProductId>> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM products ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(rows.into_iter().map(|(id,)| ProductId::new(id)).collect())
    }
}

/// An open unit of work against [`PostgresStockStore`].
///
/// Wraps one database transaction; dropping it without commit rolls it
/// back on the server.
pub struct PostgresStockTx {
    tx: Transaction<'static, Postgres>,
}

impl StockTx for PostgresStockTx {
    async fn lock_product(&mut self, product_id: ProductId) -> Result<ProductRecord> {
        let row = sqlx::query(
            r"
            SELECT id, sku, price, aggregate_stock
            FROM products
            WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(product_id.value())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| StorageError::Corrupt(format!("product {product_id} missing")))?;

        Ok(row_to_product(&row))
    }

    async fn lock_carrier(&mut self, carrier_id: CarrierId) -> Result<UnitCarrier> {
        let row = sqlx::query(
            r"
            SELECT id, product_id, code, units_assigned, state
            FROM unit_carriers
            WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(carrier_id.value())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| StorageError::Corrupt(format!("carrier {carrier_id} missing")))?;

        row_to_carrier(&row)
    }

    async fn update_carrier(&mut self, carrier: &UnitCarrier) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE unit_carriers
            SET units_assigned = $2, state = $3
            WHERE id = $1
            ",
        )
        .bind(carrier.id.value())
        .bind(carrier.units_assigned)
        .bind(state_to_str(carrier.state))
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Corrupt(format!(
                "carrier {} missing",
                carrier.id
            )));
        }
        Ok(())
    }

    async fn insert_carrier(&mut self, carrier: &NewCarrier) -> Result<UnitCarrier> {
        let row = sqlx::query(
            r"
            INSERT INTO unit_carriers (product_id, code, units_assigned, state)
            VALUES ($1, $2, $3, 'unassigned')
            RETURNING id, product_id, code, units_assigned, state
            ",
        )
        .bind(carrier.product_id.value())
        .bind(&carrier.code)
        .bind(carrier.units_assigned)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        row_to_carrier(&row)
    }

    async fn carriers_for_product(&mut self, product_id: ProductId) -> Result<Vec<UnitCarrier>> {
        let rows = sqlx::query(
            r"
            SELECT id, product_id, code, units_assigned, state
            FROM unit_carriers
            WHERE product_id = $1
            ORDER BY id
            FOR UPDATE
            ",
        )
        .bind(product_id.value())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(row_to_carrier).collect()
    }

    async fn append_entry(&mut self, draft: &LedgerEntryDraft) -> Result<LedgerEntry> {
        let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            r"
            INSERT INTO ledger_entries
                (product_id, carrier_id, direction, quantity, actor, note, reference)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, created_at
            ",
        )
        .bind(draft.product_id.value())
        .bind(draft.carrier_id.map(CarrierId::value))
        .bind(draft.direction.as_str())
        .bind(draft.quantity)
        .bind(&draft.actor)
        .bind(&draft.note)
        .bind(&draft.reference)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        Ok(LedgerEntry {
            id: EntryId::new(id),
            product_id: draft.product_id,
            carrier_id: draft.carrier_id,
            direction: draft.direction,
            quantity: draft.quantity,
            actor: draft.actor.clone(),
            note: draft.note.clone(),
            reference: draft.reference.clone(),
            created_at,
        })
    }

    async fn apply_aggregate(&mut self, product_id: ProductId, signed_delta: i64) -> Result<i64> {
        let (quantity,): (i64,) = sqlx::query_as(
            r"
            UPDATE products
            SET aggregate_stock = aggregate_stock + $2
            WHERE id = $1
            RETURNING aggregate_stock
            ",
        )
        .bind(product_id.value())
        .bind(signed_delta)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| StorageError::Corrupt(format!("product {product_id} missing")))?;

        upsert_snapshot(&mut self.tx, product_id, quantity).await?;
        Ok(quantity)
    }

    async fn overwrite_aggregate(&mut self, product_id: ProductId, quantity: i64) -> Result<i64> {
        let (quantity,): (i64,) = sqlx::query_as(
            r"
            UPDATE products
            SET aggregate_stock = $2
            WHERE id = $1
            RETURNING aggregate_stock
            ",
        )
        .bind(product_id.value())
        .bind(quantity)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| StorageError::Corrupt(format!("product {product_id} missing")))?;

        upsert_snapshot(&mut self.tx, product_id, quantity).await?;
        Ok(quantity)
    }

    async fn carrier_truth(&mut self, product_id: ProductId) -> Result<i64> {
        let (truth,): (i64,) = sqlx::query_as(CARRIER_TRUTH_SQL)
            .bind(product_id.value())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        Ok(truth)
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(map_sqlx)
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx)
    }
}

/// Shared by the pool-level and transaction-level truth queries so both
/// sides compute the sum identically.
const CARRIER_TRUTH_SQL: &str = r"
    SELECT COALESCE(SUM(units_assigned), 0)::BIGINT
    FROM unit_carriers
    WHERE product_id = $1 AND state = 'stocked_in'
";

async fn upsert_snapshot(
    tx: &mut Transaction<'static, Postgres>,
    product_id: ProductId,
    quantity: i64,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO inventory_snapshots (product_id, quantity, last_updated)
        VALUES ($1, $2, now())
        ON CONFLICT (product_id) DO UPDATE
        SET quantity = EXCLUDED.quantity, last_updated = EXCLUDED.last_updated
        ",
    )
    .bind(product_id.value())
    .bind(quantity)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

fn row_to_product(row: &PgRow) -> ProductRecord {
    ProductRecord {
        id: ProductId::new(row.get("id")),
        sku: row.get("sku"),
        price: row.get("price"),
        aggregate_stock: row.get("aggregate_stock"),
    }
}

fn row_to_carrier(row: &PgRow) -> Result<UnitCarrier> {
    let state: String = row.get("state");
    Ok(UnitCarrier {
        id: CarrierId::new(row.get("id")),
        product_id: ProductId::new(row.get("product_id")),
        code: row.get("code"),
        units_assigned: row.get("units_assigned"),
        state: state_from_str(&state)?,
    })
}

fn row_to_entry(row: &PgRow) -> Result<LedgerEntry> {
    let direction: String = row.get("direction");
    let carrier_id: Option<i64> = row.get("carrier_id");
    Ok(LedgerEntry {
        id: EntryId::new(row.get("id")),
        product_id: ProductId::new(row.get("product_id")),
        carrier_id: carrier_id.map(CarrierId::new),
        direction: direction_from_str(&direction)?,
        quantity: row.get("quantity"),
        actor: row.get("actor"),
        note: row.get("note"),
        reference: row.get("reference"),
        created_at: row.get("created_at"),
    })
}

const fn state_to_str(state: CarrierState) -> &'static str {
    match state {
        CarrierState::Unassigned => "unassigned",
        CarrierState::StockedIn => "stocked_in",
        CarrierState::StockedOut => "stocked_out",
    }
}

fn state_from_str(s: &str) -> Result<CarrierState> {
    match s {
        "unassigned" => Ok(CarrierState::Unassigned),
        "stocked_in" => Ok(CarrierState::StockedIn),
        "stocked_out" => Ok(CarrierState::StockedOut),
        _ => Err(StorageError::Corrupt(format!(
            "invalid carrier state: {s}"
        ))),
    }
}

fn direction_from_str(s: &str) -> Result<Direction> {
    match s {
        "in" => Ok(Direction::In),
        "out" => Ok(Direction::Out),
        _ => Err(StorageError::Corrupt(format!("invalid direction: {s}"))),
    }
}

/// Map a driver error onto the store's taxonomy: unique and serialization
/// violations are conflicts, missing rows are corruption, everything else
/// is the datastore being unavailable.
fn map_sqlx(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::RowNotFound => StorageError::Corrupt(err.to_string()),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // unique_violation
            Some("23505") => StorageError::Conflict(db.to_string()),
            // serialization_failure, deadlock_detected
            Some("40001" | "40P01") => StorageError::Conflict(db.to_string()),
            // foreign_key_violation
            Some("23503") => StorageError::Corrupt(db.to_string()),
            _ => StorageError::Unavailable(db.to_string()),
        },
        _ => StorageError::Unavailable(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code unwraps for clear failure locations

    use super::*;

    #[test]
    fn carrier_state_strings_round_trip() {
        for state in [
            CarrierState::Unassigned,
            CarrierState::StockedIn,
            CarrierState::StockedOut,
        ] {
            assert_eq!(state_from_str(state_to_str(state)).unwrap(), state);
        }
    }

    #[test]
    fn unknown_state_string_is_corruption() {
        assert!(matches!(
            state_from_str("lost"),
            Err(StorageError::Corrupt(_))
        ));
    }

    #[test]
    fn direction_strings_match_core_encoding() {
        assert_eq!(direction_from_str("in").unwrap(), Direction::In);
        assert_eq!(direction_from_str("out").unwrap(), Direction::Out);
        assert_eq!(direction_from_str(Direction::In.as_str()).unwrap(), Direction::In);
        assert!(direction_from_str("sideways").is_err());
    }
}
