use thiserror::Error;

use stockledger_core::{ExitVoucherId, OrderId, ProductId, SupplierId};
use stockledger_inventory::{Lot, Movement, Product};
use stockledger_issuing::ExitVoucher;
use stockledger_purchasing::{Order, Supplier};

use super::changeset::ChangeSet;
use super::query::{MovementFilter, Page, Pagination};

/// Stock store operation error.
///
/// These are **infrastructure errors** as opposed to domain errors (validation,
/// lifecycle violations, insufficient stock).
///
/// - **Conflict**: a change set expectation no longer holds (lot drawn
///   concurrently, stale aggregate version, generated number taken, or a
///   serialization failure). Re-running the workflow may succeed.
/// - **Missing**: a change set references a row that does not exist.
/// - **Backend**: storage failure or undecodable row.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("commit conflict: {0}")]
    Conflict(String),

    #[error("{entity} missing from store: {id}")]
    Missing { entity: &'static str, id: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn missing(entity: &'static str, id: impl core::fmt::Display) -> Self {
        Self::Missing {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Transactional store for products, lots, the movement ledger, orders and
/// exit vouchers.
///
/// ## Write model
///
/// Reads are plain snapshots and take no exclusive lock. Every write goes
/// through [`StockStore::commit`], which applies a [`ChangeSet`] atomically:
/// either every part of it lands or none does. `commit` must reject the whole
/// set with [`StoreError::Conflict`] when
///
/// - an aggregate write's `ExpectedVersion` does not match the stored version
///   (a missing row counts as version 0),
/// - a lot draw's `expected_remaining` differs from the lot's current
///   remaining quantity,
/// - a new lot, order or exit voucher reuses an existing number.
///
/// ## Ordering
///
/// `available_lots` returns lots with remaining quantity in FIFO order: entry
/// date ascending, ties in creation order. Movement queries order by movement
/// date, ties by recording order, in the direction the filter asks for.
///
/// ## Master data
///
/// `put_product` and `put_supplier` insert or replace master records. They are
/// seeding hooks for the product/supplier catalogue that lives outside this
/// crate; `put_product` never changes the stock of an existing product.
#[async_trait::async_trait]
pub trait StockStore: Send + Sync {
    async fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    async fn product_by_reference(&self, reference: &str) -> Result<Option<Product>, StoreError>;

    async fn products(&self) -> Result<Vec<Product>, StoreError>;

    async fn put_product(&self, product: Product) -> Result<(), StoreError>;

    async fn supplier(&self, id: SupplierId) -> Result<Option<Supplier>, StoreError>;

    async fn put_supplier(&self, supplier: Supplier) -> Result<(), StoreError>;

    /// Lots of a product with remaining quantity > 0, FIFO order.
    async fn available_lots(&self, product_id: ProductId) -> Result<Vec<Lot>, StoreError>;

    /// Every lot, drained ones included, in creation order.
    async fn lots(&self) -> Result<Vec<Lot>, StoreError>;

    async fn count_lots(&self) -> Result<u64, StoreError>;

    async fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<Movement>, StoreError>;

    /// All movements of a product, newest first.
    async fn movements_for_product(&self, product_id: ProductId) -> Result<Vec<Movement>, StoreError>;

    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    async fn order_by_number(&self, order_number: &str) -> Result<Option<Order>, StoreError>;

    /// Every order in creation order.
    async fn orders(&self) -> Result<Vec<Order>, StoreError>;

    async fn count_orders(&self) -> Result<u64, StoreError>;

    async fn exit_voucher(&self, id: ExitVoucherId) -> Result<Option<ExitVoucher>, StoreError>;

    /// Every exit voucher in creation order.
    async fn exit_vouchers(&self) -> Result<Vec<ExitVoucher>, StoreError>;

    async fn count_exit_vouchers(&self) -> Result<u64, StoreError>;

    /// Apply a change set atomically.
    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError>;
}
