//! Read-only stock reports: per-product detail, global state, reorder list,
//! valuation and movement history.
//!
//! Reports read plain snapshots and never write. Values are computed from lot
//! remaining quantities at lot prices, not from the product list price.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use stockledger_core::{DomainError, ProductId};
use stockledger_inventory::{
    Lot, Movement, Product, ValuationSummary, global_valuation, value_of_product,
};

use crate::store::{MovementFilter, Page, Pagination, StockStore};
use crate::workflows::WorkflowError;

/// Stock position of one product with its available lots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDetail {
    pub product_id: ProductId,
    pub name: String,
    pub reference: String,
    pub current_stock: i64,
    pub reorder_point: i64,
    pub total_value: Decimal,
    /// Lots with remaining quantity, FIFO order.
    pub lots: Vec<Lot>,
}

/// One row of the global stock state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockState {
    pub product_id: ProductId,
    pub name: String,
    pub reference: String,
    pub current_stock: i64,
    pub reorder_point: i64,
    pub needs_reorder: bool,
    pub value: Decimal,
}

impl StockState {
    fn of(product: &Product, lots: &[Lot]) -> Self {
        Self {
            product_id: product.id,
            name: product.name.clone(),
            reference: product.reference.clone(),
            current_stock: product.current_stock,
            reorder_point: product.reorder_point,
            needs_reorder: product.needs_reorder(),
            value: value_of_product(product.id, lots),
        }
    }
}

pub struct StockReports<S: ?Sized> {
    store: Arc<S>,
}

impl<S> StockReports<S>
where
    S: StockStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    pub async fn stock_detail(&self, product_id: ProductId) -> Result<StockDetail, WorkflowError> {
        let product = self
            .store
            .product(product_id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", product_id))?;
        let lots = self.store.available_lots(product_id).await?;

        Ok(StockDetail {
            product_id,
            total_value: value_of_product(product_id, &lots),
            name: product.name,
            reference: product.reference,
            current_stock: product.current_stock,
            reorder_point: product.reorder_point,
            lots,
        })
    }

    /// One row per product, in store order.
    #[instrument(skip(self), err)]
    pub async fn global_stock_state(&self) -> Result<Vec<StockState>, WorkflowError> {
        let products = self.store.products().await?;
        let lots = self.store.lots().await?;
        Ok(products.iter().map(|p| StockState::of(p, &lots)).collect())
    }

    pub async fn products_needing_reorder(&self) -> Result<Vec<StockState>, WorkflowError> {
        let mut state = self.global_stock_state().await?;
        state.retain(|row| row.needs_reorder);
        Ok(state)
    }

    #[instrument(skip(self), err)]
    pub async fn global_valuation(&self) -> Result<ValuationSummary, WorkflowError> {
        let lots = self.store.lots().await?;
        Ok(global_valuation(&lots))
    }

    pub async fn value_of_product(&self, product_id: ProductId) -> Result<Decimal, WorkflowError> {
        let lots = self.store.available_lots(product_id).await?;
        Ok(value_of_product(product_id, &lots))
    }

    pub async fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<Movement>, WorkflowError> {
        Ok(self.store.query_movements(filter, pagination).await?)
    }

    /// Every movement of a product, newest first.
    pub async fn movements_for_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<Movement>, WorkflowError> {
        Ok(self.store.movements_for_product(product_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChangeSet, InMemoryStockStore};
    use chrono::{NaiveDate, Utc};
    use stockledger_core::OrderId;
    use stockledger_inventory::LotReceipt;

    async fn store_with(product: &Product, lots: &[(i64, i64, i64)]) -> Arc<InMemoryStockStore> {
        let store = Arc::new(InMemoryStockStore::new());
        store.put_product(product.clone()).await.unwrap();
        let mut changes = ChangeSet::new();
        for (i, (initial, drawn, cents)) in lots.iter().enumerate() {
            let lot = Lot::receive(LotReceipt {
                lot_number: format!("LOT-20240101-{:04}", i + 1),
                entry_date: NaiveDate::from_ymd_opt(2024, 1, 1 + i as u32).unwrap(),
                quantity: *initial,
                unit_price: Decimal::new(*cents, 2),
                product_id: product.id,
                order_id: OrderId::new(),
                created_at: Utc::now(),
            })
            .unwrap();
            changes.adjust_stock(product.id, initial - drawn);
            if *drawn > 0 {
                changes.draw(stockledger_inventory::LotDraw {
                    lot_id: lot.id,
                    product_id: product.id,
                    expected_remaining: *initial,
                    quantity: *drawn,
                });
            }
            changes.open_lot(lot);
        }
        store.commit(changes).await.unwrap();
        store
    }

    #[tokio::test]
    async fn empty_store_values_to_zero() {
        let reports = StockReports::new(Arc::new(InMemoryStockStore::new()));
        assert_eq!(reports.global_valuation().await.unwrap(), ValuationSummary::empty());
        assert!(reports.global_stock_state().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn detail_and_valuation_use_remaining_quantities() {
        let product = Product::new("OIL-5", "Oil 5L", Decimal::new(900, 2)).with_reorder_point(40);
        let store = store_with(&product, &[(50, 50, 1000), (30, 0, 1200), (20, 5, 1500)]).await;
        let reports = StockReports::new(store);

        let detail = reports.stock_detail(product.id).await.unwrap();
        assert_eq!(detail.current_stock, 45);
        assert_eq!(detail.lots.len(), 2);
        // 30 x 12.00 + 15 x 15.00
        assert_eq!(detail.total_value, Decimal::new(58500, 2));
        assert_eq!(
            reports.value_of_product(product.id).await.unwrap(),
            detail.total_value
        );

        let summary = reports.global_valuation().await.unwrap();
        assert_eq!(summary.total_value, Decimal::new(58500, 2));
        assert_eq!(summary.product_count, 1);
        assert_eq!(summary.total_quantity, 45);

        let state = reports.global_stock_state().await.unwrap();
        assert_eq!(state.len(), 1);
        assert!(!state[0].needs_reorder);
        assert!(reports.products_needing_reorder().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reorder_flag_is_inclusive() {
        let product = Product::new("TAPE", "Tape", Decimal::new(150, 2)).with_reorder_point(10);
        let store = store_with(&product, &[(10, 0, 150)]).await;
        let reports = StockReports::new(store);

        let flagged = reports.products_needing_reorder().await.unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].reference, "TAPE");
        assert_eq!(flagged[0].value, Decimal::new(1500, 2));
    }

    #[tokio::test]
    async fn unknown_product_detail_is_not_found() {
        let reports = StockReports::new(Arc::new(InMemoryStockStore::new()));
        match reports.stock_detail(ProductId::new()).await {
            Err(WorkflowError::Domain(DomainError::NotFound { entity, .. })) => {
                assert_eq!(entity, "product")
            }
            other => panic!("Expected not found, got {other:?}"),
        }
    }
}
