//! Unit of work handed to [`StockStore::commit`](super::StockStore::commit).
//!
//! Workflows read a snapshot, run pure domain logic against it and describe
//! the outcome as a `ChangeSet`. Every write carries the expectation it was
//! computed under so the store can refuse it if the snapshot went stale.

use std::collections::HashMap;

use stockledger_core::{ExpectedVersion, OrderId, ProductId};
use stockledger_inventory::{Lot, LotDraw, Movement};
use stockledger_issuing::{ExitVoucher, Issue};
use stockledger_purchasing::{Order, Reception};

use super::r#trait::StoreError;

/// An aggregate to insert or replace, guarded by the version it was loaded at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateWrite<T> {
    pub record: T,
    pub expected: ExpectedVersion,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub orders: Vec<AggregateWrite<Order>>,
    pub deleted_orders: Vec<(OrderId, ExpectedVersion)>,
    pub exit_vouchers: Vec<AggregateWrite<ExitVoucher>>,
    pub new_lots: Vec<Lot>,
    /// At most one draw per lot; `expected_remaining` is the lot's remaining
    /// quantity in the snapshot the workflow read.
    pub lot_draws: Vec<LotDraw>,
    pub movements: Vec<Movement>,
    /// At most one signed delta per product.
    pub stock_deltas: Vec<(ProductId, i64)>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
            && self.deleted_orders.is_empty()
            && self.exit_vouchers.is_empty()
            && self.new_lots.is_empty()
            && self.lot_draws.is_empty()
            && self.movements.is_empty()
            && self.stock_deltas.is_empty()
    }

    pub fn save_order(&mut self, order: Order, expected: ExpectedVersion) {
        self.orders.push(AggregateWrite {
            record: order,
            expected,
        });
    }

    pub fn delete_order(&mut self, id: OrderId, expected: ExpectedVersion) {
        self.deleted_orders.push((id, expected));
    }

    pub fn save_exit_voucher(&mut self, voucher: ExitVoucher, expected: ExpectedVersion) {
        self.exit_vouchers.push(AggregateWrite {
            record: voucher,
            expected,
        });
    }

    pub fn open_lot(&mut self, lot: Lot) {
        self.new_lots.push(lot);
    }

    /// Add a lot draw, folding repeated draws on one lot into a single entry
    /// that keeps the first (snapshot) expectation.
    pub fn draw(&mut self, draw: LotDraw) {
        match self.lot_draws.iter_mut().find(|d| d.lot_id == draw.lot_id) {
            Some(existing) => existing.quantity += draw.quantity,
            None => self.lot_draws.push(draw),
        }
    }

    pub fn record(&mut self, movement: Movement) {
        self.movements.push(movement);
    }

    pub fn adjust_stock(&mut self, product_id: ProductId, delta: i64) {
        match self.stock_deltas.iter_mut().find(|(id, _)| *id == product_id) {
            Some((_, existing)) => *existing += delta,
            None => self.stock_deltas.push((product_id, delta)),
        }
    }

    /// New lots, ENTRY movements and stock increments of an order reception.
    pub fn apply_reception(&mut self, reception: Reception) {
        for (product_id, quantity) in reception.stock_increments() {
            self.adjust_stock(product_id, quantity);
        }
        let Reception { lots, movements } = reception;
        for lot in lots {
            self.open_lot(lot);
        }
        for movement in movements {
            self.record(movement);
        }
    }

    /// Lot draws, EXIT movements and stock decrements of a voucher validation.
    pub fn apply_issue(&mut self, issue: Issue) {
        for (product_id, delta) in issue.stock_deltas() {
            self.adjust_stock(product_id, delta);
        }
        for allocation in issue.allocations {
            for draw in allocation.draws {
                self.draw(draw);
            }
            for movement in allocation.movements {
                self.record(movement);
            }
        }
    }

    /// Check that `stock_deltas` match what the lots imply: new lot
    /// quantities minus drawn quantities, per product. Keeps each product's
    /// cached stock equal to the sum of its lots.
    pub fn ensure_balanced(&self) -> Result<(), StoreError> {
        let mut implied: HashMap<ProductId, i64> = HashMap::new();
        for lot in &self.new_lots {
            *implied.entry(lot.product_id).or_default() += lot.initial_quantity;
        }
        for draw in &self.lot_draws {
            *implied.entry(draw.product_id).or_default() -= draw.quantity;
        }
        implied.retain(|_, delta| *delta != 0);

        let declared: HashMap<ProductId, i64> = self
            .stock_deltas
            .iter()
            .copied()
            .filter(|(_, delta)| *delta != 0)
            .collect();

        if implied != declared {
            return Err(StoreError::Backend(format!(
                "unbalanced change set: stock deltas {declared:?} do not match lot changes {implied:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::LotId;

    fn draw(lot_id: LotId, product_id: ProductId, expected_remaining: i64, quantity: i64) -> LotDraw {
        LotDraw {
            lot_id,
            product_id,
            expected_remaining,
            quantity,
        }
    }

    #[test]
    fn draws_on_one_lot_fold_into_first_expectation() {
        let lot_id = LotId::new();
        let product = ProductId::new();
        let mut changes = ChangeSet::new();
        changes.draw(draw(lot_id, product, 40, 30));
        changes.draw(draw(lot_id, product, 10, 10));

        assert_eq!(changes.lot_draws, vec![draw(lot_id, product, 40, 40)]);
    }

    #[test]
    fn balance_check_matches_draws_against_stock_deltas() {
        let product = ProductId::new();
        let mut changes = ChangeSet::new();
        changes.draw(draw(LotId::new(), product, 40, 30));
        assert!(changes.ensure_balanced().is_err());

        changes.adjust_stock(product, -30);
        assert!(changes.ensure_balanced().is_ok());

        changes.adjust_stock(product, -1);
        assert!(matches!(changes.ensure_balanced(), Err(StoreError::Backend(_))));
    }

    #[test]
    fn stock_deltas_are_merged_per_product() {
        let product = ProductId::new();
        let other = ProductId::new();
        let mut changes = ChangeSet::new();
        changes.adjust_stock(product, -30);
        changes.adjust_stock(other, 5);
        changes.adjust_stock(product, -20);
        assert_eq!(changes.stock_deltas, vec![(product, -50), (other, 5)]);
        assert!(!changes.is_empty());
        assert!(ChangeSet::new().is_empty());
    }
}
