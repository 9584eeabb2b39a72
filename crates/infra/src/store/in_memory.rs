use std::sync::RwLock;

use stockledger_core::{
    AggregateRoot, Entity, ExitVoucherId, ExpectedVersion, OrderId, ProductId, SupplierId,
};
use stockledger_inventory::{Lot, LotDraw, Movement, Product, sort_fifo};
use stockledger_issuing::ExitVoucher;
use stockledger_purchasing::{Order, Supplier};

use super::changeset::{AggregateWrite, ChangeSet};
use super::query::{MovementFilter, Page, Pagination, SortDirection};
use super::r#trait::{StockStore, StoreError};

/// Every table of the store. Vectors keep insertion order, which is the
/// creation order the trait promises.
#[derive(Debug, Default)]
struct State {
    products: Vec<Product>,
    suppliers: Vec<Supplier>,
    lots: Vec<Lot>,
    movements: Vec<Movement>,
    orders: Vec<Order>,
    exit_vouchers: Vec<ExitVoucher>,
}

fn position_of<E: Entity>(rows: &[E], id: &E::Id) -> Option<usize> {
    rows.iter().position(|row| row.id() == id)
}

/// A change set checked against the current state. Holds the final form of
/// every row it writes: copies of the touched lots and products with the
/// draws and deltas already applied, keyed by their position in `State`.
#[derive(Debug, Default)]
struct Staged {
    orders: Vec<(Option<usize>, Order)>,
    deleted_orders: Vec<OrderId>,
    exit_vouchers: Vec<(Option<usize>, ExitVoucher)>,
    new_lots: Vec<Lot>,
    drawn_lots: Vec<(usize, Lot)>,
    movements: Vec<Movement>,
    products: Vec<(usize, Product)>,
}

impl State {
    /// Check every part of `changes` without writing anything.
    fn stage(&self, changes: ChangeSet) -> Result<Staged, StoreError> {
        changes.ensure_balanced()?;
        let ChangeSet {
            orders,
            deleted_orders,
            exit_vouchers,
            mut new_lots,
            lot_draws,
            movements,
            stock_deltas,
        } = changes;
        let mut staged = Staged::default();

        for AggregateWrite { record, expected } in orders {
            let position = self
                .orders
                .iter()
                .position(|o| o.id_typed() == record.id_typed());
            let current = position.map_or(0, |i| self.orders[i].version());
            check_version("order", record.order_number(), expected, current)?;

            let number = record.order_number();
            let number_taken = self
                .orders
                .iter()
                .chain(staged.orders.iter().map(|(_, o)| o))
                .any(|o| o.order_number() == number && o.id_typed() != record.id_typed());
            if number_taken {
                return Err(StoreError::Conflict(format!(
                    "order number {number} already exists"
                )));
            }
            staged.orders.push((position, record));
        }

        for (id, expected) in deleted_orders {
            let order = self
                .orders
                .iter()
                .find(|o| o.id_typed() == id)
                .ok_or_else(|| StoreError::missing("order", id))?;
            check_version("order", order.order_number(), expected, order.version())?;
            staged.deleted_orders.push(id);
        }

        for AggregateWrite { record, expected } in exit_vouchers {
            let position = self
                .exit_vouchers
                .iter()
                .position(|v| v.id_typed() == record.id_typed());
            let current = position.map_or(0, |i| self.exit_vouchers[i].version());
            check_version("exit voucher", record.voucher_number(), expected, current)?;

            let number = record.voucher_number();
            let number_taken = self
                .exit_vouchers
                .iter()
                .chain(staged.exit_vouchers.iter().map(|(_, v)| v))
                .any(|v| v.voucher_number() == number && v.id_typed() != record.id_typed());
            if number_taken {
                return Err(StoreError::Conflict(format!(
                    "exit voucher number {number} already exists"
                )));
            }
            staged.exit_vouchers.push((position, record));
        }

        for (i, lot) in new_lots.iter().enumerate() {
            if position_of(&self.products, &lot.product_id).is_none() {
                return Err(StoreError::missing("product", lot.product_id));
            }
            let number_taken = self
                .lots
                .iter()
                .chain(&new_lots[..i])
                .any(|l| l.lot_number == lot.lot_number);
            if number_taken {
                return Err(StoreError::Conflict(format!(
                    "lot number {} already exists",
                    lot.lot_number
                )));
            }
        }

        for draw in lot_draws {
            if let Some(i) = position_of(&self.lots, &draw.lot_id) {
                let mut lot = self.lots[i].clone();
                draw_from(&mut lot, &draw)?;
                staged.drawn_lots.push((i, lot));
            } else if let Some(lot) = new_lots.iter_mut().find(|l| l.id == draw.lot_id) {
                draw_from(lot, &draw)?;
            } else {
                return Err(StoreError::missing("lot", draw.lot_id));
            }
        }
        staged.new_lots = new_lots;

        for movement in &movements {
            let known = position_of(&self.lots, &movement.lot_id).is_some()
                || staged.new_lots.iter().any(|l| l.id == movement.lot_id);
            if !known {
                return Err(StoreError::missing("lot", movement.lot_id));
            }
        }
        staged.movements = movements;

        for (product_id, delta) in stock_deltas {
            let i = position_of(&self.products, &product_id)
                .ok_or_else(|| StoreError::missing("product", product_id))?;
            let mut product = self.products[i].clone();
            product
                .apply_stock_delta(delta)
                .map_err(|e| StoreError::Conflict(e.to_string()))?;
            staged.products.push((i, product));
        }

        Ok(staged)
    }

    /// Write a staged change set. Cannot fail.
    fn apply(&mut self, staged: Staged) {
        for (position, order) in staged.orders {
            match position {
                Some(i) => self.orders[i] = order,
                None => self.orders.push(order),
            }
        }
        if !staged.deleted_orders.is_empty() {
            self.orders
                .retain(|o| !staged.deleted_orders.contains(&o.id_typed()));
        }
        for (position, voucher) in staged.exit_vouchers {
            match position {
                Some(i) => self.exit_vouchers[i] = voucher,
                None => self.exit_vouchers.push(voucher),
            }
        }
        for (i, lot) in staged.drawn_lots {
            self.lots[i] = lot;
        }
        self.lots.extend(staged.new_lots);
        self.movements.extend(staged.movements);
        for (i, product) in staged.products {
            self.products[i] = product;
        }
    }
}

fn draw_from(lot: &mut Lot, draw: &LotDraw) -> Result<(), StoreError> {
    if lot.remaining_quantity() != draw.expected_remaining {
        return Err(StoreError::Conflict(format!(
            "lot {} has {} remaining, expected {}",
            lot.lot_number,
            lot.remaining_quantity(),
            draw.expected_remaining
        )));
    }
    lot.decrement_remaining(draw.quantity)
        .map_err(|e| StoreError::Conflict(e.to_string()))
}

fn check_version(
    entity: &str,
    number: &str,
    expected: ExpectedVersion,
    current: u64,
) -> Result<(), StoreError> {
    if expected.matches(current) {
        Ok(())
    } else {
        Err(StoreError::Conflict(format!(
            "{entity} {number}: expected {expected:?}, found version {current}"
        )))
    }
}

/// In-memory stock store.
///
/// Intended for tests/dev. A commit is staged first: every check runs against
/// the current state and only the lots and products it touches are copied.
/// Nothing is written unless the whole change set passed, so a commit costs
/// time in the size of the change set plus the linear row lookups, not a copy
/// of the ledger.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    state: RwLock<State>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> Result<T, StoreError> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(f(&state))
    }

    fn write<T>(&self, f: impl FnOnce(&mut State) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        f(&mut state)
    }
}

#[async_trait::async_trait]
impl StockStore for InMemoryStockStore {
    async fn product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.read(|s| s.products.iter().find(|p| p.id == id).cloned())
    }

    async fn product_by_reference(&self, reference: &str) -> Result<Option<Product>, StoreError> {
        self.read(|s| s.products.iter().find(|p| p.reference == reference).cloned())
    }

    async fn products(&self) -> Result<Vec<Product>, StoreError> {
        self.read(|s| s.products.clone())
    }

    async fn put_product(&self, product: Product) -> Result<(), StoreError> {
        self.write(|s| {
            if s
                .products
                .iter()
                .any(|p| p.reference == product.reference && p.id != product.id)
            {
                return Err(StoreError::Conflict(format!(
                    "product reference {} already exists",
                    product.reference
                )));
            }
            match position_of(&s.products, &product.id) {
                Some(i) => {
                    let current_stock = s.products[i].current_stock;
                    s.products[i] = Product {
                        current_stock,
                        ..product
                    };
                }
                None => s.products.push(product),
            }
            Ok(())
        })
    }

    async fn supplier(&self, id: SupplierId) -> Result<Option<Supplier>, StoreError> {
        self.read(|s| s.suppliers.iter().find(|sup| sup.id == id).cloned())
    }

    async fn put_supplier(&self, supplier: Supplier) -> Result<(), StoreError> {
        self.write(|s| {
            match s.suppliers.iter_mut().find(|sup| sup.id == supplier.id) {
                Some(existing) => *existing = supplier,
                None => s.suppliers.push(supplier),
            }
            Ok(())
        })
    }

    async fn available_lots(&self, product_id: ProductId) -> Result<Vec<Lot>, StoreError> {
        self.read(|s| {
            let mut lots: Vec<Lot> = s
                .lots
                .iter()
                .filter(|lot| lot.product_id == product_id && lot.is_available())
                .cloned()
                .collect();
            sort_fifo(&mut lots);
            lots
        })
    }

    async fn lots(&self) -> Result<Vec<Lot>, StoreError> {
        self.read(|s| s.lots.clone())
    }

    async fn count_lots(&self) -> Result<u64, StoreError> {
        self.read(|s| s.lots.len() as u64)
    }

    async fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<Page<Movement>, StoreError> {
        self.read(|s| {
            let reference_product = filter
                .product_reference
                .as_deref()
                .map(|reference| s.products.iter().find(|p| p.reference == reference).map(|p| p.id));
            let lot = filter
                .lot_number
                .as_deref()
                .map(|number| s.lots.iter().find(|l| l.lot_number == number).map(|l| l.id));

            let mut matching: Vec<Movement> = s
                .movements
                .iter()
                .filter(|m| filter.includes_date(m.movement_date))
                .filter(|m| filter.product_id.is_none_or(|id| m.product_id == id))
                .filter(|m| reference_product.is_none_or(|id| id == Some(m.product_id)))
                .filter(|m| filter.movement_type.is_none_or(|t| m.movement_type == t))
                .filter(|m| lot.is_none_or(|id| id == Some(m.lot_id)))
                .cloned()
                .collect();

            matching.sort_by_key(|m| m.movement_date);
            if filter.direction == SortDirection::NewestFirst {
                matching.reverse();
            }
            Page::from_sorted(matching, pagination.clamped())
        })
    }

    async fn movements_for_product(&self, product_id: ProductId) -> Result<Vec<Movement>, StoreError> {
        self.read(|s| {
            let mut movements: Vec<Movement> = s
                .movements
                .iter()
                .filter(|m| m.product_id == product_id)
                .cloned()
                .collect();
            movements.sort_by_key(|m| m.movement_date);
            movements.reverse();
            movements
        })
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        self.read(|s| s.orders.iter().find(|o| o.id_typed() == id).cloned())
    }

    async fn order_by_number(&self, order_number: &str) -> Result<Option<Order>, StoreError> {
        self.read(|s| s.orders.iter().find(|o| o.order_number() == order_number).cloned())
    }

    async fn orders(&self) -> Result<Vec<Order>, StoreError> {
        self.read(|s| s.orders.clone())
    }

    async fn count_orders(&self) -> Result<u64, StoreError> {
        self.read(|s| s.orders.len() as u64)
    }

    async fn exit_voucher(&self, id: ExitVoucherId) -> Result<Option<ExitVoucher>, StoreError> {
        self.read(|s| s.exit_vouchers.iter().find(|v| v.id_typed() == id).cloned())
    }

    async fn exit_vouchers(&self) -> Result<Vec<ExitVoucher>, StoreError> {
        self.read(|s| s.exit_vouchers.clone())
    }

    async fn count_exit_vouchers(&self) -> Result<u64, StoreError> {
        self.read(|s| s.exit_vouchers.len() as u64)
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        self.write(|state| {
            let staged = state.stage(changes)?;
            state.apply(staged);
            Ok(())
        })
    }
}
