//! FIFO allocator.
//!
//! Consumes lots oldest-first to satisfy an issue quantity. The allocator is a
//! pure function of `(lots, quantity)`: it plans every draw before touching a
//! lot, so a shortfall leaves the working set exactly as it was. Persisting the
//! resulting movements and lot draws is the caller's job.

use serde::{Deserialize, Serialize};

use stockledger_core::{Clock, DomainError, DomainResult, LotId, ProductId};

use crate::lot::Lot;
use crate::movement::Movement;
use crate::product::Product;

/// A planned decrement of one lot.
///
/// `expected_remaining` is the lot's remaining quantity when the plan was made;
/// stores use it as a compare-and-set guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotDraw {
    pub lot_id: LotId,
    pub product_id: ProductId,
    pub expected_remaining: i64,
    pub quantity: i64,
}

/// Outcome of allocating one quantity of one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub product_id: ProductId,
    pub requested: i64,
    /// One EXIT movement per touched lot, oldest lot first. References are
    /// left blank for the caller to tag.
    pub movements: Vec<Movement>,
    /// Exactly one draw per movement, in the same order.
    pub draws: Vec<LotDraw>,
}

impl Allocation {
    pub fn total_quantity(&self) -> i64 {
        self.draws.iter().map(|d| d.quantity).sum()
    }

    /// Tag every movement with the same reference.
    pub fn tag(&mut self, reference: &str) {
        for movement in &mut self.movements {
            movement.reference = reference.to_string();
        }
    }
}

/// Plan an allocation without mutating any lot.
///
/// Lots of other products and lots with nothing remaining are skipped; the
/// rest are consumed by entry date, ties kept in slice order.
pub fn plan(
    product: &Product,
    lots: &[Lot],
    quantity: i64,
    clock: &dyn Clock,
) -> DomainResult<Allocation> {
    if quantity <= 0 {
        return Err(DomainError::invalid_quantity(format!(
            "allocation of {} must be positive, got {quantity}",
            product.reference
        )));
    }

    let mut candidates: Vec<&Lot> = lots
        .iter()
        .filter(|lot| lot.product_id == product.id && lot.is_available())
        .collect();
    candidates.sort_by_key(|lot| lot.entry_date);

    let today = clock.today();
    let now = clock.now();
    let mut still_needed = quantity;
    let mut movements = Vec::new();
    let mut draws = Vec::new();

    for lot in candidates {
        if still_needed == 0 {
            break;
        }
        let take = lot.remaining_quantity().min(still_needed);
        movements.push(Movement::exit(lot, take, today, now)?);
        draws.push(LotDraw {
            lot_id: lot.id,
            product_id: lot.product_id,
            expected_remaining: lot.remaining_quantity(),
            quantity: take,
        });
        still_needed -= take;
    }

    if still_needed > 0 {
        return Err(DomainError::insufficient_stock(
            product.name.clone(),
            quantity,
            quantity - still_needed,
        ));
    }

    Ok(Allocation {
        product_id: product.id,
        requested: quantity,
        movements,
        draws,
    })
}

/// Plan an allocation and apply its draws to the working lots.
///
/// On error no lot is modified.
pub fn allocate(
    product: &Product,
    lots: &mut [Lot],
    quantity: i64,
    clock: &dyn Clock,
) -> DomainResult<Allocation> {
    let allocation = plan(product, lots, quantity, clock)?;
    for draw in &allocation.draws {
        let lot = lots
            .iter_mut()
            .find(|lot| lot.id == draw.lot_id)
            .ok_or_else(|| DomainError::not_found("lot", draw.lot_id))?;
        lot.decrement_remaining(draw.quantity)?;
    }
    Ok(allocation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lot::LotReceipt;
    use crate::movement::MovementType;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use stockledger_core::{FixedClock, OrderId};

    fn clock() -> FixedClock {
        FixedClock::on(NaiveDate::from_ymd_opt(2025, 2, 1).unwrap())
    }

    fn product() -> Product {
        Product::new("P", "P", Decimal::new(1000, 2))
    }

    fn lot(product: &Product, number: &str, day: u32, quantity: i64, cents: i64) -> Lot {
        Lot::receive(LotReceipt {
            lot_number: number.to_string(),
            entry_date: NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
            quantity,
            unit_price: Decimal::new(cents, 2),
            product_id: product.id,
            order_id: OrderId::new(),
            created_at: clock().now(),
        })
        .unwrap()
    }

    /// L1 50@10.00 (Jan 1), L2 30@12.00 (Jan 5), L3 20@15.00 (Jan 10), shuffled.
    fn three_lots(product: &Product) -> Vec<Lot> {
        vec![
            lot(product, "L2", 5, 30, 1200),
            lot(product, "L3", 10, 20, 1500),
            lot(product, "L1", 1, 50, 1000),
        ]
    }

    fn remaining(lots: &[Lot], number: &str) -> i64 {
        lots.iter()
            .find(|l| l.lot_number == number)
            .map(Lot::remaining_quantity)
            .unwrap()
    }

    #[test]
    fn allocation_within_oldest_lot_takes_one_movement() {
        let p = product();
        let mut lots = three_lots(&p);
        let l1 = lots[2].id;

        let allocation = allocate(&p, &mut lots, 30, &clock()).unwrap();

        assert_eq!(allocation.movements.len(), 1);
        let m = &allocation.movements[0];
        assert_eq!(m.quantity, 30);
        assert_eq!(m.unit_price, Decimal::new(1000, 2));
        assert_eq!(m.lot_id, l1);
        assert_eq!(m.movement_type, MovementType::Exit);
        assert_eq!(m.movement_date, clock().today());
        assert_eq!(remaining(&lots, "L1"), 20);
        assert_eq!(remaining(&lots, "L2"), 30);
    }

    #[test]
    fn allocation_spills_into_next_lot_at_its_price() {
        let p = product();
        let mut lots = three_lots(&p);

        let allocation = allocate(&p, &mut lots, 70, &clock()).unwrap();

        let got: Vec<(i64, Decimal)> = allocation
            .movements
            .iter()
            .map(|m| (m.quantity, m.unit_price))
            .collect();
        assert_eq!(
            got,
            vec![(50, Decimal::new(1000, 2)), (20, Decimal::new(1200, 2))]
        );
        assert_eq!(remaining(&lots, "L1"), 0);
        assert_eq!(remaining(&lots, "L2"), 10);
        assert_eq!(remaining(&lots, "L3"), 20);
    }

    #[test]
    fn shortfall_fails_without_touching_lots() {
        let p = product();
        let mut lots = three_lots(&p);

        match allocate(&p, &mut lots, 150, &clock()) {
            Err(DomainError::InsufficientStock {
                product,
                requested,
                available,
            }) => {
                assert_eq!(product, "P");
                assert_eq!(requested, 150);
                assert_eq!(available, 100);
            }
            other => panic!("Expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(remaining(&lots, "L1"), 50);
        assert_eq!(remaining(&lots, "L2"), 30);
        assert_eq!(remaining(&lots, "L3"), 20);
    }

    #[test]
    fn draws_record_remaining_before_allocation() {
        let p = product();
        let lots = three_lots(&p);
        let allocation = plan(&p, &lots, 60, &clock()).unwrap();
        let draws: Vec<(i64, i64)> = allocation
            .draws
            .iter()
            .map(|d| (d.expected_remaining, d.quantity))
            .collect();
        assert_eq!(draws, vec![(50, 50), (30, 10)]);
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        let p = product();
        let lots = three_lots(&p);
        assert!(matches!(
            plan(&p, &lots, 0, &clock()),
            Err(DomainError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn lots_of_other_products_and_empty_lots_are_ignored() {
        let p = product();
        let other = Product::new("Q", "Q", Decimal::ONE);
        let mut drained = lot(&p, "L0", 1, 5, 900);
        drained.decrement_remaining(5).unwrap();
        let lots = vec![drained, lot(&other, "X", 1, 100, 100), lot(&p, "L1", 2, 10, 1000)];

        let allocation = plan(&p, &lots, 10, &clock()).unwrap();
        assert_eq!(allocation.draws.len(), 1);
        assert_eq!(allocation.draws[0].lot_id, lots[2].id);
    }

    #[test]
    fn tag_sets_reference_on_every_movement() {
        let p = product();
        let mut lots = three_lots(&p);
        let mut allocation = allocate(&p, &mut lots, 90, &clock()).unwrap();
        allocation.tag("EXIT-BS-20250201-0001");
        assert!(
            allocation
                .movements
                .iter()
                .all(|m| m.reference == "EXIT-BS-20250201-0001")
        );
    }

    fn lots_strategy() -> impl Strategy<Value = Vec<(u32, i64, i64)>> {
        prop::collection::vec((1u32..28, 1i64..100, 1i64..10_000), 0..12)
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 500, ..ProptestConfig::default() })]

        #[test]
        fn allocation_is_exact_oldest_first_or_untouched(
            specs in lots_strategy(),
            quantity in 1i64..800,
        ) {
            let p = product();
            let mut lots: Vec<Lot> = specs
                .iter()
                .enumerate()
                .map(|(i, (day, qty, cents))| lot(&p, &format!("L{i}"), *day, *qty, *cents))
                .collect();
            let before: Vec<i64> = lots.iter().map(Lot::remaining_quantity).collect();
            let total: i64 = before.iter().sum();

            match allocate(&p, &mut lots, quantity, &clock()) {
                Ok(allocation) => {
                    prop_assert!(quantity <= total);
                    prop_assert_eq!(allocation.total_quantity(), quantity);
                    prop_assert_eq!(allocation.movements.len(), allocation.draws.len());

                    // Every touched lot except the last is drained, in entry order.
                    let touched: Vec<&Lot> = allocation
                        .draws
                        .iter()
                        .map(|d| lots.iter().find(|l| l.id == d.lot_id).unwrap())
                        .collect();
                    for pair in touched.windows(2) {
                        prop_assert!(pair[0].entry_date <= pair[1].entry_date);
                        prop_assert_eq!(pair[0].remaining_quantity(), 0);
                    }
                    // Every lot older than the last touched one is drained.
                    if let Some(last) = touched.last() {
                        for l in lots.iter().filter(|l| l.entry_date < last.entry_date) {
                            prop_assert_eq!(l.remaining_quantity(), 0);
                        }
                    }
                }
                Err(DomainError::InsufficientStock { requested, available, .. }) => {
                    prop_assert!(quantity > total);
                    prop_assert_eq!(requested, quantity);
                    prop_assert_eq!(available, total);
                    let after: Vec<i64> = lots.iter().map(Lot::remaining_quantity).collect();
                    prop_assert_eq!(after, before);
                }
                Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
            }
        }
    }
}
