use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Entity, LotId, OrderId, ProductId};

/// A batch of stock received at one time at one unit price.
///
/// Created once at order reception. `remaining_quantity` is the only mutable
/// field and only ever decreases, down to zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub id: LotId,
    pub lot_number: String,
    pub entry_date: NaiveDate,
    pub initial_quantity: i64,
    remaining_quantity: i64,
    pub unit_price: Decimal,
    pub product_id: ProductId,
    pub order_id: OrderId,
    pub created_at: DateTime<Utc>,
}

/// Everything needed to open a new lot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotReceipt {
    pub lot_number: String,
    pub entry_date: NaiveDate,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub product_id: ProductId,
    pub order_id: OrderId,
    pub created_at: DateTime<Utc>,
}

impl Lot {
    /// Open a full lot (`remaining == initial`).
    pub fn receive(receipt: LotReceipt) -> DomainResult<Self> {
        if receipt.quantity <= 0 {
            return Err(DomainError::invalid_quantity(format!(
                "lot {} must receive a positive quantity, got {}",
                receipt.lot_number, receipt.quantity
            )));
        }
        if receipt.unit_price.is_sign_negative() {
            return Err(DomainError::invalid_quantity(format!(
                "lot {} cannot have a negative unit price",
                receipt.lot_number
            )));
        }
        Ok(Self {
            id: LotId::new(),
            lot_number: receipt.lot_number,
            entry_date: receipt.entry_date,
            initial_quantity: receipt.quantity,
            remaining_quantity: receipt.quantity,
            unit_price: receipt.unit_price,
            product_id: receipt.product_id,
            order_id: receipt.order_id,
            created_at: receipt.created_at,
        })
    }

    /// Rebuild a lot from storage, checking `0 <= remaining <= initial`.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: LotId,
        lot_number: String,
        entry_date: NaiveDate,
        initial_quantity: i64,
        remaining_quantity: i64,
        unit_price: Decimal,
        product_id: ProductId,
        order_id: OrderId,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if remaining_quantity < 0 || remaining_quantity > initial_quantity {
            return Err(DomainError::invalid_quantity(format!(
                "lot {lot_number} has remaining {remaining_quantity} outside 0..={initial_quantity}"
            )));
        }
        Ok(Self {
            id,
            lot_number,
            entry_date,
            initial_quantity,
            remaining_quantity,
            unit_price,
            product_id,
            order_id,
            created_at,
        })
    }

    pub fn remaining_quantity(&self) -> i64 {
        self.remaining_quantity
    }

    pub fn is_available(&self) -> bool {
        self.remaining_quantity > 0
    }

    pub fn value(&self) -> Decimal {
        Decimal::from(self.remaining_quantity) * self.unit_price
    }

    pub fn decrement_remaining(&mut self, amount: i64) -> DomainResult<()> {
        if amount <= 0 {
            return Err(DomainError::invalid_quantity(format!(
                "decrement of lot {} must be positive, got {amount}",
                self.lot_number
            )));
        }
        if amount > self.remaining_quantity {
            return Err(DomainError::invalid_quantity(format!(
                "cannot take {amount} from lot {} holding {}",
                self.lot_number, self.remaining_quantity
            )));
        }
        self.remaining_quantity -= amount;
        Ok(())
    }
}

impl Entity for Lot {
    type Id = LotId;

    fn id(&self) -> &LotId {
        &self.id
    }
}

/// Order lots for consumption: entry date ascending.
///
/// The sort is stable, so lots sharing an entry date keep their insertion
/// order; stores must hand lots over in creation order.
pub fn sort_fifo(lots: &mut [Lot]) {
    lots.sort_by_key(|lot| lot.entry_date);
}
