use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::numbering::lot_number;
use stockledger_core::{
    AggregateRoot, Clock, DomainError, DomainResult, Lifecycle, OrderId, ProductId, SupplierId,
};
use stockledger_inventory::{Lot, LotReceipt, Movement};

/// Purchase order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Validated,
    Delivered,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Validated => "VALIDATED",
            OrderStatus::Delivered => "DELIVERED",
        }
    }
}

impl Lifecycle for OrderStatus {
    // PENDING -> DELIVERED is missing on purpose: an order must be validated first.
    const TRANSITIONS: &'static [(Self, Self)] = &[
        (OrderStatus::Pending, OrderStatus::Pending),
        (OrderStatus::Pending, OrderStatus::Validated),
        (OrderStatus::Validated, OrderStatus::Pending),
        (OrderStatus::Validated, OrderStatus::Validated),
        (OrderStatus::Validated, OrderStatus::Delivered),
    ];
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "VALIDATED" => Ok(OrderStatus::Validated),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            _ => Err(DomainError::invalid_transition(format!("invalid status: {s}"))),
        }
    }
}

/// Purchase order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Decimal,
}

impl OrderLine {
    pub fn new(product_id: ProductId, quantity: i64, unit_price: Decimal) -> DomainResult<Self> {
        if quantity <= 0 {
            return Err(DomainError::invalid_quantity(format!(
                "order line quantity must be positive, got {quantity}"
            )));
        }
        if unit_price <= Decimal::ZERO {
            return Err(DomainError::invalid_quantity(format!(
                "order line unit price must be positive, got {unit_price}"
            )));
        }
        Ok(Self {
            product_id,
            quantity,
            unit_price,
        })
    }

    pub fn subtotal(&self) -> Decimal {
        Decimal::from(self.quantity) * self.unit_price
    }
}

/// Input for placing a new order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub order_number: String,
    pub order_date: NaiveDate,
    pub requested_delivery: Option<NaiveDate>,
    pub supplier_id: SupplierId,
    pub lines: Vec<OrderLine>,
}

/// Partial edit of an order. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderUpdate {
    pub supplier_id: Option<SupplierId>,
    pub requested_delivery: Option<NaiveDate>,
    pub lines: Option<Vec<OrderLine>>,
}

/// What a reception writes: one lot and one ENTRY movement per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reception {
    pub lots: Vec<Lot>,
    pub movements: Vec<Movement>,
}

impl Reception {
    /// Stock increment per line, in line order.
    pub fn stock_increments(&self) -> impl Iterator<Item = (ProductId, i64)> + '_ {
        self.lots.iter().map(|lot| (lot.product_id, lot.initial_quantity))
    }
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    order_number: String,
    order_date: NaiveDate,
    requested_delivery: Option<NaiveDate>,
    status: OrderStatus,
    total_amount: Decimal,
    supplier_id: SupplierId,
    lines: Vec<OrderLine>,
    version: u64,
}

impl Order {
    /// Place a new PENDING order at version 1.
    pub fn place(new: NewOrder) -> DomainResult<Self> {
        ensure_lines(&new.lines)?;
        let total_amount = total_of(&new.lines);
        Ok(Self {
            id: OrderId::new(),
            order_number: new.order_number,
            order_date: new.order_date,
            requested_delivery: new.requested_delivery,
            status: OrderStatus::Pending,
            total_amount,
            supplier_id: new.supplier_id,
            lines: new.lines,
            version: 1,
        })
    }

    /// Rebuild an order from storage; the total is recomputed from the lines.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: OrderId,
        order_number: String,
        order_date: NaiveDate,
        requested_delivery: Option<NaiveDate>,
        status: OrderStatus,
        supplier_id: SupplierId,
        lines: Vec<OrderLine>,
        version: u64,
    ) -> Self {
        let total_amount = total_of(&lines);
        Self {
            id,
            order_number,
            order_date,
            requested_delivery,
            status,
            total_amount,
            supplier_id,
            lines,
            version,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn order_date(&self) -> NaiveDate {
        self.order_date
    }

    pub fn requested_delivery(&self) -> Option<NaiveDate> {
        self.requested_delivery
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub fn supplier_id(&self) -> SupplierId {
        self.supplier_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn update(&mut self, update: OrderUpdate) -> DomainResult<()> {
        self.ensure_editable()?;
        if let Some(lines) = &update.lines {
            ensure_lines(lines)?;
        }

        if let Some(supplier_id) = update.supplier_id {
            self.supplier_id = supplier_id;
        }
        if let Some(date) = update.requested_delivery {
            self.requested_delivery = Some(date);
        }
        if let Some(lines) = update.lines {
            self.total_amount = total_of(&lines);
            self.lines = lines;
        }
        self.version += 1;
        Ok(())
    }

    /// Administrative status change.
    ///
    /// Returns `false` when `next` is the current status (accepted, nothing
    /// written). Delivery is refused here: it has to go through
    /// [`Order::receive`] so that lots are created with it.
    pub fn change_status(&mut self, next: OrderStatus) -> DomainResult<bool> {
        self.status.ensure_transition(next)?;
        if next == OrderStatus::Delivered {
            return Err(DomainError::invalid_transition(format!(
                "order {} can only become DELIVERED through reception",
                self.order_number
            )));
        }
        if next == self.status {
            return Ok(false);
        }
        self.status = next;
        self.version += 1;
        Ok(true)
    }

    /// Receive a VALIDATED order.
    ///
    /// Opens one lot per line (numbered after `existing_lots`, entry date =
    /// today) with a matching ENTRY movement referencing the order number, and
    /// marks the order DELIVERED.
    pub fn receive(&mut self, existing_lots: u64, clock: &dyn Clock) -> DomainResult<Reception> {
        if self.status != OrderStatus::Validated {
            return Err(DomainError::invalid_transition(format!(
                "only VALIDATED orders can be received; order {} is {}",
                self.order_number, self.status
            )));
        }
        self.status.ensure_transition(OrderStatus::Delivered)?;

        let today = clock.today();
        let now = clock.now();
        let mut lots = Vec::with_capacity(self.lines.len());
        let mut movements = Vec::with_capacity(self.lines.len());

        for (i, line) in self.lines.iter().enumerate() {
            let lot = Lot::receive(LotReceipt {
                lot_number: lot_number(today, existing_lots + i as u64),
                entry_date: today,
                quantity: line.quantity,
                unit_price: line.unit_price,
                product_id: line.product_id,
                order_id: self.id,
                created_at: now,
            })?;
            movements.push(Movement::entry(&lot, self.order_number.clone(), now));
            lots.push(lot);
        }

        self.status = OrderStatus::Delivered;
        self.version += 1;
        Ok(Reception { lots, movements })
    }

    /// Delivered orders are referenced by their lots and must stay.
    pub fn ensure_deletable(&self) -> DomainResult<()> {
        if self.status == OrderStatus::Delivered {
            return Err(DomainError::invalid_transition(format!(
                "order {} is DELIVERED and cannot be deleted",
                self.order_number
            )));
        }
        Ok(())
    }

    fn ensure_editable(&self) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "order {} is {} and can no longer be modified",
                self.order_number, self.status
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

fn ensure_lines(lines: &[OrderLine]) -> DomainResult<()> {
    if lines.is_empty() {
        return Err(DomainError::validation("an order needs at least one line"));
    }
    Ok(())
}

fn total_of(lines: &[OrderLine]) -> Decimal {
    lines.iter().map(OrderLine::subtotal).sum()
}
