use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Entity, ProductId};

pub const DEFAULT_REORDER_POINT: i64 = 10;

/// A stocked product.
///
/// `current_stock` is a cached running total. It must equal the sum of the
/// product's lot remaining quantities, so it only changes inside the same
/// change set that creates or draws lots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub reference: String,
    pub name: String,
    pub description: Option<String>,
    pub unit_price: Decimal,
    pub category: String,
    pub current_stock: i64,
    pub reorder_point: i64,
    pub unit_of_measure: String,
}

impl Product {
    pub fn new(reference: impl Into<String>, name: impl Into<String>, unit_price: Decimal) -> Self {
        Self {
            id: ProductId::new(),
            reference: reference.into(),
            name: name.into(),
            description: None,
            unit_price,
            category: String::new(),
            current_stock: 0,
            reorder_point: DEFAULT_REORDER_POINT,
            unit_of_measure: "unit".to_string(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_reorder_point(mut self, reorder_point: i64) -> Self {
        self.reorder_point = reorder_point;
        self
    }

    pub fn with_unit_of_measure(mut self, unit: impl Into<String>) -> Self {
        self.unit_of_measure = unit.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn needs_reorder(&self) -> bool {
        self.current_stock <= self.reorder_point
    }

    /// Apply a signed stock delta, refusing to drive the cached total negative.
    pub fn apply_stock_delta(&mut self, delta: i64) -> DomainResult<()> {
        let next = self.current_stock + delta;
        if next < 0 {
            return Err(DomainError::invalid_quantity(format!(
                "stock of {} cannot go negative ({} {:+})",
                self.reference, self.current_stock, delta
            )));
        }
        self.current_stock = next;
        Ok(())
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &ProductId {
        &self.id
    }
}
