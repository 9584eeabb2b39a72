//! Valuation engine.
//!
//! Stock is valued at acquisition price: the sum over lots of
//! `remaining_quantity × unit_price`. Drained lots contribute nothing.

use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::ProductId;

use crate::lot::Lot;

/// Summary of on-hand stock value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationSummary {
    pub total_value: Decimal,
    /// Distinct products holding remaining stock.
    pub product_count: usize,
    pub total_quantity: i64,
}

impl ValuationSummary {
    pub fn empty() -> Self {
        Self {
            total_value: Decimal::ZERO,
            product_count: 0,
            total_quantity: 0,
        }
    }
}

pub fn value_of_product<'a>(product_id: ProductId, lots: impl IntoIterator<Item = &'a Lot>) -> Decimal {
    lots.into_iter()
        .filter(|lot| lot.product_id == product_id && lot.is_available())
        .map(Lot::value)
        .sum()
}

pub fn global_valuation<'a>(lots: impl IntoIterator<Item = &'a Lot>) -> ValuationSummary {
    let mut summary = ValuationSummary::empty();
    let mut products = HashSet::new();

    for lot in lots.into_iter().filter(|lot| lot.is_available()) {
        summary.total_value += lot.value();
        summary.total_quantity += lot.remaining_quantity();
        products.insert(lot.product_id);
    }

    summary.product_count = products.len();
    summary
}
