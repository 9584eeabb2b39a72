//! Movement ledger query interface.
//!
//! Filters combine with AND; every predicate is optional. Results are
//! paginated by default.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use stockledger_core::ProductId;
use stockledger_inventory::MovementType;

/// Pagination parameters for ledger queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of rows to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Pagination {
    pub const DEFAULT_LIMIT: u32 = 50;
    pub const MAX_LIMIT: u32 = 1000;

    /// Limits are clamped to `1..=MAX_LIMIT`.
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }

    /// Re-apply the limit bounds to a value built field by field.
    pub fn clamped(self) -> Self {
        Self::new(Some(self.limit), Some(self.offset))
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Ordering by movement date; same-day rows follow recording order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    /// Newest movement date first, most recently recorded first.
    #[default]
    NewestFirst,
    /// Oldest movement date first, earliest recorded first.
    OldestFirst,
}

/// Filter criteria for movement queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    /// Inclusive lower bound on the movement date.
    pub from: Option<NaiveDate>,
    /// Inclusive upper bound on the movement date.
    pub to: Option<NaiveDate>,
    pub product_id: Option<ProductId>,
    /// Exact match on the product reference.
    pub product_reference: Option<String>,
    pub movement_type: Option<MovementType>,
    /// Exact match on the lot number.
    pub lot_number: Option<String>,
    pub direction: SortDirection,
}

impl MovementFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn between(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn product(mut self, product_id: ProductId) -> Self {
        self.product_id = Some(product_id);
        self
    }

    pub fn product_reference(mut self, reference: impl Into<String>) -> Self {
        self.product_reference = Some(reference.into());
        self
    }

    pub fn movement_type(mut self, movement_type: MovementType) -> Self {
        self.movement_type = Some(movement_type);
        self
    }

    pub fn lot_number(mut self, lot_number: impl Into<String>) -> Self {
        self.lot_number = Some(lot_number.into());
        self
    }

    pub fn oldest_first(mut self) -> Self {
        self.direction = SortDirection::OldestFirst;
        self
    }

    pub fn includes_date(&self, date: NaiveDate) -> bool {
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of rows matching the filter (across all pages).
    pub total: u64,
    /// Pagination parameters used.
    pub pagination: Pagination,
    /// Whether more rows follow this page.
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let has_more = total > pagination.offset as u64 + pagination.limit as u64;
        Self {
            items,
            total,
            pagination,
            has_more,
        }
    }

    /// Slice a full, already ordered result set.
    pub fn from_sorted(all: Vec<T>, pagination: Pagination) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .collect();
        Self::new(items, total, pagination)
    }
}
