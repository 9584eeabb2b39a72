//! Inventory domain module.
//!
//! Products, lots, the movement ledger record and the FIFO allocator,
//! implemented purely as deterministic domain logic (no IO, no storage).

pub mod fifo;
pub mod lot;
pub mod movement;
pub mod product;
pub mod valuation;

pub use fifo::{Allocation, LotDraw, allocate, plan};
pub use lot::{Lot, LotReceipt, sort_fifo};
pub use movement::{Movement, MovementType};
pub use product::{DEFAULT_REORDER_POINT, Product};
pub use valuation::{ValuationSummary, global_valuation, value_of_product};
