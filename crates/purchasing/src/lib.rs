//! Purchasing domain module.
//!
//! Suppliers and purchase orders. Reception of a validated order is the only
//! place new lots come from; it is implemented here as pure domain logic and
//! persisted by the infrastructure layer.

pub mod order;
pub mod supplier;

pub use order::{NewOrder, Order, OrderLine, OrderStatus, OrderUpdate, Reception};
pub use supplier::Supplier;
