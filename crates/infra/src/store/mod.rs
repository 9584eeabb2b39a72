//! Transactional stock store boundary.
//!
//! Workflows read snapshots through [`StockStore`] and hand every write back as
//! one [`ChangeSet`], which the store applies all-or-nothing under optimistic
//! expectations. Two backends: an in-memory store for tests and local runs,
//! and a Postgres store for persistent deployments.

pub mod changeset;
pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use changeset::{AggregateWrite, ChangeSet};
pub use in_memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;
pub use query::{MovementFilter, Page, Pagination, SortDirection};
pub use r#trait::{StockStore, StoreError};
