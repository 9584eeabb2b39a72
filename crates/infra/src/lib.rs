//! Infrastructure layer: stores, config, retry, and the stock workflows and
//! reports that run on top of them.

pub mod config;
pub mod reports;
pub mod retry;
pub mod store;
pub mod workflows;

pub use config::{ConfigError, StockConfig};
pub use reports::{StockDetail, StockReports, StockState};
pub use retry::RetryPolicy;
pub use workflows::{StockWorkflows, WorkflowError};
