//! Stock workflows (application-level orchestration).
//!
//! Every mutating operation follows the same pipeline:
//!
//! ```text
//! 1. Read a snapshot from the store (orders, vouchers, products, lots)
//!   ↓
//! 2. Run pure domain logic against it (lifecycle checks, FIFO allocation)
//!   ↓
//! 3. Describe the outcome as one ChangeSet
//!   ↓
//! 4. Commit it atomically; on Conflict go back to 1
//! ```
//!
//! Domain errors abort at step 2 before anything is written, so a failed
//! validation or reception has no observable effect.

mod error;
mod exit_vouchers;
mod orders;

use std::future::Future;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use stockledger_core::{Clock, DomainError, ProductId, SystemClock};
use stockledger_inventory::{Movement, Product, plan};

use crate::retry::RetryPolicy;
use crate::store::{ChangeSet, StockStore};

pub use error::WorkflowError;

/// Entry point for every stock-changing operation.
pub struct StockWorkflows<S: ?Sized> {
    store: Arc<S>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl<S: ?Sized> Clone for StockWorkflows<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            retry: self.retry.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S> StockWorkflows<S>
where
    S: StockStore + ?Sized,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// FIFO preview: the EXIT movements an issue of `quantity` would produce
    /// right now. Nothing is persisted and no lot is touched.
    #[instrument(skip(self), fields(product_id = %product_id), err)]
    pub async fn allocate(
        &self,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<Vec<Movement>, WorkflowError> {
        let product = self.load_product(product_id).await?;
        let lots = self.store.available_lots(product_id).await?;
        let allocation = plan(&product, &lots, quantity, self.clock.as_ref())?;
        Ok(allocation.movements)
    }

    async fn load_product(&self, id: ProductId) -> Result<Product, WorkflowError> {
        self.store
            .product(id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", id).into())
    }

    async fn ensure_products_exist(
        &self,
        ids: impl IntoIterator<Item = ProductId>,
    ) -> Result<(), WorkflowError> {
        for id in ids {
            self.load_product(id).await?;
        }
        Ok(())
    }

    /// Run `attempt` and commit its change set, re-running the whole attempt
    /// on a commit conflict until the retry policy gives up.
    ///
    /// An empty change set is not committed.
    async fn run<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T, WorkflowError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(T, ChangeSet), WorkflowError>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let (output, changes) = attempt().await?;
            if changes.is_empty() {
                return Ok(output);
            }

            match self.store.commit(changes).await {
                Ok(()) => {
                    info!(operation, attempts, "workflow committed");
                    return Ok(output);
                }
                Err(err) if err.is_conflict() => {
                    if !self.retry.should_retry(attempts) {
                        warn!(operation, attempts, error = %err, "conflict retries exhausted");
                        return Err(WorkflowError::ConflictRetriesExhausted { attempts });
                    }
                    let delay = self.retry.delay_for_attempt(attempts);
                    warn!(
                        operation,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "commit conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
