use thiserror::Error;

use stockledger_core::DomainError;

use crate::store::StoreError;

/// Error at the workflow boundary.
///
/// Domain errors are deterministic and never retried. A store `Conflict` is
/// retried by re-running the workflow; once the retry policy gives up the
/// caller sees `ConflictRetriesExhausted`, never the stale-snapshot outcome.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("gave up after {attempts} conflicting commit attempts")]
    ConflictRetriesExhausted { attempts: u32 },
}

impl WorkflowError {
    /// The domain error, if this is one.
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            WorkflowError::Domain(err) => Some(err),
            _ => None,
        }
    }
}
