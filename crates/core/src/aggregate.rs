//! Aggregate root trait and optimistic concurrency expectations.

use crate::error::{DomainError, DomainResult};

/// Aggregate root marker + minimal interface.
///
/// Orders and exit vouchers are aggregates: every accepted state change bumps
/// `version()`, and the store only accepts a write whose expected version
/// matches what it holds.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// A freshly created aggregate is at version 1; the store treats a missing
    /// row as version 0.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an aggregate write.
///
/// Every write is pinned: `Exact(0)` for a new aggregate, `loaded` otherwise.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Require the aggregate to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation pinned to the version an aggregate was loaded at.
    pub fn loaded<A: AggregateRoot>(aggregate: &A) -> Self {
        ExpectedVersion::Exact(aggregate.version())
    }

    pub fn matches(self, actual: u64) -> bool {
        let ExpectedVersion::Exact(expected) = self;
        expected == actual
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(u64);

    impl AggregateRoot for Counter {
        type Id = u8;

        fn id(&self) -> &u8 {
            &0
        }

        fn version(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn loaded_pins_current_version() {
        assert_eq!(ExpectedVersion::loaded(&Counter(1)), ExpectedVersion::Exact(1));
        assert_eq!(ExpectedVersion::loaded(&Counter(4)), ExpectedVersion::Exact(4));
    }

    #[test]
    fn check_reports_conflict_on_mismatch() {
        assert!(ExpectedVersion::Exact(2).check(2).is_ok());
        assert!(!ExpectedVersion::Exact(0).matches(1));
        match ExpectedVersion::Exact(2).check(3) {
            Err(DomainError::Conflict(msg)) => assert!(msg.contains("actual: 3")),
            other => panic!("expected conflict, got {other:?}"),
        }
    }
}
