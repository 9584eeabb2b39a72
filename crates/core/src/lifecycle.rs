//! Status machines expressed as explicit transition tables.

use core::fmt::{Debug, Display};

use crate::error::{DomainError, DomainResult};

/// A document status with a closed set of allowed transitions.
///
/// Implementors list every legal `(from, to)` pair in `TRANSITIONS`; anything
/// not listed is rejected by [`Lifecycle::ensure_transition`].
pub trait Lifecycle: Copy + Eq + Debug + Display + 'static {
    /// Every legal `(from, to)` pair, including self-transitions that are
    /// accepted as no-ops.
    const TRANSITIONS: &'static [(Self, Self)];

    fn can_transition_to(self, next: Self) -> bool {
        Self::TRANSITIONS.contains(&(self, next))
    }

    /// A status is terminal when it cannot move to any *other* status.
    fn is_terminal(self) -> bool {
        !Self::TRANSITIONS
            .iter()
            .any(|(from, to)| *from == self && *to != self)
    }

    fn ensure_transition(self, next: Self) -> DomainResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else if self.is_terminal() {
            Err(DomainError::invalid_transition(format!(
                "{self} is terminal (requested {next})"
            )))
        } else {
            Err(DomainError::invalid_transition(format!(
                "{self} -> {next} is not allowed"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Light {
        Red,
        Green,
        Off,
    }

    impl Display for Light {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            Debug::fmt(self, f)
        }
    }

    impl Lifecycle for Light {
        const TRANSITIONS: &'static [(Self, Self)] = &[
            (Light::Red, Light::Green),
            (Light::Green, Light::Red),
            (Light::Red, Light::Off),
            (Light::Off, Light::Off),
        ];
    }

    #[test]
    fn self_loop_does_not_make_status_live() {
        assert!(Light::Off.is_terminal());
        assert!(Light::Off.ensure_transition(Light::Off).is_ok());
        assert!(!Light::Red.is_terminal());
    }

    #[test]
    fn unlisted_pairs_are_rejected() {
        match Light::Green.ensure_transition(Light::Off) {
            Err(DomainError::InvalidStateTransition(msg)) => {
                assert_eq!(msg, "Green -> Off is not allowed")
            }
            other => panic!("Expected InvalidStateTransition, got {other:?}"),
        }
        match Light::Off.ensure_transition(Light::Red) {
            Err(DomainError::InvalidStateTransition(msg)) => assert!(msg.contains("terminal")),
            other => panic!("Expected InvalidStateTransition, got {other:?}"),
        }
    }
}
