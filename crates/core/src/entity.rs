//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Lots, movements and products are entities: they are compared by identity,
/// never by value.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
