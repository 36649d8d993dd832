//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Identifiers are assigned by storage, so an entity that has not been
/// persisted yet has no identity.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier, if storage has assigned one.
    fn id(&self) -> Option<Self::Id>;

    /// Whether this entity has been persisted.
    fn is_persisted(&self) -> bool {
        self.id().is_some()
    }
}
