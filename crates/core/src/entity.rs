//! Entity traits: identity and ownership.

use crate::id::UserId;

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// An entity whose access is scoped to exactly one owning user.
///
/// The owner may be stored directly (animals) or derived through a parent
/// reference (production records own nothing themselves and answer with the
/// owner of their animal).
pub trait OwnedByUser: Entity {
    /// Short resource label used in audit records (`"animal"`, `"production"`).
    const RESOURCE_KIND: &'static str;

    /// The owning user.
    fn owner_id(&self) -> UserId;
}
