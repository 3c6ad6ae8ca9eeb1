//! Owner scoping for collection queries.
//!
//! List and report operations cannot be called without one of these scopes,
//! and the scopes can only be built from a resolved owner. That makes the
//! owner predicate unconditional: user filters are applied on top of it.

use std::collections::HashSet;

use agrotrack_core::{AnimalId, UserId};

use super::{OwnershipStore, StoreResult};

/// Restricts animal listings to `owner_id == owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerScope {
    owner: UserId,
}

impl OwnerScope {
    pub fn of(owner: UserId) -> Self {
        Self { owner }
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }
}

/// Restricts production queries to records of animals the owner holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimalScope {
    owner: UserId,
    animal_ids: Vec<AnimalId>,
    lookup: HashSet<AnimalId>,
}

impl AnimalScope {
    /// Resolve the full set of animal ids owned by `owner`.
    pub async fn resolve<S>(store: &S, owner: UserId) -> StoreResult<Self>
    where
        S: OwnershipStore + ?Sized,
    {
        let animal_ids = store.owned_animal_ids(owner).await?;
        Ok(Self::from_ids(owner, animal_ids))
    }

    pub fn from_ids(owner: UserId, animal_ids: Vec<AnimalId>) -> Self {
        let lookup = animal_ids.iter().copied().collect();
        Self {
            owner,
            animal_ids,
            lookup,
        }
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn animal_ids(&self) -> &[AnimalId] {
        &self.animal_ids
    }

    pub fn is_empty(&self) -> bool {
        self.animal_ids.is_empty()
    }

    pub fn contains(&self, animal_id: AnimalId) -> bool {
        self.lookup.contains(&animal_id)
    }
}
