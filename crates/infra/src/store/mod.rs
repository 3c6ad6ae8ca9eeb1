//! Record storage: capability traits plus in-memory and Postgres backends.
//!
//! The traits are split by what the caller needs:
//! - [`IdentityStore`]: registration / login / token subject lookups.
//! - [`OwnershipStore`]: the read-only point lookups the ownership gate uses.
//! - [`LivestockStore`]: owner-scoped listing, reports and mutations.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use agrotrack_core::{
    Animal, AnimalChanges, AnimalId, Identity, NationalId, NewAnimal, NewProductionRecord,
    OwnedProduction, ProductionChanges, ProductionId, ProductionKind, ReportPeriod, UserId,
};

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod scope;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use query::{
    AnimalFilter, AnimalSort, AnimalSortField, ProductionFilter, ProductionSort, ProductionSortField,
    ReportRow, Sort, SortDirection, SortField,
};
pub use scope::{AnimalScope, OwnerScope};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A unique field (national id, external tag) is already taken.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The record to mutate does not exist (any more).
    #[error("not found")]
    NotFound,

    /// Backend failure (connection, lock poisoning, unexpected row shape).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait::async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_identity_by_id(&self, id: UserId) -> StoreResult<Option<Identity>>;

    async fn find_identity_by_national_id(&self, national_id: &NationalId) -> StoreResult<Option<Identity>>;

    /// Insert a new identity. Fails with [`StoreError::Conflict`] when the
    /// national id is already registered.
    async fn insert_identity(&self, identity: Identity) -> StoreResult<Identity>;
}

/// Point lookups used for ownership verification.
#[async_trait::async_trait]
pub trait OwnershipStore: Send + Sync {
    async fn find_animal_by_id(&self, id: AnimalId) -> StoreResult<Option<Animal>>;

    /// Production record joined with its animal in a single read, so the
    /// owner that is checked is the owner of the record that is returned.
    async fn find_production_by_id(&self, id: ProductionId) -> StoreResult<Option<OwnedProduction>>;

    async fn owned_animal_ids(&self, owner: UserId) -> StoreResult<Vec<AnimalId>>;
}

#[async_trait::async_trait]
pub trait LivestockStore: OwnershipStore {
    async fn list_animals(
        &self,
        scope: &OwnerScope,
        filter: &AnimalFilter,
        sort: AnimalSort,
    ) -> StoreResult<Vec<Animal>>;

    /// Fails with [`StoreError::Conflict`] when the external tag is taken.
    /// The uniqueness check and the insert are atomic.
    async fn insert_animal(&self, new: NewAnimal, now: DateTime<Utc>) -> StoreResult<Animal>;

    async fn update_animal(
        &self,
        id: AnimalId,
        changes: AnimalChanges,
        now: DateTime<Utc>,
    ) -> StoreResult<Animal>;

    /// Deletes the animal and all of its production records.
    async fn delete_animal(&self, id: AnimalId) -> StoreResult<()>;

    async fn list_production(
        &self,
        scope: &AnimalScope,
        filter: &ProductionFilter,
        sort: ProductionSort,
    ) -> StoreResult<Vec<OwnedProduction>>;

    async fn insert_production(
        &self,
        new: NewProductionRecord,
        now: DateTime<Utc>,
    ) -> StoreResult<OwnedProduction>;

    async fn update_production(
        &self,
        id: ProductionId,
        changes: ProductionChanges,
        now: DateTime<Utc>,
    ) -> StoreResult<OwnedProduction>;

    async fn delete_production(&self, id: ProductionId) -> StoreResult<()>;

    /// Aggregate production of one kind per period bucket, newest bucket first.
    async fn production_report(
        &self,
        scope: &AnimalScope,
        kind: ProductionKind,
        period: ReportPeriod,
    ) -> StoreResult<Vec<ReportRow>>;

    async fn has_production_between(
        &self,
        scope: &AnimalScope,
        kind: ProductionKind,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<bool>;
}
