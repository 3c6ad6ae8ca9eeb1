//! `agrotrack-core` — domain foundation for livestock and production records.
//!
//! This crate contains **pure domain** types (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod identity;
pub mod livestock;
pub mod production;

pub use entity::{Entity, OwnedByUser};
pub use error::{DomainError, DomainResult};
pub use id::{AnimalId, ProductionId, UserId};
pub use identity::{Identity, NationalId};
pub use livestock::{Animal, AnimalChanges, AnimalStatus, ExternalTag, NewAnimal, Sex};
pub use production::{
    NewProductionRecord, OwnedProduction, ProductionAnimal, ProductionChanges, ProductionKind,
    ProductionRecord, Quantity, ReportPeriod,
};
