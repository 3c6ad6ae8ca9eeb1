//! Animal records.
//!
//! # Invariants
//! - `external_tag` is globally unique (enforced by the store).
//! - `owner_id` is fixed at creation; [`AnimalChanges`] has no owner field, so
//!   the update path cannot transfer ownership.

use core::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, OwnedByUser};
use crate::error::{DomainError, DomainResult};
use crate::id::{AnimalId, UserId};

// ─────────────────────────────────────────────────────────────────────────────
// Value types
// ─────────────────────────────────────────────────────────────────────────────

/// Ear tag / external identification of an animal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalTag(String);

impl ExternalTag {
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(DomainError::validation("externalTag is required"));
        }
        if value.len() > 64 {
            return Err(DomainError::validation("externalTag must be at most 64 characters"));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ExternalTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "Male",
            Sex::Female => "Female",
        }
    }
}

impl FromStr for Sex {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Sex::Male),
            "female" => Ok(Sex::Female),
            _ => Err(DomainError::validation("sex must be one of: Male, Female")),
        }
    }
}

/// Lifecycle status of an animal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AnimalStatus {
    #[default]
    Active,
    Sold,
    Deceased,
}

impl AnimalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnimalStatus::Active => "Active",
            AnimalStatus::Sold => "Sold",
            AnimalStatus::Deceased => "Deceased",
        }
    }
}

impl FromStr for AnimalStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(AnimalStatus::Active),
            "sold" => Ok(AnimalStatus::Sold),
            "deceased" => Ok(AnimalStatus::Deceased),
            _ => Err(DomainError::validation("status must be one of: Active, Sold, Deceased")),
        }
    }
}

fn validate_breed(raw: &str) -> DomainResult<String> {
    let breed = raw.trim();
    if breed.is_empty() {
        return Err(DomainError::validation("breed is required"));
    }
    Ok(breed.to_string())
}

fn validate_weight(weight: f64) -> DomainResult<f64> {
    if !weight.is_finite() || weight <= 0.0 {
        return Err(DomainError::validation("weight must be a positive number"));
    }
    Ok(weight)
}

// ─────────────────────────────────────────────────────────────────────────────
// Animal
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Animal {
    pub id: AnimalId,
    pub owner_id: UserId,
    pub external_tag: ExternalTag,
    pub breed: String,
    pub birth_date: NaiveDate,
    pub sex: Sex,
    pub weight: f64,
    pub status: AnimalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Animal {
    /// Materialise a validated [`NewAnimal`] into a stored record.
    pub fn create(new: NewAnimal, now: DateTime<Utc>) -> Self {
        Self {
            id: AnimalId::new(),
            owner_id: new.owner_id,
            external_tag: new.external_tag,
            breed: new.breed,
            birth_date: new.birth_date,
            sex: new.sex,
            weight: new.weight,
            status: new.status,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update. Absent fields keep their current value.
    pub fn apply(&mut self, changes: AnimalChanges, now: DateTime<Utc>) {
        if let Some(tag) = changes.external_tag {
            self.external_tag = tag;
        }
        if let Some(breed) = changes.breed {
            self.breed = breed;
        }
        if let Some(birth_date) = changes.birth_date {
            self.birth_date = birth_date;
        }
        if let Some(sex) = changes.sex {
            self.sex = sex;
        }
        if let Some(weight) = changes.weight {
            self.weight = weight;
        }
        if let Some(status) = changes.status {
            self.status = status;
        }
        self.updated_at = now;
    }
}

impl Entity for Animal {
    type Id = AnimalId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl OwnedByUser for Animal {
    const RESOURCE_KIND: &'static str = "animal";

    fn owner_id(&self) -> UserId {
        self.owner_id
    }
}

/// Validated input for creating an animal.
///
/// `owner_id` always comes from the resolved identity, never from the client.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnimal {
    pub owner_id: UserId,
    pub external_tag: ExternalTag,
    pub breed: String,
    pub birth_date: NaiveDate,
    pub sex: Sex,
    pub weight: f64,
    pub status: AnimalStatus,
}

impl NewAnimal {
    pub fn new(
        owner_id: UserId,
        external_tag: &str,
        breed: &str,
        birth_date: NaiveDate,
        sex: Sex,
        weight: f64,
        status: Option<AnimalStatus>,
    ) -> DomainResult<Self> {
        Ok(Self {
            owner_id,
            external_tag: ExternalTag::parse(external_tag)?,
            breed: validate_breed(breed)?,
            birth_date,
            sex,
            weight: validate_weight(weight)?,
            status: status.unwrap_or_default(),
        })
    }
}

/// Validated partial update for an animal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnimalChanges {
    pub external_tag: Option<ExternalTag>,
    pub breed: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub sex: Option<Sex>,
    pub weight: Option<f64>,
    pub status: Option<AnimalStatus>,
}

impl AnimalChanges {
    pub fn new(
        external_tag: Option<&str>,
        breed: Option<&str>,
        birth_date: Option<NaiveDate>,
        sex: Option<Sex>,
        weight: Option<f64>,
        status: Option<AnimalStatus>,
    ) -> DomainResult<Self> {
        Ok(Self {
            external_tag: external_tag.map(ExternalTag::parse).transpose()?,
            breed: breed.map(validate_breed).transpose()?,
            birth_date,
            sex,
            weight: weight.map(validate_weight).transpose()?,
            status,
        })
    }
}
