//! Production records (milk / meat yields).
//!
//! A production record has no owner field of its own. Ownership is derived
//! through its animal, which is why lookups return an [`OwnedProduction`]
//! that carries the joined animal reference.

use core::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, OwnedByUser};
use crate::error::{DomainError, DomainResult};
use crate::id::{AnimalId, ProductionId, UserId};
use crate::livestock::{ExternalTag, Sex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductionKind {
    Milk,
    Meat,
}

impl ProductionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductionKind::Milk => "milk",
            ProductionKind::Meat => "meat",
        }
    }
}

impl FromStr for ProductionKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "milk" => Ok(ProductionKind::Milk),
            "meat" => Ok(ProductionKind::Meat),
            _ => Err(DomainError::validation("kind must be one of: milk, meat")),
        }
    }
}

/// Non-negative produced amount (litres or kilograms depending on kind).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(f64);

impl Quantity {
    pub fn new(value: f64) -> DomainResult<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(DomainError::validation("quantity must be a number >= 0"));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Aggregation bucket for production reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl ReportPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportPeriod::Daily => "daily",
            ReportPeriod::Weekly => "weekly",
            ReportPeriod::Monthly => "monthly",
        }
    }

    /// Bucket label for a date: `YYYY-MM-DD`, ISO week `YYYY-Www`, or `YYYY-MM`.
    ///
    /// Labels of one period sort chronologically as plain strings.
    pub fn bucket(&self, date: NaiveDate) -> String {
        match self {
            ReportPeriod::Daily => date.format("%Y-%m-%d").to_string(),
            ReportPeriod::Weekly => {
                let week = date.iso_week();
                format!("{:04}-W{:02}", week.year(), week.week())
            }
            ReportPeriod::Monthly => date.format("%Y-%m").to_string(),
        }
    }
}

impl FromStr for ReportPeriod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(ReportPeriod::Daily),
            "weekly" => Ok(ReportPeriod::Weekly),
            "monthly" => Ok(ReportPeriod::Monthly),
            _ => Err(DomainError::validation("period must be one of: daily, weekly, monthly")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionRecord {
    pub id: ProductionId,
    /// Fixed at creation (no re-parenting to another animal).
    pub animal_id: AnimalId,
    pub kind: ProductionKind,
    pub quantity: Quantity,
    pub recorded_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductionRecord {
    pub fn create(new: NewProductionRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: ProductionId::new(),
            animal_id: new.animal_id,
            kind: new.kind,
            quantity: new.quantity,
            recorded_date: new.recorded_date,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, changes: ProductionChanges, now: DateTime<Utc>) {
        if let Some(kind) = changes.kind {
            self.kind = kind;
        }
        if let Some(quantity) = changes.quantity {
            self.quantity = quantity;
        }
        if let Some(recorded_date) = changes.recorded_date {
            self.recorded_date = recorded_date;
        }
        self.updated_at = now;
    }
}

/// Animal columns joined onto a production record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionAnimal {
    pub id: AnimalId,
    pub owner_id: UserId,
    pub external_tag: ExternalTag,
    pub breed: String,
    pub sex: Sex,
}

/// A production record together with the animal it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedProduction {
    pub record: ProductionRecord,
    pub animal: ProductionAnimal,
}

impl Entity for OwnedProduction {
    type Id = ProductionId;

    fn id(&self) -> &Self::Id {
        &self.record.id
    }
}

impl OwnedByUser for OwnedProduction {
    const RESOURCE_KIND: &'static str = "production";

    fn owner_id(&self) -> UserId {
        self.animal.owner_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProductionRecord {
    pub animal_id: AnimalId,
    pub kind: ProductionKind,
    pub quantity: Quantity,
    pub recorded_date: NaiveDate,
}

/// Partial update for a production record. There is deliberately no
/// `animal_id` here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductionChanges {
    pub kind: Option<ProductionKind>,
    pub quantity: Option<Quantity>,
    pub recorded_date: Option<NaiveDate>,
}
