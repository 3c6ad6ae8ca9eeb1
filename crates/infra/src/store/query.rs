//! Filter and sort criteria for owner-scoped list queries.
//!
//! Sort fields are a closed set so that both the in-memory comparator and the
//! SQL `ORDER BY` clause are chosen from a whitelist, never built from input.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use agrotrack_core::{
    Animal, AnimalId, AnimalStatus, DomainError, DomainResult, OwnedProduction, ProductionKind, Sex,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    fn apply(&self, ord: core::cmp::Ordering) -> core::cmp::Ordering {
        match self {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    }
}

/// A sortable field of some listed entity.
pub trait SortField: Copy + Sized {
    type Item;

    fn parse(name: &str) -> Option<Self>;
    fn column(&self) -> &'static str;
    fn compare(&self, a: &Self::Item, b: &Self::Item) -> core::cmp::Ordering;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort<F> {
    pub field: F,
    pub direction: SortDirection,
}

impl<F: SortField> Sort<F> {
    /// Parse `field:dir` (e.g. `weight:desc`). `None` yields `default`.
    pub fn parse(raw: Option<&str>, default: Self) -> DomainResult<Self> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(default);
        };
        let (field, direction) = raw
            .split_once(':')
            .ok_or_else(|| DomainError::validation("sort must look like field:asc or field:desc"))?;
        let field = F::parse(field.trim())
            .ok_or_else(|| DomainError::validation(format!("cannot sort by '{}'", field.trim())))?;
        let direction = match direction.trim().to_ascii_lowercase().as_str() {
            "asc" => SortDirection::Asc,
            "desc" => SortDirection::Desc,
            _ => return Err(DomainError::validation("sort direction must be asc or desc")),
        };
        Ok(Self { field, direction })
    }

    pub fn order_by(&self) -> String {
        format!("{} {}", self.field.column(), self.direction.as_sql())
    }

    pub fn sort(&self, items: &mut [F::Item]) {
        items.sort_by(|a, b| self.direction.apply(self.field.compare(a, b)));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Animals
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimalSortField {
    CreatedAt,
    ExternalTag,
    Breed,
    BirthDate,
    Weight,
    Status,
}

impl SortField for AnimalSortField {
    type Item = Animal;

    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "createdAt" => Self::CreatedAt,
            "externalTag" => Self::ExternalTag,
            "breed" => Self::Breed,
            "birthDate" => Self::BirthDate,
            "weight" => Self::Weight,
            "status" => Self::Status,
            _ => return None,
        })
    }

    fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::ExternalTag => "external_tag",
            Self::Breed => "breed",
            Self::BirthDate => "birth_date",
            Self::Weight => "weight",
            Self::Status => "status",
        }
    }

    fn compare(&self, a: &Animal, b: &Animal) -> core::cmp::Ordering {
        match self {
            Self::CreatedAt => a.created_at.cmp(&b.created_at),
            Self::ExternalTag => a.external_tag.as_str().cmp(b.external_tag.as_str()),
            Self::Breed => a.breed.cmp(&b.breed),
            Self::BirthDate => a.birth_date.cmp(&b.birth_date),
            Self::Weight => a.weight.total_cmp(&b.weight),
            Self::Status => a.status.as_str().cmp(b.status.as_str()),
        }
    }
}

pub type AnimalSort = Sort<AnimalSortField>;

impl Default for AnimalSort {
    fn default() -> Self {
        Self {
            field: AnimalSortField::CreatedAt,
            direction: SortDirection::Desc,
        }
    }
}

/// User-supplied animal filters. Owner scoping is not part of this type; it
/// is applied by the store from an [`crate::store::OwnerScope`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnimalFilter {
    pub breed: Option<String>,
    pub sex: Option<Sex>,
    pub status: Option<AnimalStatus>,
}

impl AnimalFilter {
    pub fn matches(&self, animal: &Animal) -> bool {
        self.breed.as_deref().is_none_or(|b| animal.breed == b)
            && self.sex.is_none_or(|s| animal.sex == s)
            && self.status.is_none_or(|s| animal.status == s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Production
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductionSortField {
    RecordedDate,
    Quantity,
    Kind,
    CreatedAt,
}

impl SortField for ProductionSortField {
    type Item = OwnedProduction;

    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "recordedDate" => Self::RecordedDate,
            "quantity" => Self::Quantity,
            "kind" => Self::Kind,
            "createdAt" => Self::CreatedAt,
            _ => return None,
        })
    }

    fn column(&self) -> &'static str {
        match self {
            Self::RecordedDate => "p.recorded_date",
            Self::Quantity => "p.quantity",
            Self::Kind => "p.kind",
            Self::CreatedAt => "p.created_at",
        }
    }

    fn compare(&self, a: &OwnedProduction, b: &OwnedProduction) -> core::cmp::Ordering {
        let (a, b) = (&a.record, &b.record);
        match self {
            Self::RecordedDate => a.recorded_date.cmp(&b.recorded_date),
            Self::Quantity => a.quantity.value().total_cmp(&b.quantity.value()),
            Self::Kind => a.kind.as_str().cmp(b.kind.as_str()),
            Self::CreatedAt => a.created_at.cmp(&b.created_at),
        }
    }
}

pub type ProductionSort = Sort<ProductionSortField>;

impl Default for ProductionSort {
    fn default() -> Self {
        Self {
            field: ProductionSortField::RecordedDate,
            direction: SortDirection::Desc,
        }
    }
}

/// User-supplied production filters.
///
/// `animal_id` can only narrow the owner's animal set, never widen it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductionFilter {
    pub animal_id: Option<AnimalId>,
    pub kind: Option<ProductionKind>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl ProductionFilter {
    pub fn matches(&self, production: &OwnedProduction) -> bool {
        let r = &production.record;
        self.animal_id.is_none_or(|id| r.animal_id == id)
            && self.kind.is_none_or(|k| r.kind == k)
            && self.from.is_none_or(|from| r.recorded_date >= from)
            && self.to.is_none_or(|to| r.recorded_date <= to)
    }
}

/// One aggregated bucket of a production report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub period: String,
    pub total_production: f64,
    pub animal_count: i64,
    pub average_production: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sort_uses_default() {
        let sort = AnimalSort::parse(None, AnimalSort::default()).unwrap();
        assert_eq!(sort.order_by(), "created_at DESC");
    }

    #[test]
    fn parses_whitelisted_fields_only() {
        let sort = AnimalSort::parse(Some("weight:ASC"), AnimalSort::default()).unwrap();
        assert_eq!(sort.field, AnimalSortField::Weight);
        assert_eq!(sort.direction, SortDirection::Asc);

        assert!(AnimalSort::parse(Some("owner_id:asc"), AnimalSort::default()).is_err());
        assert!(AnimalSort::parse(Some("weight;drop table:asc"), AnimalSort::default()).is_err());
        assert!(ProductionSort::parse(Some("quantity:sideways"), ProductionSort::default()).is_err());
        assert!(ProductionSort::parse(Some("quantity"), ProductionSort::default()).is_err());
    }
}
