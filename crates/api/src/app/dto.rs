use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::request::Parts;
use chrono::NaiveDate;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use agrotrack_core::{Animal, Identity, OwnedProduction};
use agrotrack_infra::store::ReportRow;

use crate::app::errors::ApiError;

// -------------------------
// Extractors
// -------------------------

/// `axum::Json` with rejections rendered as our error envelope.
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        axum::Json::<T>::from_request(req, state)
            .await
            .map(|axum::Json(value)| ApiJson(value))
            .map_err(|e: JsonRejection| ApiError::validation(e.body_text()))
    }
}

/// `axum::extract::Query` with rejections rendered as our error envelope.
#[derive(Debug)]
pub struct ApiQuery<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| ApiQuery(value))
            .map_err(|e: QueryRejection| ApiError::validation(e.body_text()))
    }
}

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub national_id: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub national_id: String,
    pub password: String,
}

/// Any `ownerId` sent by the client is ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAnimalRequest {
    pub external_tag: String,
    pub breed: String,
    pub birth_date: NaiveDate,
    pub sex: String,
    pub weight: f64,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAnimalRequest {
    pub external_tag: Option<String>,
    pub breed: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub sex: Option<String>,
    pub weight: Option<f64>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductionRequest {
    pub animal_id: Option<String>,
    pub kind: String,
    pub quantity: f64,
    pub recorded_date: Option<NaiveDate>,
}

/// `animalId` is not accepted here: a record never moves to another animal.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductionRequest {
    pub kind: Option<String>,
    pub quantity: Option<f64>,
    pub recorded_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnimalListQuery {
    pub breed: Option<String>,
    pub sex: Option<String>,
    pub status: Option<String>,
    pub sort: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionListQuery {
    pub animal_id: Option<String>,
    pub kind: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub sort: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    pub period: Option<String>,
    pub kind: Option<String>,
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn identity_to_json(identity: &Identity) -> Value {
    json!({
        "id": identity.id.to_string(),
        "name": identity.name,
        "nationalId": identity.national_id.as_str(),
        "createdAt": identity.created_at.to_rfc3339(),
    })
}

pub fn session_to_json(identity: &Identity, token: &str) -> Value {
    json!({
        "id": identity.id.to_string(),
        "name": identity.name,
        "nationalId": identity.national_id.as_str(),
        "token": token,
    })
}

pub fn animal_to_json(animal: &Animal) -> Value {
    json!({
        "id": animal.id.to_string(),
        "ownerId": animal.owner_id.to_string(),
        "externalTag": animal.external_tag.as_str(),
        "breed": animal.breed,
        "birthDate": animal.birth_date.to_string(),
        "sex": animal.sex.as_str(),
        "weight": animal.weight,
        "status": animal.status.as_str(),
        "createdAt": animal.created_at.to_rfc3339(),
        "updatedAt": animal.updated_at.to_rfc3339(),
    })
}

/// Animal with its embedded production records.
pub fn animal_with_production_to_json<'a>(
    animal: &Animal,
    production: impl IntoIterator<Item = &'a OwnedProduction>,
) -> Value {
    let mut value = animal_to_json(animal);
    value["production"] = production.into_iter().map(production_record_to_json).collect();
    value
}

/// Bare record fields, used when embedded under its animal.
pub fn production_record_to_json(production: &OwnedProduction) -> Value {
    let r = &production.record;
    json!({
        "id": r.id.to_string(),
        "animalId": r.animal_id.to_string(),
        "kind": r.kind.as_str(),
        "quantity": r.quantity.value(),
        "recordedDate": r.recorded_date.to_string(),
        "createdAt": r.created_at.to_rfc3339(),
        "updatedAt": r.updated_at.to_rfc3339(),
    })
}

pub fn production_to_json(production: &OwnedProduction) -> Value {
    let a = &production.animal;
    let mut value = production_record_to_json(production);
    value["animal"] = json!({
        "id": a.id.to_string(),
        "externalTag": a.external_tag.as_str(),
        "breed": a.breed,
        "sex": a.sex.as_str(),
    });
    value
}

pub fn report_row_to_json(row: &ReportRow) -> Value {
    json!({
        "period": row.period,
        "totalProduction": row.total_production,
        "animalCount": row.animal_count,
        "averageProduction": row.average_production,
    })
}
