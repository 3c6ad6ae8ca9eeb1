use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use agrotrack_core::{AnimalChanges, AnimalId, AnimalStatus, NewAnimal, OwnedProduction, Sex};
use agrotrack_infra::store::{
    AnimalFilter, AnimalScope, AnimalSort, OwnerScope, ProductionFilter, ProductionSort,
};

use crate::app::dto::{self, ApiJson, ApiQuery};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::authz::VerifiedAnimal;
use crate::context::IdentityContext;

/// Production records embedded per animal in list responses.
const LIST_PRODUCTION_PREVIEW: usize = 5;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_animals).post(create_animal))
        .route("/:id", get(get_animal).put(update_animal).delete(delete_animal))
}

pub async fn list_animals(
    Extension(services): Extension<Arc<AppServices>>,
    identity: IdentityContext,
    ApiQuery(query): ApiQuery<dto::AnimalListQuery>,
) -> Result<Response, ApiError> {
    let filter = AnimalFilter {
        breed: query.breed.filter(|b| !b.trim().is_empty()),
        sex: parse_opt::<Sex>(query.sex.as_deref())?,
        status: parse_opt::<AnimalStatus>(query.status.as_deref())?,
    };
    let sort = AnimalSort::parse(query.sort.as_deref(), AnimalSort::default())?;

    let scope = OwnerScope::of(identity.user_id());
    let animals = services
        .bounded(services.store.list_animals(&scope, &filter, sort))
        .await?;

    let listed = AnimalScope::from_ids(identity.user_id(), animals.iter().map(|a| a.id).collect());
    let production = services
        .bounded(
            services
                .store
                .list_production(&listed, &ProductionFilter::default(), ProductionSort::default()),
        )
        .await?;
    let mut by_animal: HashMap<AnimalId, Vec<&OwnedProduction>> = HashMap::new();
    for p in &production {
        let entry = by_animal.entry(p.record.animal_id).or_default();
        if entry.len() < LIST_PRODUCTION_PREVIEW {
            entry.push(p);
        }
    }

    let data: Vec<_> = animals
        .iter()
        .map(|a| {
            dto::animal_with_production_to_json(
                a,
                by_animal.get(&a.id).into_iter().flatten().copied(),
            )
        })
        .collect();

    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "count": data.len(), "data": data })),
    )
        .into_response())
}

pub async fn get_animal(
    Extension(services): Extension<Arc<AppServices>>,
    VerifiedAnimal(animal): VerifiedAnimal,
) -> Result<Response, ApiError> {
    let scope = AnimalScope::from_ids(animal.owner_id, vec![animal.id]);
    let production = services
        .bounded(
            services
                .store
                .list_production(&scope, &ProductionFilter::default(), ProductionSort::default()),
        )
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": dto::animal_with_production_to_json(&animal, &production),
        })),
    )
        .into_response())
}

/// The owner is always the caller.
pub async fn create_animal(
    Extension(services): Extension<Arc<AppServices>>,
    identity: IdentityContext,
    ApiJson(body): ApiJson<dto::CreateAnimalRequest>,
) -> Result<Response, ApiError> {
    let new = NewAnimal::new(
        identity.user_id(),
        &body.external_tag,
        &body.breed,
        body.birth_date,
        body.sex.parse()?,
        body.weight,
        parse_opt(body.status.as_deref())?,
    )?;
    let animal = services.bounded(services.store.insert_animal(new, Utc::now())).await?;
    tracing::info!(animal_id = %animal.id, owner_id = %animal.owner_id, "animal created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "animal created",
            "data": dto::animal_to_json(&animal),
        })),
    )
        .into_response())
}

pub async fn update_animal(
    Extension(services): Extension<Arc<AppServices>>,
    VerifiedAnimal(animal): VerifiedAnimal,
    ApiJson(body): ApiJson<dto::UpdateAnimalRequest>,
) -> Result<Response, ApiError> {
    let changes = AnimalChanges::new(
        body.external_tag.as_deref(),
        body.breed.as_deref(),
        body.birth_date,
        parse_opt(body.sex.as_deref())?,
        body.weight,
        parse_opt(body.status.as_deref())?,
    )?;
    let updated = services
        .bounded(services.store.update_animal(animal.id, changes, Utc::now()))
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "animal updated",
            "data": dto::animal_to_json(&updated),
        })),
    )
        .into_response())
}

pub async fn delete_animal(
    Extension(services): Extension<Arc<AppServices>>,
    VerifiedAnimal(animal): VerifiedAnimal,
) -> Result<Response, ApiError> {
    services.bounded(services.store.delete_animal(animal.id)).await?;
    tracing::info!(animal_id = %animal.id, "animal deleted");

    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "message": "animal deleted" })),
    )
        .into_response())
}

/// Parse an optional enum-like value; blank counts as absent.
pub(crate) fn parse_opt<T>(raw: Option<&str>) -> Result<Option<T>, ApiError>
where
    T: core::str::FromStr<Err = agrotrack_core::DomainError>,
{
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<T>)
        .transpose()
        .map_err(ApiError::from)
}
