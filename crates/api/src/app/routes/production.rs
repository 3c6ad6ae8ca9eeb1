use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{Days, Utc};
use serde_json::json;

use agrotrack_core::{
    AnimalId, NewProductionRecord, ProductionChanges, ProductionKind, Quantity, ReportPeriod,
};
use agrotrack_infra::store::{AnimalScope, ProductionFilter, ProductionSort};

use crate::app::dto::{self, ApiJson, ApiQuery};
use crate::app::errors::ApiError;
use crate::app::routes::animals::parse_opt;
use crate::app::services::AppServices;
use crate::authz::{CandidateAnimal, VerifiedProduction};
use crate::context::IdentityContext;

pub const NO_ANIMALS_NOTICE: &str = "no animals registered; there is nothing to report";

/// Days without records of a kind before the report raises an alert.
const LOW_PRODUCTION_WINDOW_DAYS: u64 = 7;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_production).post(create_production))
        .route("/report", get(production_report))
        .route(
            "/:id",
            get(get_production).put(update_production).delete(delete_production),
        )
}

pub async fn list_production(
    Extension(services): Extension<Arc<AppServices>>,
    identity: IdentityContext,
    ApiQuery(query): ApiQuery<dto::ProductionListQuery>,
) -> Result<Response, ApiError> {
    let filter = ProductionFilter {
        animal_id: parse_opt::<AnimalId>(query.animal_id.as_deref())?,
        kind: parse_opt::<ProductionKind>(query.kind.as_deref())?,
        from: query.from,
        to: query.to,
    };
    let sort = ProductionSort::parse(query.sort.as_deref(), ProductionSort::default())?;

    let scope = services
        .bounded(AnimalScope::resolve(&*services.store, identity.user_id()))
        .await?;
    let records = services
        .bounded(services.store.list_production(&scope, &filter, sort))
        .await?;

    let data: Vec<_> = records.iter().map(dto::production_to_json).collect();
    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "count": data.len(), "data": data })),
    )
        .into_response())
}

pub async fn get_production(VerifiedProduction(production): VerifiedProduction) -> Response {
    (
        StatusCode::OK,
        Json(json!({ "success": true, "data": dto::production_to_json(&production) })),
    )
        .into_response()
}

/// The target animal comes from the body, so the creation guard runs here
/// rather than as a path extractor.
pub async fn create_production(
    Extension(services): Extension<Arc<AppServices>>,
    identity: IdentityContext,
    ApiJson(body): ApiJson<dto::CreateProductionRequest>,
) -> Result<Response, ApiError> {
    let animal_id = parse_opt::<AnimalId>(body.animal_id.as_deref())?;
    let Some(CandidateAnimal(animal)) = services
        .gate()
        .verify_animal_ownership_for_creation(animal_id, &identity)
        .await?
    else {
        return Err(ApiError::validation("animalId is required"));
    };

    let new = NewProductionRecord {
        animal_id: animal.id,
        kind: body.kind.parse()?,
        quantity: Quantity::new(body.quantity)?,
        recorded_date: body.recorded_date.unwrap_or_else(|| Utc::now().date_naive()),
    };
    let created = services
        .bounded(services.store.insert_production(new, Utc::now()))
        .await?;
    tracing::info!(production_id = %created.record.id, animal_id = %animal.id, "production recorded");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "production record created",
            "data": dto::production_to_json(&created),
        })),
    )
        .into_response())
}

pub async fn update_production(
    Extension(services): Extension<Arc<AppServices>>,
    VerifiedProduction(production): VerifiedProduction,
    ApiJson(body): ApiJson<dto::UpdateProductionRequest>,
) -> Result<Response, ApiError> {
    let changes = ProductionChanges {
        kind: parse_opt(body.kind.as_deref())?,
        quantity: body.quantity.map(Quantity::new).transpose()?,
        recorded_date: body.recorded_date,
    };
    let updated = services
        .bounded(
            services
                .store
                .update_production(production.record.id, changes, Utc::now()),
        )
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "production record updated",
            "data": dto::production_to_json(&updated),
        })),
    )
        .into_response())
}

pub async fn delete_production(
    Extension(services): Extension<Arc<AppServices>>,
    VerifiedProduction(production): VerifiedProduction,
) -> Result<Response, ApiError> {
    services
        .bounded(services.store.delete_production(production.record.id))
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "message": "production record deleted" })),
    )
        .into_response())
}

/// Aggregate production per period over the caller's animals.
///
/// An empty animal set is a normal outcome: an empty report with a notice.
pub async fn production_report(
    Extension(services): Extension<Arc<AppServices>>,
    identity: IdentityContext,
    ApiQuery(query): ApiQuery<dto::ReportQuery>,
) -> Result<Response, ApiError> {
    let period: ReportPeriod = parse_opt(query.period.as_deref())?
        .ok_or_else(|| ApiError::validation("period must be one of: daily, weekly, monthly"))?;
    let kind: ProductionKind = parse_opt(query.kind.as_deref())?
        .ok_or_else(|| ApiError::validation("kind must be one of: milk, meat"))?;

    let scope = services
        .bounded(AnimalScope::resolve(&*services.store, identity.user_id()))
        .await?;
    if scope.is_empty() {
        return Ok(report_response(period, kind, Vec::new(), Some(NO_ANIMALS_NOTICE.to_string())));
    }

    let rows = services
        .bounded(services.store.production_report(&scope, kind, period))
        .await?;

    let today = Utc::now().date_naive();
    let since = today
        .checked_sub_days(Days::new(LOW_PRODUCTION_WINDOW_DAYS))
        .unwrap_or(today);
    let recent = services
        .bounded(services.store.has_production_between(&scope, kind, since, today))
        .await?;
    let notice = (!recent).then(|| {
        format!(
            "alert: no {} production recorded in the last {LOW_PRODUCTION_WINDOW_DAYS} days",
            kind.as_str()
        )
    });

    Ok(report_response(
        period,
        kind,
        rows.iter().map(dto::report_row_to_json).collect(),
        notice,
    ))
}

fn report_response(
    period: ReportPeriod,
    kind: ProductionKind,
    rows: Vec<serde_json::Value>,
    notice: Option<String>,
) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": {
                "period": period.as_str(),
                "kind": kind.as_str(),
                "reporte": rows,
                "alerta": notice,
            },
        })),
    )
        .into_response()
}
