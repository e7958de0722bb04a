use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use tracing::info;

use crate::{
    application::dto::{EntityDto, HealthResponse, ListEntitiesQueryRequest},
    domain::errors::DomainError,
    interface::http::problem::{ApiProblem, ApiResult},
    state::AppState,
};

pub async fn healthcheck() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn create_entity(
    State(state): State<AppState>,
    payload: Result<Json<EntityDto>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<EntityDto>)> {
    let request = parse_payload(payload)?;
    info!(entity_id = %request.id, "create entity request received");

    state
        .entity_service
        .create_entity(request.clone())
        .await
        .map_err(ApiProblem::from_domain)?;

    info!(entity_id = %request.id, "entity created");
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn get_entity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<EntityDto>> {
    let id = require_id(id)?;

    let Some(entity) = state
        .entity_service
        .get_entity_by_id(&id)
        .await
        .map_err(ApiProblem::from_domain)?
    else {
        return Err(ApiProblem::from_domain(DomainError::not_found(format!(
            "entity '{id}' not found"
        ))));
    };

    Ok(Json(EntityDto::from(entity)))
}

pub async fn list_entities(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Json<Vec<EntityDto>>> {
    let query = ListEntitiesQueryRequest::from_pairs(pairs).map_err(ApiProblem::from_domain)?;
    query.validate().map_err(ApiProblem::from_domain)?;

    let entities = state
        .entity_service
        .get_all_entities(query)
        .await
        .map_err(ApiProblem::from_domain)?;

    Ok(Json(entities.into_iter().map(EntityDto::from).collect()))
}

pub async fn update_entity(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<EntityDto>, JsonRejection>,
) -> ApiResult<Json<EntityDto>> {
    let request = parse_payload(payload)?;
    if request.id != id {
        return Err(ApiProblem::validation(format!(
            "path id '{id}' does not match payload id '{}'",
            request.id
        )));
    }
    info!(entity_id = %id, "update entity request received");

    state
        .entity_service
        .update_entity(request.clone())
        .await
        .map_err(ApiProblem::from_domain)?;

    info!(entity_id = %id, "entity updated");
    Ok(Json(request))
}

pub async fn delete_entity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = require_id(id)?;
    info!(entity_id = %id, "delete entity request received");

    state
        .entity_service
        .delete_entity(&id)
        .await
        .map_err(ApiProblem::from_domain)?;

    info!(entity_id = %id, "entity deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn parse_payload(payload: Result<Json<EntityDto>, JsonRejection>) -> ApiResult<EntityDto> {
    let Json(request) = payload.map_err(|rejection| {
        ApiProblem::validation(format!("invalid entity payload: {}", rejection.body_text()))
    })?;
    request.validate().map_err(ApiProblem::from_domain)?;
    Ok(request)
}

fn require_id(id: String) -> ApiResult<String> {
    if id.trim().is_empty() {
        return Err(ApiProblem::validation("id must not be blank"));
    }
    Ok(id)
}
