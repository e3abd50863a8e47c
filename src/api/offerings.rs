use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, put},
    Extension, Router,
};
use axum_extra::extract::WithRejection;
use serde::Serialize;
use uuid::Uuid;

use super::routes::AppState;
use crate::auth::{jwt_auth_middleware, trainer_only_middleware, UserSession};
use crate::error::{ApiError, ApiResult};
use crate::models::{CreateServiceRequest, ServiceOffering, UpdateServiceRequest};
use crate::services::offering_service::ServiceRemoval;

#[derive(Debug, Serialize)]
pub struct ServiceRemovalResponse {
    pub id: Uuid,
    pub deleted: bool,
    pub deactivated: bool,
}

/// The authenticated trainer's service catalogue.
pub fn offering_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_own_services).post(create_service))
        .route("/:id", put(update_service).delete(delete_service))
        .route_layer(middleware::from_fn(trainer_only_middleware))
        .route_layer(middleware::from_fn_with_state(state.auth.clone(), jwt_auth_middleware))
        .with_state(state)
}

/// Includes deactivated services.
async fn list_own_services(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
) -> ApiResult<Json<Vec<ServiceOffering>>> {
    Ok(Json(state.offerings.list_for_trainer(session.user_id, true).await?))
}

#[tracing::instrument(skip(state, session, request), fields(trainer_id = %session.user_id))]
async fn create_service(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    WithRejection(Json(request), _): WithRejection<Json<CreateServiceRequest>, ApiError>,
) -> ApiResult<(StatusCode, Json<ServiceOffering>)> {
    let service = state.offerings.create(session.user_id, request).await?;
    tracing::info!("Created service {}", service.id);
    Ok((StatusCode::CREATED, Json(service)))
}

#[tracing::instrument(skip(state, session, request), fields(trainer_id = %session.user_id))]
async fn update_service(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Path(service_id): Path<Uuid>,
    WithRejection(Json(request), _): WithRejection<Json<UpdateServiceRequest>, ApiError>,
) -> ApiResult<Json<ServiceOffering>> {
    Ok(Json(state.offerings.update(session.user_id, service_id, request).await?))
}

#[tracing::instrument(skip(state, session), fields(trainer_id = %session.user_id))]
async fn delete_service(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Path(service_id): Path<Uuid>,
) -> ApiResult<Json<ServiceRemovalResponse>> {
    let removal = state.offerings.delete(session.user_id, service_id).await?;
    Ok(Json(ServiceRemovalResponse {
        id: service_id,
        deleted: removal == ServiceRemoval::Deleted,
        deactivated: removal == ServiceRemoval::Deactivated,
    }))
}
