use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, put},
    Extension, Router,
};
use axum_extra::extract::WithRejection;
use uuid::Uuid;

use super::routes::AppState;
use crate::auth::{jwt_auth_middleware, trainer_only_middleware, UserSession};
use crate::error::{ApiError, ApiResult};
use crate::models::{Availability, CreateAvailabilityRequest, UpdateAvailabilityRequest};

/// Weekly availability windows of the authenticated trainer.
pub fn availability_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_own_availability).post(create_availability))
        .route("/:id", put(update_availability).delete(delete_availability))
        .route_layer(middleware::from_fn(trainer_only_middleware))
        .route_layer(middleware::from_fn_with_state(state.auth.clone(), jwt_auth_middleware))
        .with_state(state)
}

async fn list_own_availability(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
) -> ApiResult<Json<Vec<Availability>>> {
    Ok(Json(state.availability.list_for_trainer(session.user_id, false).await?))
}

#[tracing::instrument(skip(state, session, request), fields(trainer_id = %session.user_id))]
async fn create_availability(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    WithRejection(Json(request), _): WithRejection<Json<CreateAvailabilityRequest>, ApiError>,
) -> ApiResult<(StatusCode, Json<Availability>)> {
    let window = state.availability.create(session.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(window)))
}

#[tracing::instrument(skip(state, session, request), fields(trainer_id = %session.user_id))]
async fn update_availability(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Path(availability_id): Path<Uuid>,
    WithRejection(Json(request), _): WithRejection<Json<UpdateAvailabilityRequest>, ApiError>,
) -> ApiResult<Json<Availability>> {
    Ok(Json(
        state
            .availability
            .update(session.user_id, availability_id, request)
            .await?,
    ))
}

#[tracing::instrument(skip(state, session), fields(trainer_id = %session.user_id))]
async fn delete_availability(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Path(availability_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.availability.delete(session.user_id, availability_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
