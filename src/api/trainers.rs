use axum::{
    extract::{Path, Query, State},
    middleware,
    response::Json,
    routing::get,
    Extension, Router,
};
use axum_extra::extract::WithRejection;
use uuid::Uuid;

use super::routes::AppState;
use crate::auth::{client_only_middleware, jwt_auth_middleware, trainer_only_middleware, UserSession};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    AvailableSlotsQuery, Availability, ClientProfile, ServiceOffering, TimeSlot, TrainerProfile,
    TrainerQuery, TrainerSummary, UpdateClientProfileRequest, UpdateTrainerProfileRequest,
};

/// Public trainer directory and the data the booking flow needs.
pub fn trainer_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_trainers))
        .route("/:id", get(get_trainer))
        .route("/:id/services", get(list_trainer_services))
        .route("/:id/availability", get(list_trainer_availability))
        .route("/:id/slots", get(list_available_slots))
        .with_state(state)
}

/// Profiles of the authenticated user.
pub fn profile_routes(state: AppState) -> Router {
    let trainer = Router::new()
        .route("/trainer", get(get_trainer_profile).put(update_trainer_profile))
        .route_layer(middleware::from_fn(trainer_only_middleware));

    let client = Router::new()
        .route("/client", get(get_client_profile).put(update_client_profile))
        .route("/client/trainers", get(my_trainers))
        .route_layer(middleware::from_fn(client_only_middleware));

    Router::new()
        .merge(trainer)
        .merge(client)
        .route_layer(middleware::from_fn_with_state(state.auth.clone(), jwt_auth_middleware))
        .with_state(state)
}

#[tracing::instrument(skip(state))]
async fn list_trainers(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<TrainerQuery>, ApiError>,
) -> ApiResult<Json<Vec<TrainerSummary>>> {
    Ok(Json(state.profiles.list_trainers(query).await?))
}

#[tracing::instrument(skip(state))]
async fn get_trainer(State(state): State<AppState>, Path(trainer_id): Path<Uuid>) -> ApiResult<Json<TrainerSummary>> {
    Ok(Json(state.profiles.get_trainer(trainer_id).await?))
}

/// Active offerings only.
#[tracing::instrument(skip(state))]
async fn list_trainer_services(
    State(state): State<AppState>,
    Path(trainer_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ServiceOffering>>> {
    Ok(Json(state.offerings.list_for_trainer(trainer_id, false).await?))
}

#[tracing::instrument(skip(state))]
async fn list_trainer_availability(
    State(state): State<AppState>,
    Path(trainer_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Availability>>> {
    Ok(Json(state.availability.list_for_trainer(trainer_id, true).await?))
}

/// Bookable start times for one service on one day.
#[tracing::instrument(skip(state))]
async fn list_available_slots(
    State(state): State<AppState>,
    Path(trainer_id): Path<Uuid>,
    WithRejection(Query(query), _): WithRejection<Query<AvailableSlotsQuery>, ApiError>,
) -> ApiResult<Json<Vec<TimeSlot>>> {
    let slots = state
        .bookings
        .list_available_slots(trainer_id, query.service_id, query.date)
        .await?;
    Ok(Json(slots))
}

async fn get_trainer_profile(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
) -> ApiResult<Json<TrainerProfile>> {
    Ok(Json(state.profiles.get_trainer_profile(session.user_id).await?))
}

#[tracing::instrument(skip(state, session, request), fields(user_id = %session.user_id))]
async fn update_trainer_profile(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    WithRejection(Json(request), _): WithRejection<Json<UpdateTrainerProfileRequest>, ApiError>,
) -> ApiResult<Json<TrainerProfile>> {
    Ok(Json(state.profiles.update_trainer_profile(session.user_id, request).await?))
}

async fn get_client_profile(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
) -> ApiResult<Json<ClientProfile>> {
    Ok(Json(state.profiles.get_client_profile(session.user_id).await?))
}

#[tracing::instrument(skip(state, session, request), fields(user_id = %session.user_id))]
async fn update_client_profile(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    WithRejection(Json(request), _): WithRejection<Json<UpdateClientProfileRequest>, ApiError>,
) -> ApiResult<Json<ClientProfile>> {
    Ok(Json(state.profiles.update_client_profile(session.user_id, request).await?))
}

/// Trainers the client has booked with.
async fn my_trainers(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
) -> ApiResult<Json<Vec<TrainerSummary>>> {
    Ok(Json(state.profiles.trainers_for_client(session.user_id).await?))
}
