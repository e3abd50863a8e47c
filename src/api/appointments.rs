use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
    Extension, Router,
};
use axum_extra::extract::WithRejection;
use uuid::Uuid;
use validator::Validate;

use super::routes::AppState;
use crate::auth::{client_only_middleware, jwt_auth_middleware, trainer_only_middleware, UserSession};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    Appointment, AppointmentDetails, AppointmentQuery, BookAppointmentRequest, CancelAppointmentRequest,
};
use crate::services::booking_service::CancellationOutcome;

pub fn appointment_routes(state: AppState) -> Router {
    let trainer = Router::new()
        .route("/:id/confirm", post(confirm_appointment))
        .route("/:id/complete", post(complete_appointment))
        .route("/:id/no-show", post(mark_no_show))
        .route_layer(middleware::from_fn(trainer_only_middleware));

    let shared = Router::new()
        .route(
            "/",
            get(list_appointments)
                .merge(post(book_appointment).route_layer(middleware::from_fn(client_only_middleware))),
        )
        .route("/:id", get(get_appointment))
        .route("/:id/cancel", post(cancel_appointment));

    Router::new()
        .merge(trainer)
        .merge(shared)
        .route_layer(middleware::from_fn_with_state(state.auth.clone(), jwt_auth_middleware))
        .with_state(state)
}

#[tracing::instrument(skip(state, session, request), fields(client_id = %session.user_id))]
async fn book_appointment(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    WithRejection(Json(request), _): WithRejection<Json<BookAppointmentRequest>, ApiError>,
) -> ApiResult<(StatusCode, Json<AppointmentDetails>)> {
    let appointment = state.bookings.book(&session, request).await?;
    tracing::info!("Booked appointment {} with trainer {}", appointment.id, appointment.trainer_id);
    Ok((StatusCode::CREATED, Json(appointment)))
}

/// Trainers see their calendar, clients their bookings, admins everything.
#[tracing::instrument(skip(state, session), fields(user_id = %session.user_id))]
async fn list_appointments(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    WithRejection(Query(query), _): WithRejection<Query<AppointmentQuery>, ApiError>,
) -> ApiResult<Json<Vec<AppointmentDetails>>> {
    Ok(Json(state.bookings.list_appointments(&session, query).await?))
}

async fn get_appointment(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Path(appointment_id): Path<Uuid>,
) -> ApiResult<Json<AppointmentDetails>> {
    Ok(Json(state.bookings.get_for_session(&session, appointment_id).await?))
}

#[tracing::instrument(skip(state, session), fields(trainer_id = %session.user_id))]
async fn confirm_appointment(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Path(appointment_id): Path<Uuid>,
) -> ApiResult<Json<Appointment>> {
    Ok(Json(state.bookings.confirm(&session, appointment_id).await?))
}

#[tracing::instrument(skip(state, session), fields(trainer_id = %session.user_id))]
async fn complete_appointment(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Path(appointment_id): Path<Uuid>,
) -> ApiResult<Json<Appointment>> {
    Ok(Json(state.bookings.complete(&session, appointment_id).await?))
}

#[tracing::instrument(skip(state, session), fields(trainer_id = %session.user_id))]
async fn mark_no_show(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Path(appointment_id): Path<Uuid>,
) -> ApiResult<Json<Appointment>> {
    Ok(Json(state.bookings.mark_no_show(&session, appointment_id).await?))
}

/// The body is optional; an empty request cancels without a reason.
#[tracing::instrument(skip(state, session, body), fields(user_id = %session.user_id))]
async fn cancel_appointment(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Path(appointment_id): Path<Uuid>,
    body: Option<Json<CancelAppointmentRequest>>,
) -> ApiResult<Json<CancellationOutcome>> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    request.validate()?;

    let outcome = state.bookings.cancel(&session, appointment_id, request.reason).await?;
    if outcome.refund_issued {
        tracing::info!("Refund issued for cancelled appointment {}", appointment_id);
    }
    Ok(Json(outcome))
}
