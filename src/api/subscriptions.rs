use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
    Extension, Router,
};
use axum_extra::extract::WithRejection;

use super::routes::AppState;
use crate::auth::{jwt_auth_middleware, trainer_only_middleware, UserSession};
use crate::error::{ApiError, ApiResult};
use crate::models::{CreateSubscriptionRequest, Subscription, SubscriptionResponse};

/// Platform plans billed to trainers.
pub fn subscription_routes(state: AppState) -> Router {
    Router::new()
        .route("/", post(create_subscription))
        .route("/me", get(current_subscription).delete(cancel_subscription))
        .route_layer(middleware::from_fn(trainer_only_middleware))
        .route_layer(middleware::from_fn_with_state(state.auth.clone(), jwt_auth_middleware))
        .with_state(state)
}

#[tracing::instrument(skip(state, session, request), fields(trainer_id = %session.user_id))]
async fn create_subscription(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    WithRejection(Json(request), _): WithRejection<Json<CreateSubscriptionRequest>, ApiError>,
) -> ApiResult<(StatusCode, Json<SubscriptionResponse>)> {
    let payments = state.payments.as_ref().ok_or(ApiError::PaymentsDisabled)?;
    let response = payments.create_subscription(&session, request.plan).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn current_subscription(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
) -> ApiResult<Json<Subscription>> {
    let payments = state.payments.as_ref().ok_or(ApiError::PaymentsDisabled)?;
    payments
        .current_subscription(session.user_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Subscription"))
}

#[tracing::instrument(skip(state, session), fields(trainer_id = %session.user_id))]
async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
) -> ApiResult<Json<Subscription>> {
    let payments = state.payments.as_ref().ok_or(ApiError::PaymentsDisabled)?;
    Ok(Json(payments.cancel_subscription(session.user_id).await?))
}
