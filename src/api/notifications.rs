use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
    Extension, Router,
};
use axum_extra::extract::WithRejection;
use serde::Serialize;
use uuid::Uuid;

use super::routes::AppState;
use crate::auth::{jwt_auth_middleware, UserSession};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    NotificationPreferences, NotificationQuery, NotificationsListResponse, PushSubscription,
    RegisterPushSubscriptionRequest, RemovePushSubscriptionRequest, UpdateNotificationPreferences,
};

#[derive(Debug, Serialize)]
pub struct MarkAllReadResponse {
    pub updated: u64,
}

/// In-app notification inbox, channel preferences and push endpoints.
pub fn notification_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_notifications))
        .route("/:id/read", post(mark_notification_read))
        .route("/read-all", post(mark_all_read))
        .route("/preferences", get(get_preferences).put(update_preferences))
        .route(
            "/push-subscriptions",
            post(register_push_subscription).delete(remove_push_subscription),
        )
        .route_layer(middleware::from_fn_with_state(state.auth.clone(), jwt_auth_middleware))
        .with_state(state)
}

/// Get notifications for the authenticated user
async fn list_notifications(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    WithRejection(Query(query), _): WithRejection<Query<NotificationQuery>, ApiError>,
) -> ApiResult<Json<NotificationsListResponse>> {
    let response = state.notifications.list_for_user(session.user_id, query).await?;
    tracing::debug!(
        "Retrieved {} notifications for user {}",
        response.notifications.len(),
        session.user_id
    );
    Ok(Json(response))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Path(notification_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !state.notifications.mark_read(session.user_id, notification_id).await? {
        return Err(ApiError::NotFound("Notification"));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_all_read(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
) -> ApiResult<Json<MarkAllReadResponse>> {
    let updated = state.notifications.mark_all_read(session.user_id).await?;
    Ok(Json(MarkAllReadResponse { updated }))
}

async fn get_preferences(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
) -> ApiResult<Json<NotificationPreferences>> {
    state
        .notifications
        .get_preferences(session.user_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("User"))
}

#[tracing::instrument(skip(state, session), fields(user_id = %session.user_id))]
async fn update_preferences(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    WithRejection(Json(update), _): WithRejection<Json<UpdateNotificationPreferences>, ApiError>,
) -> ApiResult<Json<NotificationPreferences>> {
    state
        .notifications
        .update_preferences(session.user_id, update)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("User"))
}

#[tracing::instrument(skip(state, session, request), fields(user_id = %session.user_id))]
async fn register_push_subscription(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    WithRejection(Json(request), _): WithRejection<Json<RegisterPushSubscriptionRequest>, ApiError>,
) -> ApiResult<(StatusCode, Json<PushSubscription>)> {
    if !request.endpoint.starts_with("https://") {
        return Err(ApiError::bad_request("Push endpoint must be an https URL"));
    }
    let subscription = state
        .notifications
        .register_push_subscription(session.user_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

#[tracing::instrument(skip(state, session, request), fields(user_id = %session.user_id))]
async fn remove_push_subscription(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    WithRejection(Json(request), _): WithRejection<Json<RemovePushSubscriptionRequest>, ApiError>,
) -> ApiResult<StatusCode> {
    if !state
        .notifications
        .remove_push_subscription(session.user_id, &request.endpoint)
        .await?
    {
        return Err(ApiError::NotFound("Push subscription"));
    }
    Ok(StatusCode::NO_CONTENT)
}
