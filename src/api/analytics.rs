use axum::{
    extract::{Query, State},
    middleware,
    response::Json,
    routing::get,
    Extension, Router,
};
use axum_extra::extract::WithRejection;
use uuid::Uuid;

use super::routes::AppState;
use crate::auth::{jwt_auth_middleware, UserRole, UserSession};
use crate::error::{ApiError, ApiResult};
use crate::models::{AnalyticsRange, ClientStats, MonthlyRevenue, OverviewStats, ServiceStats};

pub fn analytics_routes(state: AppState) -> Router {
    Router::new()
        .route("/overview", get(overview))
        .route("/revenue", get(revenue))
        .route("/services", get(services))
        .route("/clients", get(clients))
        .route_layer(middleware::from_fn_with_state(state.auth.clone(), jwt_auth_middleware))
        .with_state(state)
}

/// Trainers see their own business, admins the whole platform.
pub(crate) fn tenant_scope(session: &UserSession) -> ApiResult<Option<Uuid>> {
    match session.role {
        UserRole::Trainer => Ok(Some(session.user_id)),
        UserRole::Admin => Ok(None),
        UserRole::Client => Err(ApiError::forbidden("Analytics are available to trainers only")),
    }
}

#[tracing::instrument(skip(state, session), fields(user_id = %session.user_id))]
async fn overview(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    WithRejection(Query(range), _): WithRejection<Query<AnalyticsRange>, ApiError>,
) -> ApiResult<Json<OverviewStats>> {
    let scope = tenant_scope(&session)?;
    Ok(Json(state.analytics.overview(scope, &range).await?))
}

#[tracing::instrument(skip(state, session), fields(user_id = %session.user_id))]
async fn revenue(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    WithRejection(Query(range), _): WithRejection<Query<AnalyticsRange>, ApiError>,
) -> ApiResult<Json<Vec<MonthlyRevenue>>> {
    let scope = tenant_scope(&session)?;
    Ok(Json(state.analytics.monthly_revenue(scope, &range).await?))
}

#[tracing::instrument(skip(state, session), fields(user_id = %session.user_id))]
async fn services(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    WithRejection(Query(range), _): WithRejection<Query<AnalyticsRange>, ApiError>,
) -> ApiResult<Json<Vec<ServiceStats>>> {
    let scope = tenant_scope(&session)?;
    Ok(Json(state.analytics.service_stats(scope, &range).await?))
}

#[tracing::instrument(skip(state, session), fields(user_id = %session.user_id))]
async fn clients(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    WithRejection(Query(range), _): WithRejection<Query<AnalyticsRange>, ApiError>,
) -> ApiResult<Json<Vec<ClientStats>>> {
    let scope = tenant_scope(&session)?;
    Ok(Json(state.analytics.client_stats(scope, &range).await?))
}
