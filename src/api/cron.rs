use axum::{extract::State, response::Json, routing::post, Router};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde_json::{json, Value};
use subtle::ConstantTimeEq;

use super::routes::AppState;
use crate::error::{ApiError, ApiResult};

/// Scheduler jobs exposed for an external cron trigger.
pub fn cron_routes(state: AppState) -> Router {
    Router::new()
        .route("/dispatch", post(run_dispatch))
        .route("/reminders", post(run_reminders))
        .route("/maintenance", post(run_maintenance))
        .with_state(state)
}

/// Constant-time comparison of the presented secret.
fn secret_matches(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

/// Rejects every call when CRON_SECRET is unset.
fn authorize(state: &AppState, header: Option<TypedHeader<Authorization<Bearer>>>) -> ApiResult<()> {
    let expected = state.config.cron_secret.as_deref().ok_or(ApiError::Unauthorized)?;
    let TypedHeader(Authorization(bearer)) = header.ok_or(ApiError::Unauthorized)?;

    if secret_matches(expected, bearer.token()) {
        Ok(())
    } else {
        tracing::warn!("Cron trigger rejected: bad secret");
        Err(ApiError::Unauthorized)
    }
}

#[tracing::instrument(skip_all)]
async fn run_dispatch(
    State(state): State<AppState>,
    header: Option<TypedHeader<Authorization<Bearer>>>,
) -> ApiResult<Json<Value>> {
    authorize(&state, header)?;
    let summary = state.jobs.run_dispatch().await?;
    Ok(Json(json!({ "job": "dispatch", "summary": summary })))
}

#[tracing::instrument(skip_all)]
async fn run_reminders(
    State(state): State<AppState>,
    header: Option<TypedHeader<Authorization<Bearer>>>,
) -> ApiResult<Json<Value>> {
    authorize(&state, header)?;
    let enqueued = state.jobs.run_reminders().await?;
    Ok(Json(json!({ "job": "reminders", "enqueued": enqueued })))
}

#[tracing::instrument(skip_all)]
async fn run_maintenance(
    State(state): State<AppState>,
    header: Option<TypedHeader<Authorization<Bearer>>>,
) -> ApiResult<Json<Value>> {
    authorize(&state, header)?;
    let summary = state.jobs.run_maintenance().await?;
    Ok(Json(json!({ "job": "maintenance", "summary": summary })))
}
