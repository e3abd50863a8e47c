use axum::{
    extract::State,
    http::header,
    middleware,
    response::{IntoResponse, Response},
    routing::post,
    Extension, Json, Router,
};
use axum_extra::extract::WithRejection;
use chrono::Utc;

use super::analytics::tenant_scope;
use super::routes::AppState;
use crate::auth::{jwt_auth_middleware, UserSession};
use crate::error::{ApiError, ApiResult};
use crate::models::ReportRequest;
use crate::services::report_renderer;

pub fn report_routes(state: AppState) -> Router {
    Router::new()
        .route("/generate", post(generate_report))
        .route_layer(middleware::from_fn_with_state(state.auth.clone(), jwt_auth_middleware))
        .with_state(state)
}

/// Build a report and return it as a file download.
#[tracing::instrument(skip(state, session, request), fields(user_id = %session.user_id))]
async fn generate_report(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    WithRejection(Json(request), _): WithRejection<Json<ReportRequest>, ApiError>,
) -> ApiResult<Response> {
    let scope = tenant_scope(&session)?;
    let table = state.analytics.build_report(scope, &request).await?;
    let body = report_renderer::render(&table, request.format)?;

    let filename = format!(
        "{}-report-{}.{}",
        request.report_type.as_str(),
        Utc::now().format("%Y%m%d"),
        request.format.extension()
    );
    tracing::info!("Generated {} ({} bytes)", filename, body.len());

    Ok((
        [
            (header::CONTENT_TYPE, request.format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", filename)),
        ],
        body,
    )
        .into_response())
}
