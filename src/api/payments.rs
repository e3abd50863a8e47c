use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    middleware,
    response::Json,
    routing::{get, post},
    Extension, Router,
};
use axum_extra::extract::WithRejection;
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use super::routes::AppState;
use crate::auth::{client_only_middleware, jwt_auth_middleware, UserSession};
use crate::error::{ApiError, ApiResult};
use crate::models::{CreatePaymentIntentRequest, Payment, PaymentIntentResponse, RefundRequest};
use crate::services::payment_service::WebhookOutcome;
use crate::services::PaymentService;

const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub outcome: WebhookOutcome,
}

pub fn payment_routes(state: AppState) -> Router {
    let authenticated = Router::new()
        .route(
            "/intent",
            post(create_payment_intent).route_layer(middleware::from_fn(client_only_middleware)),
        )
        .route("/", get(list_payments))
        .route("/:id", get(get_payment))
        .route("/:id/refund", post(refund_payment))
        .route_layer(middleware::from_fn_with_state(state.auth.clone(), jwt_auth_middleware));

    // Signed by the provider, not by a user token.
    Router::new()
        .route("/webhook", post(handle_webhook))
        .merge(authenticated)
        .with_state(state)
}

fn payments(state: &AppState) -> ApiResult<&PaymentService> {
    state.payments.as_ref().ok_or(ApiError::PaymentsDisabled)
}

#[tracing::instrument(skip(state, session, request), fields(client_id = %session.user_id))]
async fn create_payment_intent(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    WithRejection(Json(request), _): WithRejection<Json<CreatePaymentIntentRequest>, ApiError>,
) -> ApiResult<Json<PaymentIntentResponse>> {
    let response = payments(&state)?
        .create_payment_intent(&session, request.appointment_id)
        .await?;
    Ok(Json(response))
}

/// Payments made by the caller (all payments for admins).
async fn list_payments(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
) -> ApiResult<Json<Vec<Payment>>> {
    Ok(Json(payments(&state)?.list_payments(&session).await?))
}

async fn get_payment(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<Json<Payment>> {
    let payment = payments(&state)?.get_payment(payment_id).await?;
    if payment.user_id != session.user_id && !session.is_admin() {
        return Err(ApiError::NotFound("Payment"));
    }
    Ok(Json(payment))
}

#[tracing::instrument(skip(state, session, body), fields(user_id = %session.user_id))]
async fn refund_payment(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Path(payment_id): Path<Uuid>,
    body: Option<Json<RefundRequest>>,
) -> ApiResult<Json<Payment>> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    request.validate()?;

    let payment = payments(&state)?
        .refund_payment(&session, payment_id, request.reason.as_deref())
        .await?;
    tracing::info!("Refunded payment {}", payment.id);
    Ok(Json(payment))
}

/// Stripe webhook endpoint. Needs the raw body for signature verification.
#[tracing::instrument(skip(state, headers, body))]
async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("Missing Stripe-Signature header"))?;

    let outcome = payments(&state)?.handle_webhook(&body, signature).await?;
    tracing::info!("Webhook handled: {:?}", outcome);

    Ok(Json(WebhookResponse { received: true, outcome }))
}
