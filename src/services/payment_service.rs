use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::UserSession;
use crate::models::{
    Appointment, AppointmentStatus, NewNotification, NotificationKind, Payment, PaymentIntentResponse,
    PaymentStatus, Subscription, SubscriptionPlan, SubscriptionResponse, SubscriptionStatus,
};
use crate::services::notification_service::insert_notification;
use crate::services::stripe_client::{verify_webhook_signature, PaymentProvider, StripeConfig, StripeError};

const PAYMENT_COLUMNS: &str = "id, appointment_id, user_id, amount_cents, currency, status, provider_payment_id, \
     refund_id, failure_reason, created_at, updated_at";

const SUBSCRIPTION_COLUMNS: &str = "id, trainer_id, plan, status, provider_subscription_id, current_period_end, \
     cancel_at_period_end, created_at, updated_at";

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    InvalidState(String),
    #[error("Invalid webhook signature")]
    InvalidSignature,
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),
    #[error("No price configured for the {0} plan")]
    PlanNotConfigured(&'static str),
    #[error(transparent)]
    Provider(#[from] StripeError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl PaymentError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            PaymentError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            PaymentError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            PaymentError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_payment_state"),
            PaymentError::InvalidSignature => (StatusCode::BAD_REQUEST, "invalid_signature"),
            PaymentError::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "invalid_payload"),
            PaymentError::PlanNotConfigured(_) => (StatusCode::SERVICE_UNAVAILABLE, "plan_not_configured"),
            PaymentError::Provider(_) => (StatusCode::BAD_GATEWAY, "payment_provider_error"),
            PaymentError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
        }
    }
}

/// What happened to a webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed,
    /// The event id was seen before; nothing changed.
    Duplicate,
    /// Verified and recorded, but not an event type the platform acts on.
    Ignored,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEventData {
    pub object: Value,
}

/// Verify and decode a raw webhook body.
pub fn parse_webhook_event(payload: &[u8], signature: &str, secret: &str, now: i64) -> Result<WebhookEvent, PaymentError> {
    if !verify_webhook_signature(payload, signature, secret, now) {
        return Err(PaymentError::InvalidSignature);
    }
    serde_json::from_slice(payload).map_err(|e| PaymentError::InvalidPayload(e.to_string()))
}

fn object_str<'a>(object: &'a Value, key: &str) -> Result<&'a str, PaymentError> {
    object
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| PaymentError::InvalidPayload(format!("missing data.object.{}", key)))
}

fn period_end(unix: Option<i64>) -> Option<DateTime<Utc>> {
    unix.and_then(|ts| DateTime::from_timestamp(ts, 0))
}

/// Payment intents, refunds, subscriptions and provider webhooks.
#[derive(Clone)]
pub struct PaymentService {
    db: PgPool,
    provider: Arc<dyn PaymentProvider>,
    config: StripeConfig,
}

impl std::fmt::Debug for PaymentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentService").field("config", &self.config).finish()
    }
}

impl PaymentService {
    pub fn new(db: PgPool, provider: Arc<dyn PaymentProvider>, config: StripeConfig) -> Self {
        Self { db, provider, config }
    }

    /// Start paying for an appointment the caller booked.
    pub async fn create_payment_intent(
        &self,
        session: &UserSession,
        appointment_id: Uuid,
    ) -> Result<PaymentIntentResponse, PaymentError> {
        let appointment = self.load_appointment(appointment_id).await?;

        if appointment.client_id != session.user_id {
            return Err(PaymentError::Forbidden("Only the booking client can pay for an appointment"));
        }
        if appointment.status != AppointmentStatus::Pending {
            return Err(PaymentError::InvalidState(format!(
                "Appointment is {}, only PENDING appointments can be paid",
                appointment.status.as_str()
            )));
        }
        if appointment.price_cents == 0 {
            return Err(PaymentError::InvalidState("Appointment is free".to_string()));
        }
        if self.succeeded_payment(appointment_id).await?.is_some() {
            return Err(PaymentError::InvalidState("Appointment is already paid".to_string()));
        }

        let customer_id = self.client_customer_id(session).await?;
        let intent = self
            .provider
            .create_payment_intent(
                appointment.price_cents,
                &appointment.currency,
                &customer_id,
                &appointment_id.to_string(),
            )
            .await?;

        // The provider returns the same intent for a repeated request, so reuse the row.
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "INSERT INTO payments (id, appointment_id, user_id, amount_cents, currency, provider_payment_id)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (provider_payment_id) DO UPDATE SET updated_at = NOW()
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(appointment_id)
        .bind(session.user_id)
        .bind(appointment.price_cents)
        .bind(&appointment.currency)
        .bind(&intent.id)
        .fetch_one(&self.db)
        .await?;

        tracing::info!("Created payment intent {} for appointment {}", intent.id, appointment_id);

        Ok(PaymentIntentResponse {
            payment_id: payment.id,
            client_secret: intent.client_secret.unwrap_or_default(),
            amount_cents: payment.amount_cents,
            currency: payment.currency,
        })
    }

    pub async fn get_payment(&self, payment_id: Uuid) -> Result<Payment, PaymentError> {
        sqlx::query_as::<_, Payment>(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"))
            .bind(payment_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(PaymentError::NotFound("Payment"))
    }

    /// Payments visible to the caller: their own, or those of their appointments for trainers.
    pub async fn list_payments(&self, session: &UserSession) -> Result<Vec<Payment>, PaymentError> {
        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE $2 OR user_id = $1
                OR appointment_id IN (SELECT id FROM appointments WHERE trainer_id = $1)
             ORDER BY created_at DESC
             LIMIT 200"
        ))
        .bind(session.user_id)
        .bind(session.is_admin())
        .fetch_all(&self.db)
        .await?;

        Ok(payments)
    }

    /// Refund a succeeded payment. Allowed for the appointment's trainer and admins.
    pub async fn refund_payment(
        &self,
        session: &UserSession,
        payment_id: Uuid,
        reason: Option<&str>,
    ) -> Result<Payment, PaymentError> {
        let payment = self.get_payment(payment_id).await?;

        if !session.is_admin() {
            let trainer_id: Option<Uuid> = match payment.appointment_id {
                Some(appointment_id) => {
                    sqlx::query_scalar("SELECT trainer_id FROM appointments WHERE id = $1")
                        .bind(appointment_id)
                        .fetch_optional(&self.db)
                        .await?
                }
                None => None,
            };
            if trainer_id != Some(session.user_id) {
                return Err(PaymentError::Forbidden("Only the trainer or an admin can refund this payment"));
            }
        }

        let refunded = self.refund(payment).await?;
        tracing::info!(
            "Refunded payment {} ({})",
            refunded.id,
            reason.unwrap_or("no reason given")
        );
        Ok(refunded)
    }

    /// Refund whatever was paid for an appointment. `None` when nothing was paid.
    pub async fn refund_for_appointment(&self, appointment_id: Uuid) -> Result<Option<Payment>, PaymentError> {
        match self.succeeded_payment(appointment_id).await? {
            Some(payment) => Ok(Some(self.refund(payment).await?)),
            None => Ok(None),
        }
    }

    pub async fn succeeded_payment(&self, appointment_id: Uuid) -> Result<Option<Payment>, PaymentError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE appointment_id = $1 AND status = 'SUCCEEDED'
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(appointment_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(payment)
    }

    async fn refund(&self, payment: Payment) -> Result<Payment, PaymentError> {
        if payment.status != PaymentStatus::Succeeded {
            return Err(PaymentError::InvalidState(
                "Only succeeded payments can be refunded".to_string(),
            ));
        }
        let intent_id = payment
            .provider_payment_id
            .as_deref()
            .ok_or_else(|| PaymentError::InvalidState("Payment has no provider reference".to_string()))?;

        let refund = self.provider.refund(intent_id).await?;

        let updated = sqlx::query_as::<_, Payment>(&format!(
            "UPDATE payments SET status = 'REFUNDED', refund_id = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(payment.id)
        .bind(&refund.id)
        .fetch_one(&self.db)
        .await?;

        Ok(updated)
    }

    /// Verify, de-duplicate and apply a provider webhook.
    pub async fn handle_webhook(&self, payload: &[u8], signature: &str) -> Result<WebhookOutcome, PaymentError> {
        let event = parse_webhook_event(payload, signature, &self.config.webhook_secret, Utc::now().timestamp())?;

        let mut tx = self.db.begin().await?;

        let fresh = sqlx::query("INSERT INTO webhook_events (event_id, event_type) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(&event.id)
            .bind(&event.event_type)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;
        if !fresh {
            tracing::debug!("Ignoring replayed webhook event {}", event.id);
            return Ok(WebhookOutcome::Duplicate);
        }

        let object = &event.data.object;
        let outcome = match event.event_type.as_str() {
            "payment_intent.succeeded" => {
                self.apply_payment_succeeded(&mut tx, object_str(object, "id")?).await?;
                WebhookOutcome::Processed
            }
            "payment_intent.payment_failed" => {
                let reason = object
                    .pointer("/last_payment_error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("Payment failed");
                self.apply_payment_failed(&mut tx, object_str(object, "id")?, reason).await?;
                WebhookOutcome::Processed
            }
            "charge.refunded" => {
                let refund_id = object.pointer("/refunds/data/0/id").and_then(Value::as_str);
                sqlx::query(
                    "UPDATE payments SET status = 'REFUNDED', refund_id = COALESCE($2, refund_id), updated_at = NOW()
                     WHERE provider_payment_id = $1",
                )
                .bind(object_str(object, "payment_intent")?)
                .bind(refund_id)
                .execute(&mut *tx)
                .await?;
                WebhookOutcome::Processed
            }
            "customer.subscription.created" | "customer.subscription.updated" | "customer.subscription.deleted" => {
                let status = if event.event_type.ends_with("deleted") {
                    SubscriptionStatus::Cancelled
                } else {
                    SubscriptionStatus::from_provider(object_str(object, "status")?)
                };
                sqlx::query(
                    "UPDATE subscriptions
                     SET status = $2, current_period_end = COALESCE($3, current_period_end),
                         cancel_at_period_end = $4, updated_at = NOW()
                     WHERE provider_subscription_id = $1",
                )
                .bind(object_str(object, "id")?)
                .bind(status)
                .bind(period_end(object.get("current_period_end").and_then(Value::as_i64)))
                .bind(object.get("cancel_at_period_end").and_then(Value::as_bool).unwrap_or(false))
                .execute(&mut *tx)
                .await?;
                WebhookOutcome::Processed
            }
            other => {
                tracing::debug!("Acknowledging unhandled webhook event type {}", other);
                WebhookOutcome::Ignored
            }
        };

        tx.commit().await?;
        tracing::info!("Webhook event {} ({}) handled", event.id, event.event_type);
        Ok(outcome)
    }

    async fn apply_payment_succeeded(&self, tx: &mut Transaction<'_, Postgres>, intent_id: &str) -> Result<(), PaymentError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "UPDATE payments SET status = 'SUCCEEDED', failure_reason = NULL, updated_at = NOW()
             WHERE provider_payment_id = $1 AND status IN ('PENDING', 'FAILED')
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(intent_id)
        .fetch_optional(&mut **tx)
        .await?;

        let Some(payment) = payment else {
            tracing::warn!("payment_intent.succeeded for unknown or settled intent {}", intent_id);
            return Ok(());
        };

        // Locked so a concurrent cancel or expiry either lands before this check or waits for commit.
        let appointment_status: Option<AppointmentStatus> = match payment.appointment_id {
            Some(appointment_id) => {
                sqlx::query_scalar("SELECT status FROM appointments WHERE id = $1 FOR UPDATE")
                    .bind(appointment_id)
                    .fetch_optional(&mut **tx)
                    .await?
            }
            None => None,
        };

        if appointment_status == Some(AppointmentStatus::Cancelled) {
            return self.refund_late_payment(tx, &payment).await;
        }

        insert_notification(
            &mut **tx,
            &NewNotification::now(
                payment.user_id,
                NotificationKind::PaymentReceived,
                "Payment received",
                format!("We received your payment of {}.", format_amount(payment.amount_cents, &payment.currency)),
            )
            .for_appointment_opt(payment.appointment_id),
        )
        .await?;

        if let (Some(appointment_id), Some(AppointmentStatus::Pending)) = (payment.appointment_id, appointment_status) {
            let trainer_id: Uuid = sqlx::query_scalar(
                "UPDATE appointments SET status = 'CONFIRMED', updated_at = NOW()
                 WHERE id = $1
                 RETURNING trainer_id",
            )
            .bind(appointment_id)
            .fetch_one(&mut **tx)
            .await?;

            insert_notification(
                &mut **tx,
                &NewNotification::now(
                    trainer_id,
                    NotificationKind::BookingConfirmed,
                    "Booking paid and confirmed",
                    "A client has paid for their booking. The appointment is now confirmed.",
                )
                .for_appointment(appointment_id),
            )
            .await?;
        }

        Ok(())
    }

    /// The charge landed after its appointment was cancelled. A provider failure rolls the
    /// webhook back so the provider redelivers it.
    async fn refund_late_payment(&self, tx: &mut Transaction<'_, Postgres>, payment: &Payment) -> Result<(), PaymentError> {
        let intent_id = payment
            .provider_payment_id
            .as_deref()
            .ok_or_else(|| PaymentError::InvalidState("Payment has no provider reference".to_string()))?;

        let refund = self.provider.refund(intent_id).await?;

        sqlx::query("UPDATE payments SET status = 'REFUNDED', refund_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(payment.id)
            .bind(&refund.id)
            .execute(&mut **tx)
            .await?;

        insert_notification(
            &mut **tx,
            &NewNotification::now(
                payment.user_id,
                NotificationKind::BookingCancelled,
                "Payment refunded",
                format!(
                    "Your payment of {} arrived after the booking was cancelled and has been refunded.",
                    format_amount(payment.amount_cents, &payment.currency)
                ),
            )
            .for_appointment_opt(payment.appointment_id),
        )
        .await?;

        tracing::warn!(
            "Refunded payment {} that succeeded after its appointment was cancelled",
            payment.id
        );
        Ok(())
    }

    async fn apply_payment_failed(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        intent_id: &str,
        reason: &str,
    ) -> Result<(), PaymentError> {
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "UPDATE payments SET status = 'FAILED', failure_reason = $2, updated_at = NOW()
             WHERE provider_payment_id = $1 AND status = 'PENDING'
             RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(intent_id)
        .bind(reason)
        .fetch_optional(&mut **tx)
        .await?;

        if let Some(payment) = payment {
            insert_notification(
                &mut **tx,
                &NewNotification::now(
                    payment.user_id,
                    NotificationKind::PaymentFailed,
                    "Payment failed",
                    format!("Your payment could not be processed: {}", reason),
                )
                .for_appointment_opt(payment.appointment_id),
            )
            .await?;
        }

        Ok(())
    }

    pub async fn create_subscription(
        &self,
        session: &UserSession,
        plan: SubscriptionPlan,
    ) -> Result<SubscriptionResponse, PaymentError> {
        let price_id = match plan {
            SubscriptionPlan::Basic => self.config.price_basic.as_deref().ok_or(PaymentError::PlanNotConfigured("basic"))?,
            SubscriptionPlan::Pro => self.config.price_pro.as_deref().ok_or(PaymentError::PlanNotConfigured("pro"))?,
        };

        if let Some(current) = self.current_subscription(session.user_id).await? {
            if matches!(current.status, SubscriptionStatus::Active | SubscriptionStatus::PastDue) {
                return Err(PaymentError::InvalidState("Trainer already has an active subscription".to_string()));
            }
        }

        let customer_id = self.trainer_customer_id(session).await?;
        let provider_subscription = self.provider.create_subscription(&customer_id, price_id).await?;

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            "INSERT INTO subscriptions (id, trainer_id, plan, status, provider_subscription_id, current_period_end, cancel_at_period_end)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(session.user_id)
        .bind(plan)
        .bind(SubscriptionStatus::from_provider(&provider_subscription.status))
        .bind(&provider_subscription.id)
        .bind(period_end(provider_subscription.current_period_end))
        .bind(provider_subscription.cancel_at_period_end)
        .fetch_one(&self.db)
        .await?;

        tracing::info!("Trainer {} subscribed to {:?}", session.user_id, plan);

        Ok(SubscriptionResponse {
            client_secret: provider_subscription.client_secret(),
            subscription,
        })
    }

    pub async fn current_subscription(&self, trainer_id: Uuid) -> Result<Option<Subscription>, PaymentError> {
        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE trainer_id = $1
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(trainer_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(subscription)
    }

    /// Stop renewal; the subscription stays usable until the current period ends.
    pub async fn cancel_subscription(&self, trainer_id: Uuid) -> Result<Subscription, PaymentError> {
        let current = self
            .current_subscription(trainer_id)
            .await?
            .filter(|s| s.status != SubscriptionStatus::Cancelled)
            .ok_or(PaymentError::NotFound("Subscription"))?;

        let provider_subscription = self
            .provider
            .cancel_subscription_at_period_end(&current.provider_subscription_id)
            .await?;

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            "UPDATE subscriptions
             SET cancel_at_period_end = TRUE, current_period_end = COALESCE($2, current_period_end), updated_at = NOW()
             WHERE id = $1
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(current.id)
        .bind(period_end(provider_subscription.current_period_end))
        .fetch_one(&self.db)
        .await?;

        Ok(subscription)
    }

    async fn load_appointment(&self, appointment_id: Uuid) -> Result<Appointment, PaymentError> {
        sqlx::query_as::<_, Appointment>(&format!(
            "SELECT {} FROM appointments WHERE id = $1",
            crate::services::booking_service::APPOINTMENT_COLUMNS
        ))
        .bind(appointment_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(PaymentError::NotFound("Appointment"))
    }

    async fn client_customer_id(&self, session: &UserSession) -> Result<String, PaymentError> {
        let existing: Option<Option<String>> =
            sqlx::query_scalar("SELECT stripe_customer_id FROM client_profiles WHERE user_id = $1")
                .bind(session.user_id)
                .fetch_optional(&self.db)
                .await?;

        if let Some(Some(customer_id)) = existing {
            return Ok(customer_id);
        }

        let customer_id = self.create_customer(session).await?;
        sqlx::query(
            "INSERT INTO client_profiles (user_id, stripe_customer_id) VALUES ($1, $2)
             ON CONFLICT (user_id) DO UPDATE SET stripe_customer_id = EXCLUDED.stripe_customer_id, updated_at = NOW()",
        )
        .bind(session.user_id)
        .bind(&customer_id)
        .execute(&self.db)
        .await?;

        Ok(customer_id)
    }

    async fn trainer_customer_id(&self, session: &UserSession) -> Result<String, PaymentError> {
        let existing: Option<Option<String>> =
            sqlx::query_scalar("SELECT stripe_customer_id FROM trainer_profiles WHERE user_id = $1")
                .bind(session.user_id)
                .fetch_optional(&self.db)
                .await?;

        if let Some(Some(customer_id)) = existing {
            return Ok(customer_id);
        }

        let customer_id = self.create_customer(session).await?;
        sqlx::query(
            "INSERT INTO trainer_profiles (user_id, stripe_customer_id) VALUES ($1, $2)
             ON CONFLICT (user_id) DO UPDATE SET stripe_customer_id = EXCLUDED.stripe_customer_id, updated_at = NOW()",
        )
        .bind(session.user_id)
        .bind(&customer_id)
        .execute(&self.db)
        .await?;

        Ok(customer_id)
    }

    async fn create_customer(&self, session: &UserSession) -> Result<String, PaymentError> {
        let name: String = sqlx::query_scalar("SELECT full_name FROM users WHERE id = $1")
            .bind(session.user_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(PaymentError::NotFound("User"))?;

        Ok(self.provider.create_customer(&session.email, &name).await?.id)
    }
}

/// `1999, "usd"` -> `19.99 USD`
pub fn format_amount(amount_cents: i64, currency: &str) -> String {
    let sign = if amount_cents < 0 { "-" } else { "" };
    let abs = amount_cents.unsigned_abs();
    format!("{}{}.{:02} {}", sign, abs / 100, abs % 100, currency.to_uppercase())
}
