// Runs against a real Postgres when TEST_DATABASE_URL is set; otherwise each test returns early.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use fitness_scheduler::auth::totp;
use fitness_scheduler::auth::{AuthError, LoginRequest, RefreshTokenRequest, RegisterRequest, UserRole, UserSession};
use fitness_scheduler::models::{
    AppointmentStatus, BookAppointmentRequest, CreateAvailabilityRequest, CreateServiceRequest, NewNotification,
    NotificationKind, PaymentStatus,
};
use fitness_scheduler::services::notification_service::insert_notification;
use fitness_scheduler::services::payment_service::WebhookOutcome;
use fitness_scheduler::services::stripe_client::{
    sign_webhook_payload, Customer, PaymentIntent, PaymentProvider, ProviderSubscription, Refund, StripeError,
};
use fitness_scheduler::services::PaymentService;
use fitness_scheduler::ApiError;

use crate::common::{
    app_with, insert_appointment, register_user, stripe_config, test_config, test_database, TEST_PASSWORD,
};

fn session(state: &fitness_scheduler::api::AppState, token: &str) -> UserSession {
    state.auth.jwt().extract_user_session(token).expect("session")
}

#[tokio::test]
async fn test_login_checks_password() {
    let Some(db) = test_database().await else {
        return;
    };
    let (_app, state) = app_with(db, test_config());
    let email = format!("Login-{}@Example.com", Uuid::new_v4());

    state
        .auth
        .register(RegisterRequest {
            email: email.clone(),
            password: TEST_PASSWORD.to_string(),
            full_name: "Lee Login".to_string(),
            phone: None,
            role: None,
        })
        .await
        .unwrap();

    let ok = state
        .auth
        .login(LoginRequest {
            email: email.to_lowercase(),
            password: TEST_PASSWORD.to_string(),
            totp_code: None,
        })
        .await
        .unwrap();
    assert_eq!(ok.user.role, UserRole::Client);

    let misused = state
        .auth
        .refresh_token(RefreshTokenRequest {
            refresh_token: ok.access_token.clone(),
        })
        .await
        .unwrap_err();
    assert_matches!(misused, AuthError::InvalidToken);
    assert!(state
        .auth
        .refresh_token(RefreshTokenRequest {
            refresh_token: ok.refresh_token.clone(),
        })
        .await
        .is_ok());

    let wrong = state
        .auth
        .login(LoginRequest {
            email,
            password: "Wrong-Passw0rd!".to_string(),
            totp_code: None,
        })
        .await
        .unwrap_err();
    assert_matches!(wrong, AuthError::InvalidCredentials);
}

#[tokio::test]
async fn test_book_conflict_and_cancel() {
    let Some(db) = test_database().await else {
        return;
    };
    let (_app, state) = app_with(db, test_config());

    let (trainer_id, trainer_token) = register_user(&state.auth, UserRole::Trainer).await;
    let (_, client_token) = register_user(&state.auth, UserRole::Client).await;
    let (_, rival_token) = register_user(&state.auth, UserRole::Client).await;

    let service = state
        .offerings
        .create(
            trainer_id,
            CreateServiceRequest {
                name: "Intro session".to_string(),
                description: None,
                duration_minutes: 60,
                price_cents: 0,
                currency: None,
            },
        )
        .await
        .unwrap();

    let date = (Utc::now() + Duration::days(7)).date_naive();
    state
        .availability
        .create(
            trainer_id,
            CreateAvailabilityRequest {
                day_of_week: date.weekday().num_days_from_sunday() as i16,
                start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            },
        )
        .await
        .unwrap();

    let slots = state.bookings.list_available_slots(trainer_id, service.id, date).await.unwrap();
    assert!(!slots.is_empty());
    let first = slots[0];

    let request = || BookAppointmentRequest {
        trainer_id,
        service_id: service.id,
        start_time: first.start_time,
        notes: None,
    };

    let client = session(&state, &client_token);
    let booked = state.bookings.book(&client, request()).await.unwrap();
    // Free services skip payment.
    assert_eq!(booked.status, AppointmentStatus::Confirmed);
    assert_eq!(booked.end_time - booked.start_time, Duration::minutes(60));

    let rival = session(&state, &rival_token);
    let clash = state.bookings.book(&rival, request()).await.unwrap_err();
    assert_matches!(clash, ApiError::Conflict(_));

    let remaining = state.bookings.list_available_slots(trainer_id, service.id, date).await.unwrap();
    assert!(remaining.iter().all(|slot| !slot.overlaps(booked.start_time, booked.end_time)));

    let trainer = session(&state, &trainer_token);
    let outcome = state
        .bookings
        .cancel(&trainer, booked.id, Some("Trainer unavailable".to_string()))
        .await
        .unwrap();
    assert_eq!(outcome.appointment.status, AppointmentStatus::Cancelled);
    assert!(!outcome.refund_issued);

    let again = state.bookings.cancel(&client, booked.id, None).await.unwrap_err();
    assert_matches!(again, ApiError::Conflict(_));

    // The slot opens up again once cancelled.
    let rebooked = state.bookings.book(&rival, request()).await.unwrap();
    assert_eq!(rebooked.start_time, first.start_time);
}

#[tokio::test]
async fn test_reminder_dedup_key_is_unique() {
    let Some(db) = test_database().await else {
        return;
    };
    let (_app, state) = app_with(db.clone(), test_config());
    let (client_id, _) = register_user(&state.auth, UserRole::Client).await;

    let key = format!("{}:REMINDER_24H", Uuid::new_v4());
    let reminder = NewNotification::now(client_id, NotificationKind::Reminder24h, "Tomorrow", "Session tomorrow")
        .with_dedup_key(key);

    let first = insert_notification(&db, &reminder).await.unwrap();
    let second = insert_notification(&db, &reminder).await.unwrap();

    assert!(first.is_some());
    assert!(second.is_none());
}

struct OfflineProvider;

fn offline() -> StripeError {
    StripeError::Api {
        status: 503,
        message: "offline".to_string(),
    }
}

#[async_trait]
impl PaymentProvider for OfflineProvider {
    async fn create_customer(&self, _email: &str, _name: &str) -> Result<Customer, StripeError> {
        Err(offline())
    }

    async fn create_payment_intent(
        &self,
        _amount_cents: i64,
        _currency: &str,
        _customer_id: &str,
        _appointment_id: &str,
    ) -> Result<PaymentIntent, StripeError> {
        Err(offline())
    }

    async fn refund(&self, _payment_intent_id: &str) -> Result<Refund, StripeError> {
        Err(offline())
    }

    async fn create_subscription(&self, _customer_id: &str, _price_id: &str) -> Result<ProviderSubscription, StripeError> {
        Err(offline())
    }

    async fn cancel_subscription_at_period_end(&self, _subscription_id: &str) -> Result<ProviderSubscription, StripeError> {
        Err(offline())
    }
}

#[tokio::test]
async fn test_webhook_replay_is_acknowledged_once() {
    let Some(db) = test_database().await else {
        return;
    };
    let config = stripe_config("http://127.0.0.1:1");
    let secret = config.webhook_secret.clone();
    let payments = PaymentService::new(db, Arc::new(OfflineProvider), config);

    let payload = json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": "invoice.created",
        "data": { "object": { "id": "in_1" } }
    })
    .to_string();
    let signature = sign_webhook_payload(payload.as_bytes(), &secret, Utc::now().timestamp());

    let first = payments.handle_webhook(payload.as_bytes(), &signature).await.unwrap();
    let replay = payments.handle_webhook(payload.as_bytes(), &signature).await.unwrap();

    assert_eq!(first, WebhookOutcome::Ignored);
    assert_eq!(replay, WebhookOutcome::Duplicate);
}

#[tokio::test]
async fn test_totp_code_is_accepted_once() {
    let Some(db) = test_database().await else {
        return;
    };
    let (_app, state) = app_with(db, test_config());
    let (user_id, _) = register_user(&state.auth, UserRole::Client).await;
    let email = state.auth.get_user(user_id).await.unwrap().email;

    let setup = state.auth.setup_totp(user_id).await.unwrap();
    let now = Utc::now().timestamp() as u64;
    let code = totp::code_at(&setup.secret, now).unwrap();
    state.auth.enable_totp(user_id, &code).await.unwrap();

    let login = |code: String| LoginRequest {
        email: email.clone(),
        password: TEST_PASSWORD.to_string(),
        totp_code: Some(code),
    };

    let replayed = state.auth.login(login(code.clone())).await.unwrap_err();
    assert_matches!(replayed, AuthError::InvalidTotp);

    let next = totp::code_at(&setup.secret, now + 30).unwrap();
    assert!(state.auth.login(login(next.clone())).await.is_ok());
    let replayed = state.auth.login(login(next)).await.unwrap_err();
    assert_matches!(replayed, AuthError::InvalidTotp);
}

#[tokio::test]
async fn test_concurrent_overlapping_windows_admit_one() {
    let Some(db) = test_database().await else {
        return;
    };
    let (_app, state) = app_with(db, test_config());
    let (trainer_id, _) = register_user(&state.auth, UserRole::Trainer).await;

    let window = |start: u32, end: u32| CreateAvailabilityRequest {
        day_of_week: 3,
        start_time: NaiveTime::from_hms_opt(start, 0, 0).unwrap(),
        end_time: NaiveTime::from_hms_opt(end, 0, 0).unwrap(),
    };

    let (first, second) = tokio::join!(
        state.availability.create(trainer_id, window(9, 12)),
        state.availability.create(trainer_id, window(11, 14)),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(ApiError::Conflict(_)))));
    assert_eq!(state.availability.list_for_trainer(trainer_id, false).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_bookings_of_one_slot_admit_one() {
    let Some(db) = test_database().await else {
        return;
    };
    let (_app, state) = app_with(db, test_config());

    let (trainer_id, _) = register_user(&state.auth, UserRole::Trainer).await;
    let (_, first_token) = register_user(&state.auth, UserRole::Client).await;
    let (_, second_token) = register_user(&state.auth, UserRole::Client).await;

    let service = state
        .offerings
        .create(
            trainer_id,
            CreateServiceRequest {
                name: "Assessment".to_string(),
                description: None,
                duration_minutes: 45,
                price_cents: 0,
                currency: None,
            },
        )
        .await
        .unwrap();

    let date = (Utc::now() + Duration::days(10)).date_naive();
    state
        .availability
        .create(
            trainer_id,
            CreateAvailabilityRequest {
                day_of_week: date.weekday().num_days_from_sunday() as i16,
                start_time: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            },
        )
        .await
        .unwrap();

    let slot = state.bookings.list_available_slots(trainer_id, service.id, date).await.unwrap()[0];
    let request = || BookAppointmentRequest {
        trainer_id,
        service_id: service.id,
        start_time: slot.start_time,
        notes: None,
    };

    let first = session(&state, &first_token);
    let second = session(&state, &second_token);
    let (a, b) = tokio::join!(state.bookings.book(&first, request()), state.bookings.book(&second, request()));

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(ApiError::Conflict(_)))));
}

/// Refunds succeed and are counted.
#[derive(Default)]
struct RefundingProvider {
    refunds: AtomicUsize,
}

#[async_trait]
impl PaymentProvider for RefundingProvider {
    async fn create_customer(&self, _email: &str, _name: &str) -> Result<Customer, StripeError> {
        Err(offline())
    }

    async fn create_payment_intent(
        &self,
        _amount_cents: i64,
        _currency: &str,
        _customer_id: &str,
        _appointment_id: &str,
    ) -> Result<PaymentIntent, StripeError> {
        Err(offline())
    }

    async fn refund(&self, payment_intent_id: &str) -> Result<Refund, StripeError> {
        self.refunds.fetch_add(1, Ordering::SeqCst);
        Ok(Refund {
            id: format!("re_{}", payment_intent_id),
            status: Some("succeeded".to_string()),
        })
    }

    async fn create_subscription(&self, _customer_id: &str, _price_id: &str) -> Result<ProviderSubscription, StripeError> {
        Err(offline())
    }

    async fn cancel_subscription_at_period_end(&self, _subscription_id: &str) -> Result<ProviderSubscription, StripeError> {
        Err(offline())
    }
}

async fn insert_pending_payment(db: &PgPool, appointment_id: Uuid, user_id: Uuid, intent_id: &str) {
    sqlx::query(
        "INSERT INTO payments (id, appointment_id, user_id, amount_cents, currency, provider_payment_id)
         VALUES ($1, $2, $3, 4500, 'usd', $4)",
    )
    .bind(Uuid::new_v4())
    .bind(appointment_id)
    .bind(user_id)
    .bind(intent_id)
    .execute(db)
    .await
    .unwrap();
}

fn signed_event(event_type: &str, object: serde_json::Value, secret: &str) -> (String, String) {
    let payload = json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": event_type,
        "data": { "object": object }
    })
    .to_string();
    let signature = sign_webhook_payload(payload.as_bytes(), secret, Utc::now().timestamp());
    (payload, signature)
}

#[tokio::test]
async fn test_payment_after_expiry_is_refunded() {
    let Some(db) = test_database().await else {
        return;
    };
    let (_app, state) = app_with(db.clone(), test_config());
    let (trainer_id, _) = register_user(&state.auth, UserRole::Trainer).await;
    let (client_id, _) = register_user(&state.auth, UserRole::Client).await;

    let start = Utc::now() - Duration::minutes(30);
    let appointment_id =
        insert_appointment(&db, trainer_id, client_id, start, AppointmentStatus::Pending, 4500).await;
    let intent_id = format!("pi_{}", Uuid::new_v4().simple());
    insert_pending_payment(&db, appointment_id, client_id, &intent_id).await;

    assert!(state.bookings.expire_unpaid().await.unwrap() >= 1);

    let provider = Arc::new(RefundingProvider::default());
    let config = stripe_config("http://127.0.0.1:1");
    let (payload, signature) = signed_event("payment_intent.succeeded", json!({ "id": intent_id }), &config.webhook_secret);
    let payments = PaymentService::new(db.clone(), provider.clone(), config);

    let outcome = payments.handle_webhook(payload.as_bytes(), &signature).await.unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);
    assert_eq!(provider.refunds.load(Ordering::SeqCst), 1);

    let (payment_status, refund_id): (PaymentStatus, Option<String>) =
        sqlx::query_as("SELECT status, refund_id FROM payments WHERE provider_payment_id = $1")
            .bind(&intent_id)
            .fetch_one(&db)
            .await
            .unwrap();
    assert_eq!(payment_status, PaymentStatus::Refunded);
    assert_eq!(refund_id, Some(format!("re_{}", intent_id)));

    let appointment_status: AppointmentStatus =
        sqlx::query_scalar("SELECT status FROM appointments WHERE id = $1")
            .bind(appointment_id)
            .fetch_one(&db)
            .await
            .unwrap();
    assert_eq!(appointment_status, AppointmentStatus::Cancelled);
}

#[tokio::test]
async fn test_payment_for_pending_booking_confirms_it() {
    let Some(db) = test_database().await else {
        return;
    };
    let (_app, state) = app_with(db.clone(), test_config());
    let (trainer_id, _) = register_user(&state.auth, UserRole::Trainer).await;
    let (client_id, _) = register_user(&state.auth, UserRole::Client).await;

    let start = Utc::now() + Duration::days(3);
    let appointment_id =
        insert_appointment(&db, trainer_id, client_id, start, AppointmentStatus::Pending, 4500).await;
    let intent_id = format!("pi_{}", Uuid::new_v4().simple());
    insert_pending_payment(&db, appointment_id, client_id, &intent_id).await;

    let provider = Arc::new(RefundingProvider::default());
    let config = stripe_config("http://127.0.0.1:1");
    let (payload, signature) = signed_event("payment_intent.succeeded", json!({ "id": intent_id }), &config.webhook_secret);
    let payments = PaymentService::new(db.clone(), provider.clone(), config);

    payments.handle_webhook(payload.as_bytes(), &signature).await.unwrap();
    assert_eq!(provider.refunds.load(Ordering::SeqCst), 0);

    let appointment_status: AppointmentStatus =
        sqlx::query_scalar("SELECT status FROM appointments WHERE id = $1")
            .bind(appointment_id)
            .fetch_one(&db)
            .await
            .unwrap();
    assert_eq!(appointment_status, AppointmentStatus::Confirmed);
}
