use assert_matches::assert_matches;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fitness_scheduler::models::{NotificationKind, NotificationPreferences};
use fitness_scheduler::services::channels::{
    ChannelError, NotificationChannel, OutboundMessage, Recipient, TwilioChannel, TwilioConfig,
};
use fitness_scheduler::services::stripe_client::{PaymentProvider, StripeClient, StripeError};

use crate::common::stripe_config;

#[tokio::test]
async fn test_stripe_payment_intent_request() {
    let server = MockServer::start().await;
    let appointment_id = Uuid::new_v4().to_string();

    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(header("authorization", "Bearer sk_test_123"))
        .and(header("idempotency-key", format!("intent-{}", appointment_id).as_str()))
        .and(body_string_contains("amount=6000"))
        .and(body_string_contains("customer=cus_123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_123",
            "client_secret": "pi_123_secret_abc",
            "status": "requires_payment_method",
            "amount": 6000,
            "currency": "usd"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = StripeClient::new(&stripe_config(&server.uri())).unwrap();
    let intent = client
        .create_payment_intent(6000, "usd", "cus_123", &appointment_id)
        .await
        .unwrap();

    assert_eq!(intent.id, "pi_123");
    assert_eq!(intent.client_secret.as_deref(), Some("pi_123_secret_abc"));
}

#[tokio::test]
async fn test_stripe_error_message_is_surfaced() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "Charge has already been refunded." }
        })))
        .mount(&server)
        .await;

    let client = StripeClient::new(&stripe_config(&server.uri())).unwrap();
    let err = client.refund("pi_123").await.unwrap_err();

    assert_matches!(
        err,
        StripeError::Api { status: 400, ref message } if message == "Charge has already been refunded."
    );
}

#[tokio::test]
async fn test_stripe_subscription_exposes_invoice_secret() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/subscriptions"))
        .and(body_string_contains("payment_behavior=default_incomplete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sub_1",
            "status": "incomplete",
            "current_period_end": 1893456000,
            "cancel_at_period_end": false,
            "latest_invoice": {
                "payment_intent": {
                    "id": "pi_sub",
                    "client_secret": "pi_sub_secret",
                    "status": "requires_payment_method",
                    "amount": 2900,
                    "currency": "usd"
                }
            }
        })))
        .mount(&server)
        .await;

    let client = StripeClient::new(&stripe_config(&server.uri())).unwrap();
    let subscription = client.create_subscription("cus_1", "price_basic").await.unwrap();

    assert_eq!(subscription.client_secret().as_deref(), Some("pi_sub_secret"));
}

fn twilio_config(api_base: &str) -> TwilioConfig {
    TwilioConfig {
        account_sid: "AC123".to_string(),
        auth_token: "token".to_string(),
        from_number: "+15550000000".to_string(),
        whatsapp_from: Some("+15550000001".to_string()),
        api_base: api_base.to_string(),
    }
}

fn recipient(phone: Option<&str>) -> Recipient {
    Recipient {
        user_id: Uuid::new_v4(),
        email: "client@example.com".to_string(),
        full_name: "Casey Client".to_string(),
        phone: phone.map(str::to_string),
        preferences: NotificationPreferences::default(),
        push_subscriptions: Vec::new(),
    }
}

fn reminder() -> OutboundMessage {
    OutboundMessage {
        kind: NotificationKind::Reminder1h,
        title: "Starting soon".to_string(),
        body: "Your session starts in one hour".to_string(),
    }
}

#[tokio::test]
async fn test_twilio_sms_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Messages.json"))
        .and(header_exists("authorization"))
        .and(body_string_contains("To=%2B15551234567"))
        .and(body_string_contains("From=%2B15550000000"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sid": "SM1" })))
        .expect(1)
        .mount(&server)
        .await;

    let channel = TwilioChannel::sms(twilio_config(&server.uri())).unwrap();
    channel.send(&recipient(Some("+15551234567")), &reminder()).await.unwrap();
}

#[tokio::test]
async fn test_twilio_whatsapp_prefixes_addresses() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Messages.json"))
        .and(body_string_contains("To=whatsapp%3A%2B15551234567"))
        .and(body_string_contains("From=whatsapp%3A%2B15550000001"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let channel = TwilioChannel::whatsapp(twilio_config(&server.uri())).unwrap();
    channel.send(&recipient(Some("+15551234567")), &reminder()).await.unwrap();
}

#[tokio::test]
async fn test_twilio_failure_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid To number"))
        .mount(&server)
        .await;

    let channel = TwilioChannel::sms(twilio_config(&server.uri())).unwrap();
    let err = channel.send(&recipient(Some("+1")), &reminder()).await.unwrap_err();
    assert_matches!(err, ChannelError::Provider { status: 400, .. });

    let missing = channel.send(&recipient(None), &reminder()).await.unwrap_err();
    assert_matches!(missing, ChannelError::MissingAddress("phone"));
}
