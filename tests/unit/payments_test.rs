use assert_matches::assert_matches;
use chrono::Utc;
use serde_json::json;

use fitness_scheduler::services::payment_service::{format_amount, parse_webhook_event, PaymentError};
use fitness_scheduler::services::stripe_client::{
    sign_webhook_payload, verify_webhook_signature, WEBHOOK_TOLERANCE_SECS,
};

const SECRET: &str = "whsec_unit";

fn event_payload() -> Vec<u8> {
    json!({
        "id": "evt_123",
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": "pi_123" } }
    })
    .to_string()
    .into_bytes()
}

#[test]
fn test_signed_payload_verifies() {
    let now = Utc::now().timestamp();
    let payload = event_payload();
    let header = sign_webhook_payload(&payload, SECRET, now);

    assert!(verify_webhook_signature(&payload, &header, SECRET, now));
    let event = parse_webhook_event(&payload, &header, SECRET, now).unwrap();
    assert_eq!(event.id, "evt_123");
    assert_eq!(event.event_type, "payment_intent.succeeded");
}

#[test]
fn test_tampered_payload_is_rejected() {
    let now = Utc::now().timestamp();
    let header = sign_webhook_payload(&event_payload(), SECRET, now);
    let tampered = event_payload().into_iter().rev().collect::<Vec<u8>>();

    assert_matches!(
        parse_webhook_event(&tampered, &header, SECRET, now),
        Err(PaymentError::InvalidSignature)
    );
}

#[test]
fn test_wrong_secret_and_stale_timestamp_are_rejected() {
    let now = Utc::now().timestamp();
    let payload = event_payload();

    let other = sign_webhook_payload(&payload, "whsec_other", now);
    assert!(!verify_webhook_signature(&payload, &other, SECRET, now));

    let stale = sign_webhook_payload(&payload, SECRET, now - WEBHOOK_TOLERANCE_SECS - 1);
    assert!(!verify_webhook_signature(&payload, &stale, SECRET, now));

    assert!(!verify_webhook_signature(&payload, "garbage", SECRET, now));
}

#[test]
fn test_signed_but_malformed_body() {
    let now = Utc::now().timestamp();
    let payload = b"{\"not\": \"an event\"}".to_vec();
    let header = sign_webhook_payload(&payload, SECRET, now);

    assert_matches!(
        parse_webhook_event(&payload, &header, SECRET, now),
        Err(PaymentError::InvalidPayload(_))
    );
}

#[test]
fn test_amount_formatting() {
    assert_eq!(format_amount(6000, "usd"), "60.00 USD");
    assert_eq!(format_amount(5, "eur"), "0.05 EUR");
}
