use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lettre::message::Mailbox;
use pretty_assertions::assert_eq;
use uuid::Uuid;

use fitness_scheduler::models::{DeliveryChannel, NotificationKind, NotificationPreferences};
use fitness_scheduler::services::channels::email::build_email;
use fitness_scheduler::services::channels::push::push_payload;
use fitness_scheduler::services::channels::{
    delivery_succeeded, ChannelDispatcher, ChannelError, NotificationChannel, OutboundMessage, Recipient,
};

/// Records deliveries and optionally fails every send.
struct RecordingChannel {
    channel: DeliveryChannel,
    fail: bool,
    sent: Mutex<Vec<String>>,
}

impl RecordingChannel {
    fn new(channel: DeliveryChannel, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            channel,
            fail,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn channel(&self) -> DeliveryChannel {
        self.channel
    }

    async fn send(&self, recipient: &Recipient, message: &OutboundMessage) -> Result<(), ChannelError> {
        if self.fail {
            return Err(ChannelError::Provider {
                status: 500,
                body: "boom".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push(format!("{}:{}", recipient.email, message.title));
        Ok(())
    }
}

fn recipient(preferences: NotificationPreferences, phone: Option<&str>) -> Recipient {
    Recipient {
        user_id: Uuid::new_v4(),
        email: "client@example.com".to_string(),
        full_name: "Casey Client".to_string(),
        phone: phone.map(str::to_string),
        preferences,
        push_subscriptions: Vec::new(),
    }
}

fn message(kind: NotificationKind) -> OutboundMessage {
    OutboundMessage {
        kind,
        title: "Booking confirmed".to_string(),
        body: "See you on Monday at 09:00".to_string(),
    }
}

#[tokio::test]
async fn test_failing_channel_does_not_stop_others() {
    let email = RecordingChannel::new(DeliveryChannel::Email, false);
    let sms = RecordingChannel::new(DeliveryChannel::Sms, true);
    let dispatcher = ChannelDispatcher::new()
        .with_channel(sms.clone())
        .with_channel(email.clone());

    let prefs = NotificationPreferences {
        email: true,
        sms: true,
        whatsapp: false,
        push: false,
    };
    let attempts = dispatcher
        .deliver(&recipient(prefs, Some("+15551234567")), &message(NotificationKind::BookingConfirmed))
        .await;

    assert_eq!(attempts.len(), 2);
    assert_eq!(email.sent(), vec!["client@example.com:Booking confirmed".to_string()]);
    assert!(delivery_succeeded(&attempts));
}

#[tokio::test]
async fn test_preferences_gate_channels() {
    let email = RecordingChannel::new(DeliveryChannel::Email, false);
    let sms = RecordingChannel::new(DeliveryChannel::Sms, false);
    let dispatcher = ChannelDispatcher::new()
        .with_channel(email.clone())
        .with_channel(sms.clone());

    let prefs = NotificationPreferences {
        email: false,
        sms: true,
        whatsapp: false,
        push: false,
    };
    // SMS wanted but there is no phone number, email muted: nothing applies.
    let attempts = dispatcher
        .deliver(&recipient(prefs, None), &message(NotificationKind::Reminder24h))
        .await;

    assert!(attempts.is_empty());
    assert!(delivery_succeeded(&attempts));
    assert!(email.sent().is_empty());
    assert!(sms.sent().is_empty());
}

#[tokio::test]
async fn test_password_reset_ignores_muted_email() {
    let email = RecordingChannel::new(DeliveryChannel::Email, false);
    let dispatcher = ChannelDispatcher::new().with_channel(email.clone());

    let prefs = NotificationPreferences {
        email: false,
        sms: false,
        whatsapp: false,
        push: false,
    };
    let attempts = dispatcher
        .deliver(&recipient(prefs, None), &message(NotificationKind::PasswordReset))
        .await;

    assert_eq!(attempts.len(), 1);
    assert_eq!(email.sent().len(), 1);
}

#[tokio::test]
async fn test_all_channels_failing_is_a_failed_delivery() {
    let dispatcher = ChannelDispatcher::new().with_channel(RecordingChannel::new(DeliveryChannel::Email, true));
    let attempts = dispatcher
        .deliver(
            &recipient(NotificationPreferences::default(), None),
            &message(NotificationKind::BookingCreated),
        )
        .await;

    assert_eq!(attempts.len(), 1);
    assert!(!delivery_succeeded(&attempts));
}

#[test]
fn test_email_rendering() {
    let from: Mailbox = "Fitness Scheduler <no-reply@example.com>".parse().unwrap();
    let email = build_email(
        &from,
        &recipient(NotificationPreferences::default(), None),
        &message(NotificationKind::BookingConfirmed),
    )
    .unwrap();
    let raw = String::from_utf8(email.formatted()).unwrap();

    assert!(raw.contains("Subject: Booking confirmed"));
    assert!(raw.contains("client@example.com"));
}

#[test]
fn test_invalid_recipient_email_is_rejected() {
    let from: Mailbox = "no-reply@example.com".parse().unwrap();
    let mut bad = recipient(NotificationPreferences::default(), None);
    bad.email = "not an email".to_string();

    assert!(matches!(
        build_email(&from, &bad, &message(NotificationKind::BookingCreated)),
        Err(ChannelError::InvalidAddress(_))
    ));
}

#[test]
fn test_push_payload_shape() {
    let payload: serde_json::Value = serde_json::from_slice(&push_payload(&message(NotificationKind::Reminder1h))).unwrap();
    assert_eq!(payload["kind"], "REMINDER_1H");
    assert_eq!(payload["title"], "Booking confirmed");
}
