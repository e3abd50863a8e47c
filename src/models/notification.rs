use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "notification_kind", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    // Booking lifecycle
    BookingCreated,
    BookingConfirmed,
    BookingCancelled,

    // Appointment reminders
    #[sqlx(rename = "REMINDER_24H")]
    #[serde(rename = "REMINDER_24H")]
    Reminder24h,
    #[sqlx(rename = "REMINDER_1H")]
    #[serde(rename = "REMINDER_1H")]
    Reminder1h,

    // Payments
    PaymentReceived,
    PaymentFailed,

    // Account
    PasswordReset,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::BookingCreated => "BOOKING_CREATED",
            NotificationKind::BookingConfirmed => "BOOKING_CONFIRMED",
            NotificationKind::BookingCancelled => "BOOKING_CANCELLED",
            NotificationKind::Reminder24h => "REMINDER_24H",
            NotificationKind::Reminder1h => "REMINDER_1H",
            NotificationKind::PaymentReceived => "PAYMENT_RECEIVED",
            NotificationKind::PaymentFailed => "PAYMENT_FAILED",
            NotificationKind::PasswordReset => "PASSWORD_RESET",
        }
    }

    /// Account mails go out by email even when the user muted notification email.
    pub fn is_transactional(&self) -> bool {
        matches!(self, NotificationKind::PasswordReset)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "notification_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Pending,
    Sending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub status: NotificationStatus,
    #[serde(skip_serializing)]
    pub dedup_key: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A notification about to be enqueued.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub dedup_key: Option<String>,
    pub scheduled_at: DateTime<Utc>,
}

impl NewNotification {
    pub fn now(user_id: Uuid, kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id,
            appointment_id: None,
            kind,
            title: title.into(),
            message: message.into(),
            dedup_key: None,
            scheduled_at: Utc::now(),
        }
    }

    pub fn for_appointment(mut self, appointment_id: Uuid) -> Self {
        self.appointment_id = Some(appointment_id);
        self
    }

    pub fn for_appointment_opt(mut self, appointment_id: Option<Uuid>) -> Self {
        self.appointment_id = appointment_id;
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    Email,
    Sms,
    WhatsApp,
    Push,
}

impl DeliveryChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryChannel::Email => "email",
            DeliveryChannel::Sms => "sms",
            DeliveryChannel::WhatsApp => "whatsapp",
            DeliveryChannel::Push => "push",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PushSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub created_at: DateTime<Utc>,
}

/// Mirrors the JSON a browser's `PushSubscription.toJSON()` produces.
#[derive(Debug, Deserialize)]
pub struct RegisterPushSubscriptionRequest {
    pub endpoint: String,
    pub keys: PushSubscriptionKeys,
}

#[derive(Debug, Deserialize)]
pub struct PushSubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Deserialize)]
pub struct RemovePushSubscriptionRequest {
    pub endpoint: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    pub unread_only: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct NotificationsListResponse {
    pub notifications: Vec<Notification>,
    pub unread_count: i64,
}

/// Outcome of a single dispatch pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
}
