use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::auth::UserRole;
use crate::models::validation::validate_phone;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub full_name: String,
    pub phone: Option<String>,
    pub totp_secret: Option<String>,
    pub totp_enabled: bool,
    pub email_notifications: bool,
    pub sms_notifications: bool,
    pub whatsapp_notifications: bool,
    pub push_notifications: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn preferences(&self) -> NotificationPreferences {
        NotificationPreferences {
            email: self.email_notifications,
            sms: self.sms_notifications,
            whatsapp: self.whatsapp_notifications,
            push: self.push_notifications,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub full_name: String,
    pub phone: Option<String>,
    pub totp_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            role: user.role,
            full_name: user.full_name,
            phone: user.phone,
            totp_enabled: user.totp_enabled,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUser {
    #[validate(length(min = 1, max = 120))]
    pub full_name: Option<String>,
    #[validate(custom(function = "validate_phone"))]
    pub phone: Option<String>,
}

/// Per-user channel switches. In-app delivery is always on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub email: bool,
    pub sms: bool,
    pub whatsapp: bool,
    pub push: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            email: true,
            sms: false,
            whatsapp: false,
            push: true,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateNotificationPreferences {
    pub email: Option<bool>,
    pub sms: Option<bool>,
    pub whatsapp: Option<bool>,
    pub push: Option<bool>,
}

impl NotificationPreferences {
    pub fn apply(self, update: &UpdateNotificationPreferences) -> Self {
        Self {
            email: update.email.unwrap_or(self.email),
            sms: update.sms.unwrap_or(self.sms),
            whatsapp: update.whatsapp.unwrap_or(self.whatsapp),
            push: update.push.unwrap_or(self.push),
        }
    }
}
