use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::models::validation::validate_currency;

/// A bookable product a trainer sells (e.g. "60 min personal training").
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServiceOffering {
    pub id: Uuid,
    pub trainer_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub duration_minutes: i32,
    pub price_cents: i64,
    pub currency: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceOffering {
    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateServiceRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[validate(range(min = 15, max = 480))]
    pub duration_minutes: i32,
    #[validate(range(min = 0))]
    pub price_cents: i64,
    #[validate(custom(function = "validate_currency"))]
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateServiceRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[validate(range(min = 15, max = 480))]
    pub duration_minutes: Option<i32>,
    #[validate(range(min = 0))]
    pub price_cents: Option<i64>,
    pub is_active: Option<bool>,
}
