use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::models::validation::validate_specialties;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TrainerProfile {
    pub user_id: Uuid,
    pub bio: Option<String>,
    pub specialties: Vec<String>,
    pub hourly_rate_cents: Option<i64>,
    #[serde(skip_serializing)]
    pub stripe_account_id: Option<String>,
    #[serde(skip_serializing)]
    pub stripe_customer_id: Option<String>,
    pub is_accepting_clients: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClientProfile {
    pub user_id: Uuid,
    pub fitness_goals: Option<String>,
    pub health_notes: Option<String>,
    #[serde(skip_serializing)]
    pub stripe_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public view of a trainer used by the booking flow.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TrainerSummary {
    pub id: Uuid,
    pub full_name: String,
    pub bio: Option<String>,
    pub specialties: Vec<String>,
    pub hourly_rate_cents: Option<i64>,
    pub is_accepting_clients: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTrainerProfileRequest {
    #[validate(length(max = 2000))]
    pub bio: Option<String>,
    #[validate(custom(function = "validate_specialties"))]
    pub specialties: Option<Vec<String>>,
    #[validate(range(min = 0, max = 10_000_000))]
    pub hourly_rate_cents: Option<i64>,
    pub is_accepting_clients: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateClientProfileRequest {
    #[validate(length(max = 2000))]
    pub fitness_goals: Option<String>,
    #[validate(length(max = 2000))]
    pub health_notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrainerQuery {
    pub specialty: Option<String>,
    pub accepting_only: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
