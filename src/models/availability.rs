use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// A recurring weekly window during which a trainer can be booked.
/// `day_of_week` counts from Sunday = 0, times are UTC wall clock.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Availability {
    pub id: Uuid,
    pub trainer_id: Uuid,
    pub day_of_week: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Availability {
    pub fn overlaps(&self, day_of_week: i16, start: NaiveTime, end: NaiveTime) -> bool {
        self.day_of_week == day_of_week && self.start_time < end && start < self.end_time
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAvailabilityRequest {
    #[validate(range(min = 0, max = 6))]
    pub day_of_week: i16,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateAvailabilityRequest {
    #[validate(range(min = 0, max = 6))]
    pub day_of_week: Option<i16>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub is_active: Option<bool>,
}
