use chrono::NaiveTime;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::models::{Availability, CreateAvailabilityRequest, UpdateAvailabilityRequest};

const AVAILABILITY_COLUMNS: &str =
    "id, trainer_id, day_of_week, start_time, end_time, is_active, created_at, updated_at";

/// SQLSTATE for a violated exclusion constraint.
const EXCLUSION_VIOLATION: &str = "23P01";

/// Weekly availability windows of a trainer.
#[derive(Debug, Clone)]
pub struct AvailabilityService {
    db: PgPool,
}

/// Reject a window that is empty or collides with another window on the same day.
pub fn check_window(
    existing: &[Availability],
    day_of_week: i16,
    start: NaiveTime,
    end: NaiveTime,
    ignore_id: Option<Uuid>,
) -> ApiResult<()> {
    if !(0..=6).contains(&day_of_week) {
        return Err(ApiError::bad_request("day_of_week must be between 0 (Sunday) and 6 (Saturday)"));
    }
    if start >= end {
        return Err(ApiError::bad_request("start_time must be before end_time"));
    }
    let clash = existing
        .iter()
        .filter(|window| Some(window.id) != ignore_id)
        .any(|window| window.overlaps(day_of_week, start, end));
    if clash {
        return Err(ApiError::conflict("Availability overlaps an existing window"));
    }
    Ok(())
}

impl AvailabilityService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list_for_trainer(&self, trainer_id: Uuid, active_only: bool) -> ApiResult<Vec<Availability>> {
        let windows = sqlx::query_as::<_, Availability>(&format!(
            "SELECT {AVAILABILITY_COLUMNS} FROM availability
             WHERE trainer_id = $1 AND (NOT $2 OR is_active)
             ORDER BY day_of_week, start_time"
        ))
        .bind(trainer_id)
        .bind(active_only)
        .fetch_all(&self.db)
        .await?;

        Ok(windows)
    }

    pub async fn windows_for_day(&self, trainer_id: Uuid, day_of_week: i16) -> ApiResult<Vec<Availability>> {
        let windows = sqlx::query_as::<_, Availability>(&format!(
            "SELECT {AVAILABILITY_COLUMNS} FROM availability
             WHERE trainer_id = $1 AND day_of_week = $2 AND is_active
             ORDER BY start_time"
        ))
        .bind(trainer_id)
        .bind(day_of_week)
        .fetch_all(&self.db)
        .await?;

        Ok(windows)
    }

    pub async fn create(&self, trainer_id: Uuid, request: CreateAvailabilityRequest) -> ApiResult<Availability> {
        request.validate()?;

        let mut tx = self.db.begin().await?;
        let existing = locked_windows(&mut tx, trainer_id).await?;
        check_window(&existing, request.day_of_week, request.start_time, request.end_time, None)?;

        let window = sqlx::query_as::<_, Availability>(&format!(
            "INSERT INTO availability (id, trainer_id, day_of_week, start_time, end_time)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {AVAILABILITY_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(trainer_id)
        .bind(request.day_of_week)
        .bind(request.start_time)
        .bind(request.end_time)
        .fetch_one(&mut *tx)
        .await
        .map_err(overlap_as_conflict)?;

        tx.commit().await?;
        Ok(window)
    }

    pub async fn update(
        &self,
        trainer_id: Uuid,
        availability_id: Uuid,
        request: UpdateAvailabilityRequest,
    ) -> ApiResult<Availability> {
        request.validate()?;

        let mut tx = self.db.begin().await?;
        let existing = locked_windows(&mut tx, trainer_id).await?;
        let current = existing
            .iter()
            .find(|window| window.id == availability_id)
            .ok_or(ApiError::NotFound("Availability"))?;

        let day_of_week = request.day_of_week.unwrap_or(current.day_of_week);
        let start = request.start_time.unwrap_or(current.start_time);
        let end = request.end_time.unwrap_or(current.end_time);
        check_window(&existing, day_of_week, start, end, Some(availability_id))?;

        let window = sqlx::query_as::<_, Availability>(&format!(
            "UPDATE availability
             SET day_of_week = $3, start_time = $4, end_time = $5,
                 is_active = COALESCE($6, is_active), updated_at = NOW()
             WHERE id = $1 AND trainer_id = $2
             RETURNING {AVAILABILITY_COLUMNS}"
        ))
        .bind(availability_id)
        .bind(trainer_id)
        .bind(day_of_week)
        .bind(start)
        .bind(end)
        .bind(request.is_active)
        .fetch_one(&mut *tx)
        .await
        .map_err(overlap_as_conflict)?;

        tx.commit().await?;
        Ok(window)
    }

    pub async fn delete(&self, trainer_id: Uuid, availability_id: Uuid) -> ApiResult<()> {
        let result = sqlx::query("DELETE FROM availability WHERE id = $1 AND trainer_id = $2")
            .bind(availability_id)
            .bind(trainer_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("Availability"));
        }
        Ok(())
    }
}

/// All windows of a trainer, with edits to that trainer's schedule serialised until commit.
async fn locked_windows(tx: &mut Transaction<'_, Postgres>, trainer_id: Uuid) -> ApiResult<Vec<Availability>> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(format!("availability:{trainer_id}"))
        .execute(&mut **tx)
        .await?;

    let windows = sqlx::query_as::<_, Availability>(&format!(
        "SELECT {AVAILABILITY_COLUMNS} FROM availability WHERE trainer_id = $1"
    ))
    .bind(trainer_id)
    .fetch_all(&mut **tx)
    .await?;

    Ok(windows)
}

fn overlap_as_conflict(err: sqlx::Error) -> ApiError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(EXCLUSION_VIOLATION) => {
            ApiError::conflict("Availability overlaps an existing window")
        }
        _ => ApiError::Database(err),
    }
}
