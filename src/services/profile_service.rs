use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    ClientProfile, TrainerProfile, TrainerQuery, TrainerSummary, UpdateClientProfileRequest,
    UpdateTrainerProfileRequest,
};

const TRAINER_SUMMARY_SELECT: &str = "SELECT u.id, u.full_name, tp.bio, tp.specialties, tp.hourly_rate_cents, \
     tp.is_accepting_clients
     FROM users u JOIN trainer_profiles tp ON tp.user_id = u.id
     WHERE u.role = 'trainer'";

const TRAINER_PROFILE_COLUMNS: &str =
    "user_id, bio, specialties, hourly_rate_cents, stripe_account_id, stripe_customer_id, is_accepting_clients, \
     created_at, updated_at";

const CLIENT_PROFILE_COLUMNS: &str =
    "user_id, fitness_goals, health_notes, stripe_customer_id, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct ProfileService {
    db: PgPool,
}

impl ProfileService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Public trainer directory, the first step of the booking flow.
    pub async fn list_trainers(&self, query: TrainerQuery) -> ApiResult<Vec<TrainerSummary>> {
        let limit = query.limit.unwrap_or(50).clamp(1, 100);
        let offset = query.offset.unwrap_or(0).max(0);

        let trainers = sqlx::query_as::<_, TrainerSummary>(&format!(
            "{TRAINER_SUMMARY_SELECT}
             AND ($1::text IS NULL OR $1 = ANY(tp.specialties))
             AND (NOT $2 OR tp.is_accepting_clients)
             ORDER BY u.full_name
             LIMIT $3 OFFSET $4"
        ))
        .bind(query.specialty.map(|s| s.trim().to_lowercase()))
        .bind(query.accepting_only.unwrap_or(false))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(trainers)
    }

    pub async fn get_trainer(&self, trainer_id: Uuid) -> ApiResult<TrainerSummary> {
        sqlx::query_as::<_, TrainerSummary>(&format!("{TRAINER_SUMMARY_SELECT} AND u.id = $1"))
            .bind(trainer_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(ApiError::NotFound("Trainer"))
    }

    pub async fn get_trainer_profile(&self, user_id: Uuid) -> ApiResult<TrainerProfile> {
        sqlx::query_as::<_, TrainerProfile>(&format!(
            "SELECT {TRAINER_PROFILE_COLUMNS} FROM trainer_profiles WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(ApiError::NotFound("Trainer profile"))
    }

    pub async fn update_trainer_profile(
        &self,
        user_id: Uuid,
        request: UpdateTrainerProfileRequest,
    ) -> ApiResult<TrainerProfile> {
        request.validate()?;

        let specialties = request
            .specialties
            .map(|list| list.into_iter().map(|s| s.trim().to_lowercase()).collect::<Vec<_>>());

        sqlx::query_as::<_, TrainerProfile>(&format!(
            "UPDATE trainer_profiles
             SET bio = COALESCE($2, bio),
                 specialties = COALESCE($3, specialties),
                 hourly_rate_cents = COALESCE($4, hourly_rate_cents),
                 is_accepting_clients = COALESCE($5, is_accepting_clients),
                 updated_at = NOW()
             WHERE user_id = $1
             RETURNING {TRAINER_PROFILE_COLUMNS}"
        ))
        .bind(user_id)
        .bind(request.bio)
        .bind(specialties)
        .bind(request.hourly_rate_cents)
        .bind(request.is_accepting_clients)
        .fetch_optional(&self.db)
        .await?
        .ok_or(ApiError::NotFound("Trainer profile"))
    }

    pub async fn get_client_profile(&self, user_id: Uuid) -> ApiResult<ClientProfile> {
        sqlx::query_as::<_, ClientProfile>(&format!(
            "SELECT {CLIENT_PROFILE_COLUMNS} FROM client_profiles WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(ApiError::NotFound("Client profile"))
    }

    pub async fn update_client_profile(
        &self,
        user_id: Uuid,
        request: UpdateClientProfileRequest,
    ) -> ApiResult<ClientProfile> {
        request.validate()?;

        sqlx::query_as::<_, ClientProfile>(&format!(
            "UPDATE client_profiles
             SET fitness_goals = COALESCE($2, fitness_goals),
                 health_notes = COALESCE($3, health_notes),
                 updated_at = NOW()
             WHERE user_id = $1
             RETURNING {CLIENT_PROFILE_COLUMNS}"
        ))
        .bind(user_id)
        .bind(request.fitness_goals)
        .bind(request.health_notes)
        .fetch_optional(&self.db)
        .await?
        .ok_or(ApiError::NotFound("Client profile"))
    }

    /// Trainers a client has booked before, most recent first.
    pub async fn trainers_for_client(&self, client_id: Uuid) -> ApiResult<Vec<TrainerSummary>> {
        let trainers = sqlx::query_as::<_, TrainerSummary>(&format!(
            "{TRAINER_SUMMARY_SELECT}
             AND u.id IN (SELECT trainer_id FROM appointments WHERE client_id = $1)
             ORDER BY u.full_name"
        ))
        .bind(client_id)
        .fetch_all(&self.db)
        .await?;

        Ok(trainers)
    }
}
