use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::models::{CreateServiceRequest, ServiceOffering, UpdateServiceRequest};

pub(crate) const SERVICE_COLUMNS: &str =
    "id, trainer_id, name, description, duration_minutes, price_cents, currency, is_active, created_at, updated_at";

const DEFAULT_CURRENCY: &str = "usd";

/// Outcome of deleting an offering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRemoval {
    Deleted,
    /// Appointments reference the service, so it was only deactivated.
    Deactivated,
}

/// CRUD over the service catalogue of a trainer.
#[derive(Debug, Clone)]
pub struct OfferingService {
    db: PgPool,
}

impl OfferingService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn create(&self, trainer_id: Uuid, request: CreateServiceRequest) -> ApiResult<ServiceOffering> {
        request.validate()?;

        let currency = request
            .currency
            .as_deref()
            .unwrap_or(DEFAULT_CURRENCY)
            .to_lowercase();

        let service = sqlx::query_as::<_, ServiceOffering>(&format!(
            "INSERT INTO services (id, trainer_id, name, description, duration_minutes, price_cents, currency)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {SERVICE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(trainer_id)
        .bind(request.name.trim())
        .bind(&request.description)
        .bind(request.duration_minutes)
        .bind(request.price_cents)
        .bind(currency)
        .fetch_one(&self.db)
        .await?;

        tracing::info!("Trainer {} created service {}", trainer_id, service.id);
        Ok(service)
    }

    /// Services of a trainer. The public listing only shows active ones.
    pub async fn list_for_trainer(&self, trainer_id: Uuid, include_inactive: bool) -> ApiResult<Vec<ServiceOffering>> {
        let services = sqlx::query_as::<_, ServiceOffering>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM services
             WHERE trainer_id = $1 AND ($2 OR is_active)
             ORDER BY name"
        ))
        .bind(trainer_id)
        .bind(include_inactive)
        .fetch_all(&self.db)
        .await?;

        Ok(services)
    }

    pub async fn get(&self, service_id: Uuid) -> ApiResult<ServiceOffering> {
        sqlx::query_as::<_, ServiceOffering>(&format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = $1"))
            .bind(service_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(ApiError::NotFound("Service"))
    }

    pub async fn update(
        &self,
        trainer_id: Uuid,
        service_id: Uuid,
        request: UpdateServiceRequest,
    ) -> ApiResult<ServiceOffering> {
        request.validate()?;

        sqlx::query_as::<_, ServiceOffering>(&format!(
            "UPDATE services
             SET name = COALESCE($3, name),
                 description = COALESCE($4, description),
                 duration_minutes = COALESCE($5, duration_minutes),
                 price_cents = COALESCE($6, price_cents),
                 is_active = COALESCE($7, is_active),
                 updated_at = NOW()
             WHERE id = $1 AND trainer_id = $2
             RETURNING {SERVICE_COLUMNS}"
        ))
        .bind(service_id)
        .bind(trainer_id)
        .bind(request.name.as_deref().map(str::trim))
        .bind(&request.description)
        .bind(request.duration_minutes)
        .bind(request.price_cents)
        .bind(request.is_active)
        .fetch_optional(&self.db)
        .await?
        .ok_or(ApiError::NotFound("Service"))
    }

    pub async fn delete(&self, trainer_id: Uuid, service_id: Uuid) -> ApiResult<ServiceRemoval> {
        let mut tx = self.db.begin().await?;

        let owned: Option<Uuid> = sqlx::query_scalar("SELECT id FROM services WHERE id = $1 AND trainer_id = $2 FOR UPDATE")
            .bind(service_id)
            .bind(trainer_id)
            .fetch_optional(&mut *tx)
            .await?;
        if owned.is_none() {
            return Err(ApiError::NotFound("Service"));
        }

        let referenced: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM appointments WHERE service_id = $1)")
            .bind(service_id)
            .fetch_one(&mut *tx)
            .await?;

        let removal = if referenced {
            sqlx::query("UPDATE services SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
                .bind(service_id)
                .execute(&mut *tx)
                .await?;
            ServiceRemoval::Deactivated
        } else {
            sqlx::query("DELETE FROM services WHERE id = $1")
                .bind(service_id)
                .execute(&mut *tx)
                .await?;
            ServiceRemoval::Deleted
        };

        tx.commit().await?;
        Ok(removal)
    }
}
