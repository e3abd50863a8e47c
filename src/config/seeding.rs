use anyhow::Result;
use chrono::NaiveTime;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::{AuthError, AuthService, RegisterRequest, UserRole};
use crate::error::ApiError;
use crate::models::{CreateAvailabilityRequest, CreateServiceRequest};
use crate::services::{AvailabilityService, OfferingService};

pub const DEMO_PASSWORD: &str = "Demo-Pass-2024!";
pub const DEMO_TRAINER_EMAIL: &str = "trainer@demo.fitness";
pub const DEMO_CLIENT_EMAIL: &str = "client@demo.fitness";

/// Demo tenant for local development: one trainer with a catalogue and
/// weekday hours, plus one client.
pub struct DatabaseSeeder {
    pool: PgPool,
    auth: AuthService,
}

impl DatabaseSeeder {
    pub fn new(pool: PgPool, auth: AuthService) -> Self {
        Self { pool, auth }
    }

    pub async fn seed_all(&self) -> Result<()> {
        tracing::info!("Starting database seeding...");

        let trainer_id = self.seed_user(DEMO_TRAINER_EMAIL, "Dana Coach", UserRole::Trainer).await?;
        self.seed_user(DEMO_CLIENT_EMAIL, "Sam Client", UserRole::Client).await?;
        self.seed_services(trainer_id).await?;
        self.seed_availability(trainer_id).await?;

        tracing::info!("Database seeding completed!");
        Ok(())
    }

    async fn seed_user(&self, email: &str, full_name: &str, role: UserRole) -> Result<Uuid> {
        let request = RegisterRequest {
            email: email.to_string(),
            password: DEMO_PASSWORD.to_string(),
            full_name: full_name.to_string(),
            phone: None,
            role: Some(role),
        };

        match self.auth.register(request).await {
            Ok(response) => {
                tracing::info!("Created demo {} {}", role.as_str(), email);
                Ok(response.user.id)
            }
            Err(AuthError::EmailAlreadyExists) => {
                let id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE email = $1")
                    .bind(email)
                    .fetch_one(&self.pool)
                    .await?;
                Ok(id)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn seed_services(&self, trainer_id: Uuid) -> Result<()> {
        let offerings = OfferingService::new(self.pool.clone());
        if !offerings.list_for_trainer(trainer_id, true).await?.is_empty() {
            return Ok(());
        }

        let catalogue = [
            ("Personal training", "One-on-one strength session", 60, 6000),
            ("Mobility check-in", "Short mobility and form review", 30, 2500),
            ("Intro call", "Free consultation for new clients", 15, 0),
        ];

        for (name, description, duration_minutes, price_cents) in catalogue {
            offerings
                .create(
                    trainer_id,
                    CreateServiceRequest {
                        name: name.to_string(),
                        description: Some(description.to_string()),
                        duration_minutes,
                        price_cents,
                        currency: None,
                    },
                )
                .await?;
        }
        tracing::info!("Seeded demo services");
        Ok(())
    }

    async fn seed_availability(&self, trainer_id: Uuid) -> Result<()> {
        let availability = AvailabilityService::new(self.pool.clone());
        let (Some(start_time), Some(end_time)) = (
            NaiveTime::from_hms_opt(9, 0, 0),
            NaiveTime::from_hms_opt(17, 0, 0),
        ) else {
            return Ok(());
        };

        // Monday to Friday.
        for day_of_week in 1..=5 {
            let request = CreateAvailabilityRequest {
                day_of_week,
                start_time,
                end_time,
            };
            match availability.create(trainer_id, request).await {
                Ok(_) | Err(ApiError::Conflict(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
