use std::sync::Arc;

use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use super::analytics::analytics_routes;
use super::appointments::appointment_routes;
use super::auth::{admin_routes, auth_routes};
use super::availability::availability_routes;
use super::cron::cron_routes;
use super::health::health_check;
use super::notifications::notification_routes;
use super::offerings::offering_routes;
use super::payments::payment_routes;
use super::reports::report_routes;
use super::subscriptions::subscription_routes;
use super::trainers::{profile_routes, trainer_routes};
use crate::auth::{cors_layer, security_headers_layer, AuthService};
use crate::config::AppConfig;
use crate::services::channels::ChannelDispatcher;
use crate::services::stripe_client::StripeClient;
use crate::services::{
    AnalyticsService, AvailabilityService, BookingService, NotificationService, OfferingService,
    PaymentService, ProfileService, SchedulerJobs,
};

/// Everything the handlers share. Cheap to clone: services only hold the pool.
#[derive(Debug, Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub auth: AuthService,
    pub profiles: ProfileService,
    pub offerings: OfferingService,
    pub availability: AvailabilityService,
    pub bookings: BookingService,
    pub notifications: NotificationService,
    /// `None` when Stripe is not configured.
    pub payments: Option<PaymentService>,
    pub analytics: AnalyticsService,
    pub jobs: SchedulerJobs,
}

impl AppState {
    pub fn new(db: PgPool, config: AppConfig) -> Result<Self> {
        let auth = AuthService::new(db.clone(), &config.jwt_secret, &config.app_url);

        let payments = match &config.stripe {
            Some(stripe) => Some(PaymentService::new(
                db.clone(),
                Arc::new(StripeClient::new(stripe)?),
                stripe.clone(),
            )),
            None => None,
        };

        let bookings = BookingService::new(db.clone(), payments.clone(), config.cancellation_window_hours);
        let notifications = NotificationService::new(db.clone());

        let dispatcher = ChannelDispatcher::from_config(
            config.smtp.as_ref(),
            config.twilio.as_ref(),
            config.push.as_ref(),
        )?;
        let jobs = SchedulerJobs::new(notifications.clone(), bookings.clone(), auth.clone(), dispatcher);

        Ok(Self {
            profiles: ProfileService::new(db.clone()),
            offerings: OfferingService::new(db.clone()),
            availability: AvailabilityService::new(db.clone()),
            analytics: AnalyticsService::new(db.clone()),
            config: Arc::new(config),
            auth,
            bookings,
            notifications,
            payments,
            jobs,
            db,
        })
    }
}

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check).with_state(state.db.clone()))
        .nest("/api/auth", auth_routes(state.auth.clone(), &state.config.trusted_proxies))
        .nest("/api/admin", admin_routes(state.auth.clone()))
        .nest("/api/trainers", trainer_routes(state.clone()))
        .nest("/api/profile", profile_routes(state.clone()))
        .nest("/api/services", offering_routes(state.clone()))
        .nest("/api/availability", availability_routes(state.clone()))
        .nest("/api/appointments", appointment_routes(state.clone()))
        .nest("/api/notifications", notification_routes(state.clone()))
        .nest("/api/payments", payment_routes(state.clone()))
        .nest("/api/subscriptions", subscription_routes(state.clone()))
        .nest("/api/analytics", analytics_routes(state.clone()))
        .nest("/api/reports", report_routes(state.clone()))
        .nest("/api/cron", cron_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .layer(security_headers_layer())
}
