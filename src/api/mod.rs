// API routes and handlers

pub mod analytics;
pub mod appointments;
pub mod auth;
pub mod availability;
pub mod cron;
pub mod health;
pub mod notifications;
pub mod offerings;
pub mod payments;
pub mod reports;
pub mod routes;
pub mod subscriptions;
pub mod trainers;

pub use routes::{create_routes, AppState};
