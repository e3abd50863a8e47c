use anyhow::{bail, Result};
use std::env;
use std::net::IpAddr;

use crate::services::channels::{PushConfig, SmtpConfig, TwilioConfig};
use crate::services::stripe_client::StripeConfig;

const DEFAULT_JWT_SECRET: &str = "change-me-in-production";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub log_level: String,
    pub jwt_secret: String,
    pub cron_secret: Option<String>,
    pub app_url: String,
    pub cancellation_window_hours: i64,
    pub enable_scheduler: bool,
    pub seed_demo_data: bool,
    /// Reverse proxies whose `X-Forwarded-For` is believed by the rate limiter.
    pub trusted_proxies: Vec<IpAddr>,
    pub stripe: Option<StripeConfig>,
    pub smtp: Option<SmtpConfig>,
    pub twilio: Option<TwilioConfig>,
    pub push: Option<PushConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .unwrap_or(3000);
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| DEFAULT_JWT_SECRET.to_string());
        let cron_secret = env::var("CRON_SECRET").ok().filter(|s| !s.is_empty());
        let app_url = env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
        let cancellation_window_hours = env::var("CANCELLATION_WINDOW_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .unwrap_or(24);
        let enable_scheduler = env_flag("ENABLE_SCHEDULER", true);
        let seed_demo_data = env_flag("SEED_DEMO_DATA", false);

        let config = AppConfig {
            host,
            port,
            environment,
            log_level,
            jwt_secret,
            cron_secret,
            app_url,
            cancellation_window_hours,
            enable_scheduler,
            seed_demo_data,
            trusted_proxies: trusted_proxies_from_env(),
            stripe: StripeConfig::from_env(),
            smtp: SmtpConfig::from_env(),
            twilio: TwilioConfig::from_env(),
            push: PushConfig::from_env(),
        };

        if config.is_production() && config.jwt_secret == DEFAULT_JWT_SECRET {
            bail!("JWT_SECRET must be set in production");
        }

        Ok(config)
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Log which third-party integrations are active.
    pub fn log_integrations(&self) {
        let integrations = [
            ("stripe", self.stripe.is_some()),
            ("smtp", self.smtp.is_some()),
            ("twilio", self.twilio.is_some()),
            ("web-push", self.push.is_some()),
        ];

        for (name, enabled) in integrations {
            if enabled {
                tracing::info!("Integration {} enabled", name);
            } else {
                tracing::warn!("Integration {} not configured, related features are disabled", name);
            }
        }
    }
}

fn trusted_proxies_from_env() -> Vec<IpAddr> {
    let Ok(raw) = env::var("TRUSTED_PROXIES") else {
        return Vec::new();
    };

    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                tracing::warn!("Ignoring invalid TRUSTED_PROXIES entry {:?}", entry);
                None
            }
        })
        .collect()
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
