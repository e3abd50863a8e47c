use serial_test::serial;
use std::env;

use fitness_scheduler::config::{AppConfig, DatabaseConfig};
use fitness_scheduler::services::channels::{SmtpConfig, TwilioConfig};
use fitness_scheduler::services::stripe_client::StripeConfig;

const MANAGED_VARS: &[&str] = &[
    "ENVIRONMENT",
    "JWT_SECRET",
    "PORT",
    "CRON_SECRET",
    "CANCELLATION_WINDOW_HOURS",
    "ENABLE_SCHEDULER",
    "STRIPE_SECRET_KEY",
    "STRIPE_PRICE_BASIC",
    "STRIPE_WEBHOOK_SECRET",
    "SMTP_HOST",
    "SMTP_PORT",
    "TWILIO_ACCOUNT_SID",
    "TWILIO_AUTH_TOKEN",
    "TWILIO_FROM_NUMBER",
    "DB_MAX_CONNECTIONS",
    "TRUSTED_PROXIES",
];

fn clear_env() {
    for name in MANAGED_VARS {
        env::remove_var(name);
    }
}

#[test]
#[serial]
fn test_defaults_without_integrations() {
    clear_env();

    let config = AppConfig::from_env().unwrap();
    assert_eq!(config.port, 3000);
    assert_eq!(config.cancellation_window_hours, 24);
    assert!(config.enable_scheduler);
    assert!(config.cron_secret.is_none());
    assert!(config.trusted_proxies.is_empty());
    assert!(config.stripe.is_none());
    assert!(config.smtp.is_none());
    assert!(config.twilio.is_none());
}

#[test]
#[serial]
fn test_production_requires_jwt_secret() {
    clear_env();
    env::set_var("ENVIRONMENT", "production");

    assert!(AppConfig::from_env().is_err());

    env::set_var("JWT_SECRET", "a-real-secret");
    assert!(AppConfig::from_env().unwrap().is_production());
    clear_env();
}

#[test]
#[serial]
fn test_integrations_enable_from_env() {
    clear_env();
    env::set_var("STRIPE_SECRET_KEY", "sk_test_abc");
    env::set_var("STRIPE_PRICE_BASIC", "price_1");
    env::set_var("STRIPE_WEBHOOK_SECRET", "whsec_abc");
    env::set_var("SMTP_HOST", "localhost");
    env::set_var("SMTP_PORT", "1025");
    env::set_var("TWILIO_ACCOUNT_SID", "AC123");
    env::set_var("TWILIO_AUTH_TOKEN", "token");

    let stripe = StripeConfig::from_env().unwrap();
    assert_eq!(stripe.price_basic.as_deref(), Some("price_1"));
    assert!(!format!("{:?}", stripe).contains("sk_test_abc"));

    assert_eq!(SmtpConfig::from_env().unwrap().port, 1025);
    // Sender number missing.
    assert!(TwilioConfig::from_env().is_none());
    env::set_var("TWILIO_FROM_NUMBER", "+15550000000");
    assert!(TwilioConfig::from_env().is_some());

    clear_env();
}

#[test]
#[serial]
fn test_stripe_stays_disabled_without_webhook_secret() {
    clear_env();
    env::set_var("STRIPE_SECRET_KEY", "sk_test_abc");
    assert!(StripeConfig::from_env().is_none());

    env::set_var("STRIPE_WEBHOOK_SECRET", "   ");
    assert!(StripeConfig::from_env().is_none());

    env::set_var("STRIPE_WEBHOOK_SECRET", "whsec_abc");
    assert_eq!(StripeConfig::from_env().unwrap().webhook_secret, "whsec_abc");
    clear_env();
}

#[test]
#[serial]
fn test_invalid_numbers_fall_back() {
    clear_env();
    env::set_var("PORT", "not-a-port");
    env::set_var("CANCELLATION_WINDOW_HOURS", "soon");
    env::set_var("DB_MAX_CONNECTIONS", "many");
    env::set_var("TRUSTED_PROXIES", "10.0.0.2, not-an-ip,::1");

    let config = AppConfig::from_env().unwrap();
    assert_eq!(config.port, 3000);
    assert_eq!(config.cancellation_window_hours, 24);
    assert_eq!(
        config.trusted_proxies,
        vec!["10.0.0.2".parse::<std::net::IpAddr>().unwrap(), "::1".parse().unwrap()]
    );
    assert_eq!(DatabaseConfig::from_env().unwrap().max_connections, 20);
    clear_env();
}
