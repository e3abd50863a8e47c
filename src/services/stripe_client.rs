use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use std::env;
use std::time::Duration;

const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Maximum age of a webhook signature timestamp.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    pub price_basic: Option<String>,
    pub price_pro: Option<String>,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("price_basic", &self.price_basic)
            .field("price_pro", &self.price_pro)
            .finish()
    }
}

impl StripeConfig {
    /// `None` unless both `STRIPE_SECRET_KEY` and `STRIPE_WEBHOOK_SECRET` are set.
    pub fn from_env() -> Option<Self> {
        let secret_key = env::var("STRIPE_SECRET_KEY").ok().filter(|k| !k.is_empty())?;
        let Some(webhook_secret) = env::var("STRIPE_WEBHOOK_SECRET").ok().filter(|s| !s.trim().is_empty()) else {
            tracing::warn!("STRIPE_SECRET_KEY is set but STRIPE_WEBHOOK_SECRET is not; payments stay disabled");
            return None;
        };

        Some(Self {
            secret_key,
            webhook_secret,
            api_base: env::var("STRIPE_API_BASE").unwrap_or_else(|_| DEFAULT_STRIPE_API_BASE.to_string()),
            price_basic: env::var("STRIPE_PRICE_BASIC").ok().filter(|p| !p.is_empty()),
            price_pro: env::var("STRIPE_PRICE_PRO").ok().filter(|p| !p.is_empty()),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    #[error("Stripe request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Stripe API error ({status}): {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Refund {
    pub id: String,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub status: String,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub latest_invoice: Option<LatestInvoice>,
}

impl ProviderSubscription {
    pub fn client_secret(&self) -> Option<String> {
        self.latest_invoice
            .as_ref()
            .and_then(|invoice| invoice.payment_intent.as_ref())
            .and_then(|intent| intent.client_secret.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LatestInvoice {
    pub payment_intent: Option<PaymentIntent>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

/// Operations the platform needs from a payment provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_customer(&self, email: &str, name: &str) -> Result<Customer, StripeError>;

    async fn create_payment_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        customer_id: &str,
        appointment_id: &str,
    ) -> Result<PaymentIntent, StripeError>;

    async fn refund(&self, payment_intent_id: &str) -> Result<Refund, StripeError>;

    async fn create_subscription(&self, customer_id: &str, price_id: &str) -> Result<ProviderSubscription, StripeError>;

    async fn cancel_subscription_at_period_end(&self, subscription_id: &str) -> Result<ProviderSubscription, StripeError>;
}

/// Stripe REST client. Requests are form-encoded and authenticated with the secret key.
pub struct StripeClient {
    client: Client,
    secret_key: String,
    base_url: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            secret_key: config.secret_key.clone(),
            base_url: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(&str, &str)],
        idempotency_key: Option<&str>,
    ) -> Result<T, StripeError> {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.secret_key)
            .form(params);

        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<StripeErrorBody>(&text)
                .ok()
                .and_then(|body| body.error.message)
                .unwrap_or(text);
            tracing::error!("Stripe {} failed: {} - {}", path, status, message);
            return Err(StripeError::Api { status, message });
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_customer(&self, email: &str, name: &str) -> Result<Customer, StripeError> {
        self.post("/v1/customers", &[("email", email), ("name", name)], None).await
    }

    async fn create_payment_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        customer_id: &str,
        appointment_id: &str,
    ) -> Result<PaymentIntent, StripeError> {
        let amount = amount_cents.to_string();
        let params = [
            ("amount", amount.as_str()),
            ("currency", currency),
            ("customer", customer_id),
            ("automatic_payment_methods[enabled]", "true"),
            ("metadata[appointment_id]", appointment_id),
        ];
        let idempotency_key = format!("intent-{}", appointment_id);

        self.post("/v1/payment_intents", &params, Some(&idempotency_key)).await
    }

    async fn refund(&self, payment_intent_id: &str) -> Result<Refund, StripeError> {
        let idempotency_key = format!("refund-{}", payment_intent_id);
        self.post("/v1/refunds", &[("payment_intent", payment_intent_id)], Some(&idempotency_key))
            .await
    }

    async fn create_subscription(&self, customer_id: &str, price_id: &str) -> Result<ProviderSubscription, StripeError> {
        let params = [
            ("customer", customer_id),
            ("items[0][price]", price_id),
            ("payment_behavior", "default_incomplete"),
            ("expand[]", "latest_invoice.payment_intent"),
        ];
        self.post("/v1/subscriptions", &params, None).await
    }

    async fn cancel_subscription_at_period_end(&self, subscription_id: &str) -> Result<ProviderSubscription, StripeError> {
        self.post(
            &format!("/v1/subscriptions/{}", subscription_id),
            &[("cancel_at_period_end", "true")],
            None,
        )
        .await
    }
}

/// Check a `Stripe-Signature` header (`t=<unix>,v1=<hex hmac>[,v1=...]`) against the raw payload.
pub fn verify_webhook_signature(payload: &[u8], header: &str, secret: &str, now: i64) -> bool {
    if secret.is_empty() {
        return false;
    }
    let mut timestamp: Option<i64> = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        return false;
    };
    if (now - timestamp).abs() > WEBHOOK_TOLERANCE_SECS {
        return false;
    }

    signatures.into_iter().any(|signature| {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    })
}

/// Produce a header value the way Stripe signs webhook deliveries.
pub fn sign_webhook_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return format!("t={}", timestamp),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}
