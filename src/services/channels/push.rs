use async_trait::async_trait;
use std::env;
use web_push::{
    ContentEncoding, HyperWebPushClient, SubscriptionInfo, VapidSignatureBuilder, WebPushClient,
    WebPushMessageBuilder,
};

use super::{ChannelError, NotificationChannel, OutboundMessage, Recipient};
use crate::models::DeliveryChannel;

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub vapid_private_key_pem: String,
    pub subject: String,
}

impl PushConfig {
    /// `None` unless `VAPID_PRIVATE_KEY_PEM` is set.
    pub fn from_env() -> Option<Self> {
        let vapid_private_key_pem = env::var("VAPID_PRIVATE_KEY_PEM").ok().filter(|k| !k.is_empty())?;

        Some(Self {
            // Env files usually carry the PEM on one line with literal \n.
            vapid_private_key_pem: vapid_private_key_pem.replace("\\n", "\n"),
            subject: env::var("VAPID_SUBJECT")
                .unwrap_or_else(|_| "mailto:admin@fitness-scheduler.local".to_string()),
        })
    }
}

/// Browser web push with VAPID signatures.
pub struct PushChannel {
    client: HyperWebPushClient,
    config: PushConfig,
}

impl PushChannel {
    pub fn new(config: PushConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: HyperWebPushClient::new(),
            config,
        })
    }

    async fn send_one(&self, subscription: &SubscriptionInfo, payload: &[u8]) -> Result<(), ChannelError> {
        let mut signature = VapidSignatureBuilder::from_pem(self.config.vapid_private_key_pem.as_bytes(), subscription)
            .map_err(|e| ChannelError::Push(e.to_string()))?;
        signature.add_claim("sub", self.config.subject.as_str());
        let signature = signature.build().map_err(|e| ChannelError::Push(e.to_string()))?;

        let mut builder = WebPushMessageBuilder::new(subscription);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload);
        builder.set_vapid_signature(signature);
        let message = builder.build().map_err(|e| ChannelError::Push(e.to_string()))?;

        self.client
            .send(message)
            .await
            .map_err(|e| ChannelError::Push(e.to_string()))
    }
}

pub fn push_payload(message: &OutboundMessage) -> Vec<u8> {
    serde_json::json!({
        "title": message.title,
        "body": message.body,
        "kind": message.kind.as_str(),
    })
    .to_string()
    .into_bytes()
}

#[async_trait]
impl NotificationChannel for PushChannel {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::Push
    }

    /// Succeeds when at least one of the user's devices accepted the message.
    async fn send(&self, recipient: &Recipient, message: &OutboundMessage) -> Result<(), ChannelError> {
        let payload = push_payload(message);
        let mut errors = Vec::new();
        let mut delivered = 0;

        for sub in &recipient.push_subscriptions {
            let info = SubscriptionInfo::new(&sub.endpoint, &sub.p256dh, &sub.auth);
            match self.send_one(&info, &payload).await {
                Ok(()) => delivered += 1,
                Err(e) => errors.push(e.to_string()),
            }
        }

        if delivered == 0 && !errors.is_empty() {
            return Err(ChannelError::Push(errors.join("; ")));
        }
        Ok(())
    }
}
