// Outbound delivery channels for queued notifications

pub mod email;
pub mod push;
pub mod twilio;

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{DeliveryChannel, NotificationKind, NotificationPreferences, PushSubscription};

pub use email::{EmailChannel, SmtpConfig};
pub use push::{PushChannel, PushConfig};
pub use twilio::{TwilioChannel, TwilioConfig};

/// Everything a channel needs to reach one user.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub preferences: NotificationPreferences,
    pub push_subscriptions: Vec<PushSubscription>,
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Recipient has no {0} address")]
    MissingAddress(&'static str),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Email delivery failed: {0}")]
    Email(String),
    #[error("Provider responded with {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Push delivery failed: {0}")]
    Push(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn channel(&self) -> DeliveryChannel;

    async fn send(&self, recipient: &Recipient, message: &OutboundMessage) -> Result<(), ChannelError>;
}

/// Result of one channel attempt, as written to `notification_log`.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    pub channel: DeliveryChannel,
    pub error: Option<String>,
}

impl DeliveryAttempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// A notification counts as delivered when any channel worked or none applied.
pub fn delivery_succeeded(attempts: &[DeliveryAttempt]) -> bool {
    attempts.is_empty() || attempts.iter().any(DeliveryAttempt::succeeded)
}

/// Channels a recipient should be reached on, ignoring which integrations are configured.
pub fn channels_for(recipient: &Recipient, kind: NotificationKind) -> Vec<DeliveryChannel> {
    let prefs = &recipient.preferences;
    let has_phone = recipient.phone.as_deref().is_some_and(|p| !p.is_empty());
    let mut channels = Vec::new();

    if prefs.email || kind.is_transactional() {
        channels.push(DeliveryChannel::Email);
    }
    // Account mail stays on email only.
    if kind.is_transactional() {
        return channels;
    }
    if prefs.sms && has_phone {
        channels.push(DeliveryChannel::Sms);
    }
    if prefs.whatsapp && has_phone {
        channels.push(DeliveryChannel::WhatsApp);
    }
    if prefs.push && !recipient.push_subscriptions.is_empty() {
        channels.push(DeliveryChannel::Push);
    }
    channels
}

/// Fans one message out to the configured channels a recipient opted into.
#[derive(Clone, Default)]
pub struct ChannelDispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl std::fmt::Debug for ChannelDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.channels.iter().map(|c| c.channel().as_str()).collect();
        f.debug_struct("ChannelDispatcher").field("channels", &names).finish()
    }
}

impl ChannelDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Build the dispatcher from whichever integrations are configured.
    pub fn from_config(
        smtp: Option<&SmtpConfig>,
        twilio: Option<&TwilioConfig>,
        push: Option<&PushConfig>,
    ) -> anyhow::Result<Self> {
        let mut dispatcher = Self::new();

        if let Some(smtp) = smtp {
            dispatcher = dispatcher.with_channel(Arc::new(EmailChannel::new(smtp.clone())?));
        }
        if let Some(twilio) = twilio {
            dispatcher = dispatcher.with_channel(Arc::new(TwilioChannel::sms(twilio.clone())?));
            if twilio.whatsapp_from.is_some() {
                dispatcher = dispatcher.with_channel(Arc::new(TwilioChannel::whatsapp(twilio.clone())?));
            }
        }
        if let Some(push) = push {
            dispatcher = dispatcher.with_channel(Arc::new(PushChannel::new(push.clone())?));
        }

        Ok(dispatcher)
    }

    pub fn is_configured(&self, channel: DeliveryChannel) -> bool {
        self.channels.iter().any(|c| c.channel() == channel)
    }

    /// Attempt every applicable channel. A failing channel never stops the others.
    pub async fn deliver(&self, recipient: &Recipient, message: &OutboundMessage) -> Vec<DeliveryAttempt> {
        let wanted = channels_for(recipient, message.kind);
        let mut attempts = Vec::with_capacity(wanted.len());

        for channel in self.channels.iter().filter(|c| wanted.contains(&c.channel())) {
            let error = match channel.send(recipient, message).await {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!(
                        "{} delivery to user {} failed: {}",
                        channel.channel().as_str(),
                        recipient.user_id,
                        e
                    );
                    Some(e.to_string())
                }
            };
            attempts.push(DeliveryAttempt {
                channel: channel.channel(),
                error,
            });
        }

        attempts
    }
}
