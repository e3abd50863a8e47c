use async_trait::async_trait;
use reqwest::Client;
use std::env;
use std::time::Duration;

use super::{ChannelError, NotificationChannel, OutboundMessage, Recipient};
use crate::models::DeliveryChannel;

const DEFAULT_TWILIO_API_BASE: &str = "https://api.twilio.com";

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub whatsapp_from: Option<String>,
    pub api_base: String,
}

impl TwilioConfig {
    /// `None` unless account SID, auth token and sender number are all set.
    pub fn from_env() -> Option<Self> {
        let account_sid = env::var("TWILIO_ACCOUNT_SID").ok().filter(|s| !s.is_empty())?;
        let auth_token = env::var("TWILIO_AUTH_TOKEN").ok().filter(|s| !s.is_empty())?;
        let from_number = env::var("TWILIO_FROM_NUMBER").ok().filter(|s| !s.is_empty())?;

        Some(Self {
            account_sid,
            auth_token,
            from_number,
            whatsapp_from: env::var("TWILIO_WHATSAPP_FROM").ok().filter(|s| !s.is_empty()),
            api_base: env::var("TWILIO_API_BASE").unwrap_or_else(|_| DEFAULT_TWILIO_API_BASE.to_string()),
        })
    }
}

/// SMS or WhatsApp delivery through the Twilio Messages API.
pub struct TwilioChannel {
    client: Client,
    config: TwilioConfig,
    channel: DeliveryChannel,
}

impl TwilioChannel {
    pub fn sms(config: TwilioConfig) -> anyhow::Result<Self> {
        Self::new(config, DeliveryChannel::Sms)
    }

    pub fn whatsapp(config: TwilioConfig) -> anyhow::Result<Self> {
        Self::new(config, DeliveryChannel::WhatsApp)
    }

    fn new(config: TwilioConfig, channel: DeliveryChannel) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self { client, config, channel })
    }

    fn addresses(&self, phone: &str) -> Result<(String, String), ChannelError> {
        match self.channel {
            DeliveryChannel::WhatsApp => {
                let from = self
                    .config
                    .whatsapp_from
                    .as_deref()
                    .ok_or(ChannelError::MissingAddress("WhatsApp sender"))?;
                Ok((whatsapp_address(from), whatsapp_address(phone)))
            }
            _ => Ok((self.config.from_number.clone(), phone.to_string())),
        }
    }
}

fn whatsapp_address(number: &str) -> String {
    if number.starts_with("whatsapp:") {
        number.to_string()
    } else {
        format!("whatsapp:{}", number)
    }
}

#[async_trait]
impl NotificationChannel for TwilioChannel {
    fn channel(&self) -> DeliveryChannel {
        self.channel
    }

    async fn send(&self, recipient: &Recipient, message: &OutboundMessage) -> Result<(), ChannelError> {
        let phone = recipient
            .phone
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(ChannelError::MissingAddress("phone"))?;
        let (from, to) = self.addresses(phone)?;
        let body = format!("{}: {}", message.title, message.body);

        let response = self
            .client
            .post(format!(
                "{}/2010-04-01/Accounts/{}/Messages.json",
                self.config.api_base.trim_end_matches('/'),
                self.config.account_sid
            ))
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[("From", from.as_str()), ("To", to.as_str()), ("Body", body.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Provider { status, body });
        }

        tracing::debug!("Sent {} to user {}", self.channel.as_str(), recipient.user_id);
        Ok(())
    }
}
