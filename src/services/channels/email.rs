use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::env;

use super::{ChannelError, NotificationChannel, OutboundMessage, Recipient};
use crate::models::DeliveryChannel;

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

impl SmtpConfig {
    /// `None` unless `SMTP_HOST` is set.
    pub fn from_env() -> Option<Self> {
        let host = env::var("SMTP_HOST").ok().filter(|h| !h.is_empty())?;

        Some(Self {
            host,
            port: env::var("SMTP_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(587),
            username: env::var("SMTP_USERNAME").ok().filter(|u| !u.is_empty()),
            password: env::var("SMTP_PASSWORD").ok(),
            from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Fitness Scheduler <no-reply@fitness-scheduler.local>".to_string()),
        })
    }
}

/// SMTP email delivery.
pub struct EmailChannel {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailChannel {
    pub fn new(config: SmtpConfig) -> anyhow::Result<Self> {
        let from: Mailbox = config.from.parse()?;

        // Without credentials assume a local relay (mailhog and friends) that speaks plain SMTP.
        let mailer = match (config.username, config.password) {
            (Some(username), password) => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
                .port(config.port)
                .credentials(Credentials::new(username, password.unwrap_or_default()))
                .build(),
            (None, _) => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .build(),
        };

        Ok(Self { mailer, from })
    }
}

pub fn build_email(from: &Mailbox, recipient: &Recipient, message: &OutboundMessage) -> Result<Message, ChannelError> {
    let to = Mailbox::new(
        Some(recipient.full_name.clone()),
        recipient
            .email
            .parse()
            .map_err(|_| ChannelError::InvalidAddress(recipient.email.clone()))?,
    );

    let body = format!(
        "Hi {},\n\n{}\n\n-- \nFitness Scheduler\nManage notification preferences in your account settings.",
        recipient.full_name, message.body
    );

    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(message.title.clone())
        .header(ContentType::TEXT_PLAIN)
        .body(body)
        .map_err(|e| ChannelError::Email(e.to_string()))
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::Email
    }

    async fn send(&self, recipient: &Recipient, message: &OutboundMessage) -> Result<(), ChannelError> {
        let email = build_email(&self.from, recipient, message)?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| ChannelError::Email(e.to_string()))?;

        tracing::debug!("Sent email '{}' to user {}", message.title, recipient.user_id);
        Ok(())
    }
}
