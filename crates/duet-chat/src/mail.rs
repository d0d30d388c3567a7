//! Seam to the external email-delivery service.

use async_trait::async_trait;
use lettre::message::{Mailbox, Message, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::Arc;
use tracing::warn;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// Empty host disables delivery (no-op mode).
    pub host: String,
    pub port: u16,
    pub starttls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

/// SMTP transport wrapper. With no host configured it operates in no-op
/// mode so development setups run without mail infrastructure.
pub struct SmtpMailer {
    transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| anyhow::anyhow!("invalid SMTP_FROM address: {}", e))?;

        let transport = if config.host.trim().is_empty() {
            warn!("SMTP host not configured; notification email disabled");
            None
        } else {
            let builder = if config.starttls {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
            }
            .port(config.port);

            let builder = if let (Some(username), Some(password)) =
                (&config.username, &config.password)
            {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            } else {
                builder
            };

            Some(Arc::new(builder.build()))
        };

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let Some(transport) = &self.transport else {
            return Ok(());
        };

        let email = Message::builder()
            .from(self.from.clone())
            .to(to.parse::<Mailbox>()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;

        transport.send(email).await?;
        Ok(())
    }
}
