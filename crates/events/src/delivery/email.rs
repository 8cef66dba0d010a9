//! Job status emails over SMTP.
//!
//! The transport is built once from [`EmailConfig`] and reused for every
//! event. Without `SMTP_HOST` there is no config and owners are not emailed.

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use trackq_core::status::MediaStatus;

use crate::bus::JobEvent;

/// Failure to build or send a status email.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Email build error: {0}")]
    Build(#[from] lettre::error::Error),
}

const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_SENDER: &str = "trackq <noreply@trackq.local>";

/// SMTP settings.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// SMTP relay host.
    pub smtp_host: String,
    /// Relay port, 587 unless `SMTP_PORT` says otherwise.
    pub smtp_port: u16,
    /// Sender mailbox, e.g. `trackq <noreply@example.org>`.
    pub sender: String,
    /// Username and password, when the relay requires them.
    pub credentials: Option<(String, String)>,
}

impl EmailConfig {
    /// Read SMTP settings from the environment.
    ///
    /// | Env Var         | Default                         |
    /// |-----------------|---------------------------------|
    /// | `SMTP_HOST`     | unset: email disabled           |
    /// | `SMTP_PORT`     | `587`                           |
    /// | `SMTP_FROM`     | `trackq <noreply@trackq.local>` |
    /// | `SMTP_USER`     | unset                           |
    /// | `SMTP_PASSWORD` | unset                           |
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary lookup.
    /// A port that does not parse falls back to the default.
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let smtp_host = lookup("SMTP_HOST").filter(|h| !h.trim().is_empty())?;
        let credentials = match (lookup("SMTP_USER"), lookup("SMTP_PASSWORD")) {
            (Some(user), Some(password)) => Some((user, password)),
            _ => None,
        };

        Some(Self {
            smtp_host,
            smtp_port: lookup("SMTP_PORT")
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            sender: lookup("SMTP_FROM").unwrap_or_else(|| DEFAULT_SENDER.to_string()),
            credentials,
        })
    }
}

/// Emails job owners about status changes.
pub struct EmailDelivery {
    sender: Mailbox,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailDelivery {
    /// Build the SMTP transport. Fails on a bad relay host or sender.
    pub fn new(config: EmailConfig) -> Result<Self, EmailError> {
        let sender = config.sender.parse()?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port);
        if let Some((user, password)) = config.credentials {
            builder = builder.credentials(Credentials::new(user, password));
        }

        Ok(Self {
            sender,
            mailer: builder.build(),
        })
    }

    /// Email the job owner about `event`.
    pub async fn deliver(&self, event: &JobEvent) -> Result<(), EmailError> {
        let message = status_message(self.sender.clone(), event)?;
        self.mailer.send(message).await?;

        tracing::info!(
            job_id = event.job_id,
            to = %event.recipient,
            status = %event.status,
            "Status email sent",
        );
        Ok(())
    }
}

fn status_message(sender: Mailbox, event: &JobEvent) -> Result<Message, EmailError> {
    let summary = match event.status {
        MediaStatus::Queued => "is waiting for a free worker",
        MediaStatus::Running => "has started processing",
        MediaStatus::Success => "finished successfully",
        MediaStatus::Failed => "failed",
    };

    let message = Message::builder()
        .from(sender)
        .to(event.recipient.parse()?)
        .subject(format!("[trackq] Job {} {}", event.job_id, event.status))
        .header(ContentType::TEXT_PLAIN)
        .body(format!(
            "Your tracking job {} {summary}.\n\nStatus: {}\nAt: {}\n",
            event.job_id,
            event.status,
            event.timestamp.to_rfc3339(),
        ))?;
    Ok(message)
}
