//! Outbound email capability.
//!
//! Transport is pluggable behind [`Mailer`]. Message data may carry token
//! plaintexts, so only the recipient and template name are ever logged.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

/// Attempts made by [`deliver_with_retry`] before giving up.
pub const MAX_ATTEMPTS: u32 = 3;

/// Pause between delivery attempts.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    /// Sent after registration, carries the activation token.
    UserWelcome,
    /// Sent when a user asks for a fresh activation token.
    TokenActivation,
}

impl Template {
    pub fn name(&self) -> &'static str {
        match self {
            Template::UserWelcome => "user_welcome",
            Template::TokenActivation => "token_activation",
        }
    }
}

/// One email to send.
#[derive(Clone)]
pub struct Message {
    pub recipient: String,
    pub template: Template,
    pub data: Value,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("recipient", &self.recipient)
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("delivery attempt exceeded its {0:?} deadline")]
    Timeout(Duration),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, message: &Message) -> Result<(), MailError>;
}

/// Deliver `message`, retrying up to [`MAX_ATTEMPTS`] times. Each attempt is
/// bounded by `timeout`.
pub async fn deliver_with_retry(
    mailer: &dyn Mailer,
    message: &Message,
    timeout: Duration,
) -> Result<(), MailError> {
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(timeout, mailer.deliver(message)).await {
            Ok(result) => result,
            Err(_) => Err(MailError::Timeout(timeout)),
        };

        match result {
            Ok(()) => return Ok(()),
            Err(e) if attempt < MAX_ATTEMPTS => {
                warn!(
                    recipient = %message.recipient,
                    template = message.template.name(),
                    attempt,
                    "email delivery failed, retrying: {e}"
                );
                attempt += 1;
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Mailer that only logs. Used when no SMTP transport is configured.
#[derive(Debug, Clone, Default)]
pub struct LogMailer {
    sender: String,
}

impl LogMailer {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn deliver(&self, message: &Message) -> Result<(), MailError> {
        info!(
            sender = %self.sender,
            recipient = %message.recipient,
            template = message.template.name(),
            "email sent"
        );
        Ok(())
    }
}
