//! Email delivery for health reports.
//!
//! Two senders ship with the crate: [`OutboxEmailSender`] drops each
//! message as JSON into the object store, and [`HttpEmailSender`] posts it
//! to a mail relay. Delivery goes through [`send_with_retry`].

use crate::error::EmailError;
use crate::storage::ObjectStore;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A rendered report ready to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// Email delivery capability.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError>;
}

/// Exponential backoff settings for email delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (zero-based): `base * 2^attempt`.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Send with retries. Returns whether the message was delivered.
///
/// Waits `base, 2·base, …` between attempts; no wait after the last one.
pub async fn send_with_retry(
    sender: &dyn EmailSender,
    message: &EmailMessage,
    policy: RetryPolicy,
) -> bool {
    let message = match addressed(message) {
        Ok(message) => message,
        Err(e) => {
            error!(error = %e, "email_not_configured");
            return false;
        }
    };

    for attempt in 0..policy.attempts {
        match sender.send(&message).await {
            Ok(()) => {
                info!(
                    subject = %message.subject,
                    recipients = message.recipients.len(),
                    "email_sent"
                );
                return true;
            }
            Err(e) => {
                warn!(attempt = attempt + 1, error = %e, "email_failed");
                if attempt + 1 < policy.attempts {
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                }
            }
        }
    }

    error!(attempts = policy.attempts, "email_delivery_gave_up");
    false
}

/// Trim recipients and drop blanks; a sender and one recipient are required.
fn addressed(message: &EmailMessage) -> Result<EmailMessage, EmailError> {
    let recipients: Vec<String> = message
        .recipients
        .iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();

    if message.sender.trim().is_empty() {
        return Err(EmailError::NotConfigured("no sender address".to_string()));
    }
    if recipients.is_empty() {
        return Err(EmailError::NotConfigured("no recipients".to_string()));
    }

    Ok(EmailMessage {
        recipients,
        ..message.clone()
    })
}

/// Writes messages into the object store for later pickup.
pub struct OutboxEmailSender {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
}

impl OutboxEmailSender {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl EmailSender for OutboxEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let id = Uuid::new_v4().simple().to_string();
        let key = format!(
            "{}{}_{}.json",
            self.prefix,
            Utc::now().format("%Y%m%dT%H%M%SZ"),
            &id[..8]
        );
        let body = serde_json::to_vec_pretty(message)
            .map_err(|e| EmailError::Transport(e.to_string()))?;
        self.store
            .put(&self.bucket, &key, &body, "application/json")
            .await?;
        info!("Report written to outbox: {}/{}", self.bucket, key);
        Ok(())
    }
}

/// Posts messages as JSON to an HTTP mail relay.
pub struct HttpEmailSender {
    relay_url: String,
    http_client: reqwest::Client,
}

impl HttpEmailSender {
    pub fn new(relay_url: impl Into<String>, timeout_seconds: u64) -> Result<Self, EmailError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| EmailError::Transport(e.to_string()))?;

        Ok(Self {
            relay_url: relay_url.into(),
            http_client,
        })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let response = self
            .http_client
            .post(&self.relay_url)
            .json(message)
            .send()
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EmailError::Relay { status, body });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{FlakyEmailSender, MemoryObjectStore};

    fn message() -> EmailMessage {
        EmailMessage {
            sender: "reports@example.com".to_string(),
            recipients: vec![" ops@example.com ".to_string(), "".to_string()],
            subject: "Health Data Analysis Report".to_string(),
            text_body: "body".to_string(),
            html_body: "<pre>body</pre>".to_string(),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(8000));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let sender = FlakyEmailSender::failing(2);
        assert!(send_with_retry(&sender, &message(), fast_policy()).await);
        assert_eq!(sender.attempts(), 3);

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["ops@example.com"]);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let sender = FlakyEmailSender::failing(usize::MAX);
        assert!(!send_with_retry(&sender, &message(), fast_policy()).await);
        assert_eq!(sender.attempts(), 3);
    }

    #[tokio::test]
    async fn test_unconfigured_is_not_attempted() {
        let sender = FlakyEmailSender::failing(0);
        let mut msg = message();
        msg.recipients = vec![" ".to_string()];
        assert!(!send_with_retry(&sender, &msg, fast_policy()).await);
        assert_eq!(sender.attempts(), 0);
    }

    #[tokio::test]
    async fn test_outbox_sender_writes_json() {
        let store = Arc::new(MemoryObjectStore::new());
        let outbox = OutboxEmailSender::new(store.clone(), "health", "outbox/");
        outbox.send(&message()).await.unwrap();

        let keys = store.list("health", "outbox/").await.unwrap();
        assert_eq!(keys.len(), 1);
        let stored: EmailMessage =
            serde_json::from_slice(&store.get("health", &keys[0]).await.unwrap()).unwrap();
        assert_eq!(stored.subject, "Health Data Analysis Report");
    }
}
