//! Transactional email provider client.
//!
//! Delivery goes through the provider's JSON API over HTTPS. The client is
//! deliberately thin: one request per email, inline images attached as
//! base64 PNGs, a per-call timeout, and provider-level errors mapped to
//! [`MailerError::Provider`].

use super::{MailerError, OutboundEmail, Result};
use async_trait::async_trait;
use base64::Engine;
use serde_json::json;
use std::time::Duration;

/// Low-level delivery seam under the mail queue.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver one rendered email.
    async fn deliver(&self, email: &OutboundEmail) -> Result<()>;
}

/// Provider API settings.
#[derive(Clone, Debug)]
pub struct EmailProviderConfig {
    /// Messages endpoint, e.g. `https://mandrillapp.com/api/1.0/messages/send.json`.
    pub api_url: String,
    /// API key.
    pub api_key: String,
    /// Sender address.
    pub from_email: String,
    /// Sender display name.
    pub from_name: String,
    /// Per-call timeout in seconds.
    pub send_timeout: u64,
}

/// HTTP client for a Mandrill-compatible transactional API.
#[derive(Clone, Debug)]
pub struct HttpEmailSender {
    client: reqwest::Client,
    config: EmailProviderConfig,
}

impl HttpEmailSender {
    /// Build a client with the configured per-call timeout.
    ///
    /// # Errors
    ///
    /// Returns [`MailerError::Provider`] when the HTTP client cannot be
    /// constructed.
    pub fn new(config: EmailProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.send_timeout))
            .build()
            .map_err(|e| MailerError::Provider(e.to_string()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn deliver(&self, email: &OutboundEmail) -> Result<()> {
        let images: Vec<serde_json::Value> = email
            .images
            .iter()
            .map(|img| {
                json!({
                    "type": "image/png",
                    "name": img.cid,
                    "content": base64::engine::general_purpose::STANDARD.encode(&img.png),
                })
            })
            .collect();

        let payload = json!({
            "key": self.config.api_key,
            "message": {
                "html": email.html,
                "subject": email.subject,
                "from_email": self.config.from_email,
                "from_name": self.config.from_name,
                "to": [{ "email": email.to }],
                "images": images,
            }
        });

        let response = self
            .client
            .post(&self.config.api_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MailerError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailerError::Provider(format!(
                "provider returned {status}: {body}"
            )));
        }

        // The API answers 200 with a per-recipient status array; rejected
        // recipients surface there rather than in the HTTP status.
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MailerError::Provider(e.to_string()))?;
        if let Some(first) = body.as_array().and_then(|a| a.first()) {
            let recipient_status = first.get("status").and_then(|s| s.as_str()).unwrap_or("");
            if matches!(recipient_status, "rejected" | "invalid") {
                let reason = first
                    .get("reject_reason")
                    .and_then(|r| r.as_str())
                    .unwrap_or("unknown");
                return Err(MailerError::Provider(format!(
                    "recipient {recipient_status}: {reason}"
                )));
            }
        }

        tracing::debug!(to = %email.to, subject = %email.subject, "email delivered");
        Ok(())
    }
}
