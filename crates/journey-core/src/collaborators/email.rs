//! Transactional email delivery over a JSON HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use super::{EmailMessage, EmailSender};
use crate::error::{JourneyError, Result};

/// Connection settings for the email API.
#[derive(Clone)]
pub struct HttpEmailConfig {
    /// Endpoint accepting a JSON POST per message
    pub api_url: String,
    pub api_key: String,
    pub from_email: String,
    pub from_name: Option<String>,
    /// Limit on one delivery request
    pub timeout: Duration,
}

impl std::fmt::Debug for HttpEmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmailConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &"[REDACTED]")
            .field("from_email", &self.from_email)
            .field("from_name", &self.from_name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct Recipient<'a> {
    email: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: Recipient<'a>,
    to: [Recipient<'a>; 1],
    subject: &'a str,
    html: &'a str,
}

/// [`EmailSender`] posting each message to a transactional email API.
#[derive(Debug)]
pub struct HttpEmailSender {
    client: Client,
    config: HttpEmailConfig,
}

impl HttpEmailSender {
    /// # Errors
    ///
    /// Returns `JourneyError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn new(config: HttpEmailConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| JourneyError::Configuration {
                message: format!("Failed to create email HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }
}

/// Pulls the message id out of the common response shapes.
fn message_id(body: &Value) -> Option<String> {
    ["id", "message_id", "messageId"]
        .iter()
        .find_map(|key| body.get(key))
        .or_else(|| body.pointer("/data/id"))
        .and_then(|id| match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<String> {
        let request = SendRequest {
            from: Recipient {
                email: &self.config.from_email,
                name: self.config.from_name.as_deref().unwrap_or_default(),
            },
            to: [Recipient {
                email: &message.to,
                name: &message.recipient_name,
            }],
            subject: &message.subject,
            html: &message.html_content,
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| JourneyError::collaborator("email", format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(JourneyError::collaborator(
                "email",
                format!("Email API returned {status}: {text}"),
            ));
        }

        let body: Value = response.json().await.map_err(|e| {
            JourneyError::collaborator("email", format!("Failed to parse response: {e}"))
        })?;

        message_id(&body).ok_or_else(|| {
            JourneyError::collaborator("email", "Email API response carried no message id")
        })
    }
}
