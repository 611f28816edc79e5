//! External services the engine calls while running steps.
//!
//! Email delivery and AI completion sit behind the [`EmailSender`] and
//! [`CompletionProvider`] traits. Shipped implementations talk HTTP; the
//! disabled variants are used when nothing is configured and fail every call.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{JourneyError, Result};

pub mod email;
pub mod openai;

pub use email::{HttpEmailConfig, HttpEmailSender};
pub use openai::{OpenAiCompletion, OpenAiConfig};

/// Default limit on one collaborator HTTP request. Kept well below the
/// default enrollment lease.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A rendered email ready for delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html_content: String,
    pub recipient_name: String,
}

/// Delivers rendered emails and returns the provider's message id.
#[async_trait]
pub trait EmailSender: Send + Sync + std::fmt::Debug {
    async fn send(&self, message: &EmailMessage) -> Result<String>;
}

/// Role of a chat message sent to a completion provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Answers a chat conversation with a single text reply.
#[async_trait]
pub trait CompletionProvider: Send + Sync + std::fmt::Debug {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Email sender used when no email API is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledEmailSender;

#[async_trait]
impl EmailSender for DisabledEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<String> {
        Err(JourneyError::collaborator(
            "email",
            format!(
                "No email service configured, cannot send '{}' to {}",
                message.subject, message.to
            ),
        ))
    }
}

/// Completion provider used when no AI service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCompletion;

#[async_trait]
impl CompletionProvider for DisabledCompletion {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        Err(JourneyError::collaborator(
            "completion",
            "No completion provider configured",
        ))
    }
}
