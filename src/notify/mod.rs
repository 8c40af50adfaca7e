//! Invitation delivery.
//!
//! Sending is best-effort: the issuer calls `send` after the token batch has
//! committed and only logs failures.

mod smtp;

pub use smtp::SmtpSender;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid address: {0}")]
    Address(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// What a student needs to open their survey.
#[derive(Debug, Clone, PartialEq)]
pub struct Invitation {
    pub module_name: String,
    pub survey_url: String,
    pub expires_at: DateTime<Utc>,
}

impl Invitation {
    pub const SUBJECT: &'static str = "Invitation to evaluate your course";

    pub fn expiry_label(&self) -> String {
        self.expires_at.format("%d/%m/%Y %H:%M").to_string()
    }

    pub fn body(&self) -> String {
        format!(
            "Hello,\n\n\
             You are invited to evaluate the module \"{}\".\n\
             Your answers are anonymous.\n\n\
             Open your survey here: {}\n\n\
             This link can be used once and expires on {} (UTC).\n",
            self.module_name,
            self.survey_url,
            self.expiry_label()
        )
    }
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, to: &str, invitation: &Invitation) -> Result<(), NotifyError>;
}

/// Used when no SMTP host is configured.
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, to: &str, invitation: &Invitation) -> Result<(), NotifyError> {
        tracing::info!(
            to,
            module = %invitation.module_name,
            expires_at = %invitation.expiry_label(),
            "SMTP not configured, invitation not mailed"
        );
        Ok(())
    }
}

pub fn create_sender(config: &Config) -> Result<Arc<dyn NotificationSender>, NotifyError> {
    match &config.smtp {
        Some(smtp) => Ok(Arc::new(SmtpSender::new(smtp)?)),
        None => Ok(Arc::new(LogSender)),
    }
}
