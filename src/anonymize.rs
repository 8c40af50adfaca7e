//! Rewording of free-text comments so they cannot identify their author.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{Config, OpenRouterConfig};

const REQUEST_TIMEOUT_SECS: u64 = 30;
const TEMPERATURE: f64 = 0.7;
const MAX_TOKENS: u32 = 500;
const SYSTEM_PROMPT: &str = "You are an expert at rephrasing text. Rephrase the comment keeping \
    the same meaning but removing anything that could identify its author. The tone must stay \
    professional and constructive. Reply with the rephrased comment only.";

#[derive(Debug, Error)]
pub enum AnonymizeError {
    /// No anonymization service is configured.
    #[error("anonymizer disabled")]
    Disabled,

    #[error("network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait Anonymizer: Send + Sync {
    async fn anonymize(&self, text: &str) -> Result<String, AnonymizeError>;
}

pub struct PassthroughAnonymizer;

#[async_trait]
impl Anonymizer for PassthroughAnonymizer {
    async fn anonymize(&self, _text: &str) -> Result<String, AnonymizeError> {
        Err(AnonymizeError::Disabled)
    }
}

/// Chat-completions client for OpenRouter.
pub struct OpenRouterAnonymizer {
    client: reqwest::Client,
    config: OpenRouterConfig,
    referer: String,
}

impl OpenRouterAnonymizer {
    pub fn new(config: OpenRouterConfig, app_url: &str) -> Result<Self, AnonymizeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AnonymizeError::Network(e.to_string()))?;
        Ok(Self { client, config, referer: app_url.to_string() })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl Anonymizer for OpenRouterAnonymizer {
    async fn anonymize(&self, text: &str) -> Result<String, AnonymizeError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: text },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", "Course Evaluation")
            .json(&body)
            .send()
            .await
            .map_err(|e| AnonymizeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AnonymizeError::Api { status: status.as_u16(), message });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AnonymizeError::Malformed(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AnonymizeError::Malformed("no choices".to_string()))
    }
}

pub fn create_anonymizer(config: &Config) -> Result<Arc<dyn Anonymizer>, AnonymizeError> {
    match &config.openrouter {
        Some(openrouter) => Ok(Arc::new(OpenRouterAnonymizer::new(
            openrouter.clone(),
            &config.app_url,
        )?)),
        None => Ok(Arc::new(PassthroughAnonymizer)),
    }
}

/// Anonymized text, or the original when the service is off or failing.
/// The flag tells whether the text was actually rewritten.
pub async fn anonymize_or_keep(anonymizer: &dyn Anonymizer, text: &str) -> (String, bool) {
    match anonymizer.anonymize(text).await {
        Ok(rewritten) => (rewritten, true),
        Err(AnonymizeError::Disabled) => (text.to_string(), false),
        Err(e) => {
            tracing::warn!("Comment anonymization failed, keeping original: {}", e);
            (text.to_string(), false)
        }
    }
}
