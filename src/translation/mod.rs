//! Phonetic transliteration through an OpenAI-compatible chat completion API.

pub mod prompt;
pub mod sanitize;

use crate::config::Config;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

pub use sanitize::sanitize;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Turns a message into its transliteration in a target language.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Never fails: on any error the input text is returned unchanged.
    async fn translate(&self, text: &str, target_language: &str) -> String;
}

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("request to model API failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model API error ({status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("model response contained no text")]
    EmptyResponse,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    n: u32,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// A completion's text plus the metadata worth logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
}

pub struct TranslationService {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl TranslationService {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.llm_api_url.clone(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
        }
    }

    /// Ask the model for a transliteration and return its raw (trimmed) text.
    pub async fn request_transliteration(
        &self,
        text: &str,
        target_language: &str,
    ) -> Result<Completion, TranslationError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: prompt::system_prompt().to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt::user_prompt(text, target_language),
                },
            ],
            n: prompt::CANDIDATES,
            temperature: prompt::TEMPERATURE,
            max_tokens: prompt::MAX_TOKENS,
        };
        info!(
            "Completion params: model={}, n={}, temperature={}, max_tokens={}",
            request.model, request.n, request.temperature, request.max_tokens
        );

        self.complete(&request).await
    }

    /// One short request to confirm the API key and endpoint work.
    pub async fn check_connectivity(&self) -> Result<String, TranslationError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: "You are a helpful assistant.".to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: "Say 'API connection successful' in one short sentence.".to_string(),
                },
            ],
            n: 1,
            temperature: prompt::TEMPERATURE,
            max_tokens: 20,
        };

        Ok(self.complete(&request).await?.text)
    }

    async fn complete(&self, request: &ChatRequest) -> Result<Completion, TranslationError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read body: {}>", e));
            return Err(TranslationError::Api { status, body });
        }

        let chat_response: ChatResponse = response.json().await?;
        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or(TranslationError::EmptyResponse)?;

        let text = choice
            .message
            .content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(TranslationError::EmptyResponse)?;

        Ok(Completion {
            text,
            model: chat_response.model,
            finish_reason: choice.finish_reason,
        })
    }
}

#[async_trait]
impl Translator for TranslationService {
    async fn translate(&self, text: &str, target_language: &str) -> String {
        info!(
            "Translating sentence to {} with English pronunciation: '{}'",
            target_language, text
        );

        let completion = match self.request_transliteration(text, target_language).await {
            Ok(completion) => completion,
            Err(e) => {
                error!("Translation error: {}", e);
                return text.to_string();
            }
        };

        info!("Raw response: {}", completion.text);
        info!(
            "Response info - model: {}, finish reason: {}",
            completion.model.as_deref().unwrap_or("unknown"),
            completion.finish_reason.as_deref().unwrap_or("unknown")
        );

        let cleaned = sanitize(&completion.text);
        if cleaned != completion.text {
            info!("Cleaned result: {}", cleaned);
        }
        info!("Translation result: '{}' → '{}'", text, cleaned);
        cleaned
    }
}
