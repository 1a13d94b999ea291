//! Anthropic Messages API client
//!
//! Blocking completions only. Transient failures are retried with
//! exponential backoff; a 429 is handed straight back to the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Completion, CompletionRequest, LlmClient, LlmError};
use crate::config::LlmConfig;

const API_VERSION: &str = "2023-06-01";
const MAX_ATTEMPTS: u32 = 4;
const BASE_BACKOFF: Duration = Duration::from_millis(1000);
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

pub struct AnthropicClient {
    model: String,
    api_key: String,
    endpoint: String,
    max_tokens: u32,
    http: Client,
}

impl AnthropicClient {
    /// Reads the key from the environment variable named in config
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        debug!(model = %config.model, base_url = %config.base_url, "AnthropicClient::from_config: called");
        let api_key = config
            .get_api_key()
            .map_err(|_| LlmError::MissingApiKey(config.api_key_env.clone()))?;
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            endpoint: format!("{}/v1/messages", config.base_url.trim_end_matches('/')),
            max_tokens: config.max_tokens,
            http,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn body<'a>(&'a self, request: &'a CompletionRequest) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens.min(self.max_tokens),
            system: &request.system,
            messages: [Turn {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
        }
    }

    async fn send_once(&self, body: &MessagesRequest<'_>) -> Result<Completion, LlmError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let wait = retry_after(response.headers()).unwrap_or(DEFAULT_RATE_LIMIT_WAIT);
            return Err(LlmError::RateLimited(wait));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        let reply: MessagesReply = serde_json::from_slice(&bytes)?;
        reply.into_completion()
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        debug!(model = %self.model, max_tokens = %request.max_tokens, "AnthropicClient::complete: called");
        let body = self.body(&request);
        let mut attempt = 0;
        loop {
            match self.send_once(&body).await {
                Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    let backoff = BASE_BACKOFF * 2u32.pow(attempt);
                    warn!(attempt, ?backoff, error = %e, "AnthropicClient::complete: retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [Turn<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct Turn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    content: Vec<ReplyBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplyBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl MessagesReply {
    fn into_completion(self) -> Result<Completion, LlmError> {
        let text: String = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                ReplyBlock::Text { text } => Some(text),
                ReplyBlock::Other => None,
            })
            .collect();
        if text.is_empty() {
            return Err(LlmError::EmptyReply);
        }
        Ok(Completion {
            text,
            truncated: self.stop_reason.as_deref() == Some("max_tokens"),
        })
    }
}
