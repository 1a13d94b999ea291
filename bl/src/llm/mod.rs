//! Model access for the ranking oracle
//!
//! Only single-turn completions are needed, so the client surface is one
//! method. Providers are picked by name from [`LlmConfig`].

use std::sync::Arc;

use tracing::debug;

mod anthropic;
mod client;
mod error;
mod types;

pub use anthropic::AnthropicClient;
pub use client::LlmClient;
#[cfg(test)]
pub use client::mock::MockLlmClient;
pub use error::LlmError;
pub use types::{Completion, CompletionRequest};

use crate::config::LlmConfig;

/// Build the client named by `config.provider`
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    debug!(provider = %config.provider, model = %config.model, "create_client: called");
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicClient::from_config(config)?)),
        other => Err(LlmError::UnknownProvider(other.to_string())),
    }
}
