//! LlmClient trait

use async_trait::async_trait;

use super::{Completion, CompletionRequest, LlmError};

/// A provider that answers one prompt at a time; calls share no state
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError>;
}
