//! LLM errors

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no API key in ${0}")]
    MissingApiKey(String),

    #[error("unsupported LLM provider '{0}' (supported: anthropic)")]
    UnknownProvider(String),

    #[error("provider rate limit hit, retry in {0:?}")]
    RateLimited(Duration),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("undecodable provider reply: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("provider reply contained no text")]
    EmptyReply,
}

impl LlmError {
    /// Worth sending the same request again after a pause
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => matches!(status, 408 | 500 | 502 | 503 | 504 | 529),
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> LlmError {
        LlmError::Status {
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn test_transient_statuses() {
        assert!(status(503).is_transient());
        assert!(status(529).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(401).is_transient());
    }

    #[test]
    fn test_rate_limit_is_not_retried_in_place() {
        assert!(!LlmError::RateLimited(Duration::from_secs(30)).is_transient());
        assert!(!LlmError::EmptyReply.is_transient());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            LlmError::MissingApiKey("ANTHROPIC_API_KEY".to_string()).to_string(),
            "no API key in $ANTHROPIC_API_KEY"
        );
        assert_eq!(status(502).to_string(), "provider returned HTTP 502: ");
    }
}
