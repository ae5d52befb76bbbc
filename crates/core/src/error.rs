//! Error types for the Citeflow domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each external collaborator has its own error type; all of them fold
//! into [`ChatError`], which is what a chat invocation surfaces.

use thiserror::Error;

/// The top-level error for a single chat invocation.
///
/// Every variant's display text is what the caller sees in the terminal
/// `error` event, so messages are written for end users.
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error("Failed to retrieve reference passages: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("This conversation was rejected by the moderation filter. Sorry.")]
    ModerationRejected,

    #[error("Moderation check failed: {0}")]
    ModerationUnavailable(String),

    #[error("Exceeded the maximum budget for this session")]
    BudgetExceeded,

    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    #[error("Completion service error: {0}")]
    Completion(#[from] ProviderError),

    #[error("Followup lookup failed: {0}")]
    FollowupLookup(#[from] FollowupError),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, ChatError>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Prompt leaves no room for a completion: {0}")]
    ContextOverflow(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Corpus could not be loaded: {0}")]
    Load(String),
}

#[derive(Debug, Clone, Error)]
pub enum FollowupError {
    #[error("Followup service unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed followup response: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = ChatError::Completion(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn moderation_rejection_mentions_moderation() {
        let msg = ChatError::ModerationRejected.to_string();
        assert!(msg.contains("moderation"));
    }

    #[test]
    fn budget_message_is_stable() {
        assert!(
            ChatError::BudgetExceeded
                .to_string()
                .starts_with("Exceeded the maximum budget")
        );
    }

    #[test]
    fn retrieval_error_converts() {
        let err: ChatError = RetrievalError::QueryFailed("index offline".into()).into();
        assert!(matches!(err, ChatError::Retrieval(_)));
        assert!(err.to_string().contains("index offline"));
    }

    #[test]
    fn timeout_names_operation() {
        let err = ChatError::Timeout {
            operation: "Moderation",
            secs: 30,
        };
        assert_eq!(err.to_string(), "Moderation timed out after 30s");
    }
}
