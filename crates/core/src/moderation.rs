//! The moderation classifier collaborator.

use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Classifier verdict for one input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModerationResult {
    pub flagged: bool,

    /// Backend-specific category breakdown, kept verbatim for diagnostics.
    #[serde(default)]
    pub categories: serde_json::Value,

    #[serde(default)]
    pub category_scores: serde_json::Value,
}

impl ModerationResult {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn flagged() -> Self {
        Self {
            flagged: true,
            ..Self::default()
        }
    }
}

/// A content classifier. Results align positionally with `inputs`.
#[async_trait]
pub trait Moderator: Send + Sync {
    fn name(&self) -> &str;

    async fn moderate(&self, inputs: &[String]) -> Result<Vec<ModerationResult>, ProviderError>;
}
