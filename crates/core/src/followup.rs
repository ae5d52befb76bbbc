//! Related-question suggestions attached to a finished answer.

use crate::error::FollowupError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A suggested related question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Followup {
    pub text: String,
    #[serde(default)]
    pub pageid: String,
    #[serde(default)]
    pub score: f32,
}

/// The followup suggestion collaborator.
#[async_trait]
pub trait FollowupEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Suggest followups for `[query, response]`.
    async fn suggest(&self, texts: &[String]) -> Result<Vec<Followup>, FollowupError>;
}

/// An engine that never suggests anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFollowups;

#[async_trait]
impl FollowupEngine for NoFollowups {
    fn name(&self) -> &str {
        "none"
    }

    async fn suggest(&self, _texts: &[String]) -> Result<Vec<Followup>, FollowupError> {
        Ok(Vec::new())
    }
}
