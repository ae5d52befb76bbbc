//! Moderation gate: screens the query and the assembled prompt before
//! anything is sent for completion.

use citeflow_core::error::ChatError;
use citeflow_core::log::LogSink;
use citeflow_core::moderation::Moderator;
use std::sync::Arc;
use tracing::{debug, warn};

const SEPARATOR_WIDTH: usize = 80;

/// Wraps a [`Moderator`] with the rejection protocol.
#[derive(Clone)]
pub struct ModerationGate {
    moderator: Arc<dyn Moderator>,
}

impl ModerationGate {
    pub fn new(moderator: Arc<dyn Moderator>) -> Self {
        Self { moderator }
    }

    /// Classify `[query, prompt_text]` once.
    ///
    /// A flagged result is written to `log` in full and becomes
    /// [`ChatError::ModerationRejected`]. A classifier failure is fatal too.
    pub async fn check(
        &self,
        query: &str,
        prompt_text: &str,
        log: &dyn LogSink,
    ) -> Result<(), ChatError> {
        let inputs = [query.to_string(), prompt_text.to_string()];

        let results = self
            .moderator
            .moderate(&inputs)
            .await
            .map_err(|e| ChatError::ModerationUnavailable(e.to_string()))?;

        if !results.iter().any(|r| r.flagged) {
            debug!(moderator = self.moderator.name(), "Moderation passed");
            return Ok(());
        }

        warn!(moderator = self.moderator.name(), "Moderation rejected query");

        // Most important detail first: sinks may cut long lines short
        let details = serde_json::to_string_pretty(&results).unwrap_or_default();
        log.log(&"-".repeat(SEPARATOR_WIDTH));
        log.log("MODERATION REJECTED");
        log.log(&format!("MODERATION RESPONSE:\n\n{details}"));
        log.log(&format!("REJECTED QUERY: {query}"));
        log.log(&format!("REJECTED PROMPT:\n\n{prompt_text}"));
        log.log(&"-".repeat(SEPARATOR_WIDTH));

        Err(ChatError::ModerationRejected)
    }
}
