//! Chat lifecycle events.
//!
//! A [`StreamEvent`] is emitted for each stage of a chat invocation and
//! serializes to the flat object callers consume:
//!
//! - `{"state":"loading","phase":"semantic","citations":[...]}`
//! - `{"state":"loading","phase":"prompt"}` / `{"state":"loading","phase":"llm"}`
//! - `{"state":"streaming","content":"..."}`
//! - `{"state":"done","followup_0":{...},"followup_1":{...}}`
//! - `{"state":"error","error":"..."}`

use citeflow_core::followup::Followup;
use citeflow_core::retrieval::Citation;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Pre-generation stage reported by a `loading` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingPhase {
    /// Reference passages retrieved
    Semantic,
    /// Prompt assembled
    Prompt,
    /// Completion requested
    Llm,
}

impl LoadingPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Prompt => "prompt",
            Self::Llm => "llm",
        }
    }
}

/// Events emitted during a chat invocation.
///
/// Order is always: `loading*`, `streaming*`, then exactly one of `done`
/// or `error`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Loading {
        phase: LoadingPhase,
        citations: Option<Vec<Citation>>,
    },

    /// A fragment of the answer.
    Streaming { content: String },

    /// The answer is complete.
    Done { followups: Vec<Followup> },

    /// The invocation failed.
    Error { message: String },
}

impl StreamEvent {
    pub fn loading(phase: LoadingPhase) -> Self {
        Self::Loading {
            phase,
            citations: None,
        }
    }

    /// Value of the `state` field.
    pub fn state(&self) -> &'static str {
        match self {
            Self::Loading { .. } => "loading",
            Self::Streaming { .. } => "streaming",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this event ends the sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

impl Serialize for StreamEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("state", self.state())?;

        match self {
            Self::Loading { phase, citations } => {
                map.serialize_entry("phase", phase)?;
                if let Some(citations) = citations {
                    map.serialize_entry("citations", citations)?;
                }
            }
            Self::Streaming { content } => {
                map.serialize_entry("content", content)?;
            }
            Self::Done { followups } => {
                for (i, followup) in followups.iter().enumerate() {
                    map.serialize_entry(&format!("followup_{i}"), followup)?;
                }
            }
            Self::Error { message } => {
                map.serialize_entry("error", message)?;
            }
        }

        map.end()
    }
}
