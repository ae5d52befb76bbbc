//! The chat core of Citeflow.
//!
//! A chat invocation follows a fixed pipeline:
//!
//! 1. **Retrieve** reference passages for the query
//! 2. **Assemble** a token-budgeted prompt (context blocks + history + question)
//! 3. **Moderate** the query and the assembled prompt
//! 4. **Generate** a streamed completion, charging each fragment to the
//!    session's budget
//! 5. **Finish** with followup suggestions, or a single error
//!
//! Progress is reported as [`StreamEvent`]s; [`ChatService`] wraps the
//! orchestrator with per-call sessions and JSON / collapsed adapters.

pub mod adapters;
pub mod context;
pub mod moderation;
pub mod orchestrator;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use adapters::{ChatService, DEFAULT_SESSION_BUDGET, SimpleAnswer};
pub use context::{Mode, PromptAssembler, PromptBudget, PromptStats, TokenCounter, TokenizerError};
pub use moderation::ModerationGate;
pub use orchestrator::{ChatOrchestrator, ChatRequest, ChatSettings};
pub use stream_event::{LoadingPhase, StreamEvent};
