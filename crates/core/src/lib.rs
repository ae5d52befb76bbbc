//! # Citeflow Core
//!
//! Domain types, collaborator traits, and error definitions for the
//! Citeflow retrieval-augmented chat core. This crate has no framework
//! dependencies; it defines the model the other crates implement against.
//!
//! Every external capability (retrieval, moderation, completion, followup
//! suggestions, operational logging) is a trait here, so implementations
//! can be swapped by configuration and replaced by stubs in tests.

pub mod error;
pub mod followup;
pub mod log;
pub mod message;
pub mod moderation;
pub mod provider;
pub mod retrieval;

// Re-export key types at crate root for ergonomics
pub use error::{ChatError, FollowupError, ProviderError, Result, RetrievalError};
pub use followup::{Followup, FollowupEngine, NoFollowups};
pub use log::{LogSink, MemoryLogSink, TracingLogSink};
pub use message::{HistoryEntry, Message, Role};
pub use moderation::{ModerationResult, Moderator};
pub use provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
pub use retrieval::{Citation, MAX_CITATIONS, ReferenceBlock, Retriever, citation_label};
