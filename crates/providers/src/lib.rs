//! Completion backends for Citeflow.
//!
//! Providers implement `citeflow_core::Provider`; the OpenAI-compatible
//! client also implements `citeflow_core::Moderator`.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
