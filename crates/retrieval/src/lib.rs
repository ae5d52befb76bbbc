//! Passage retrieval backends for Citeflow.
//!
//! The built-in backend is an in-memory corpus ranked by keyword overlap.
//! Semantic search services plug in through `citeflow_core::Retriever`.

pub mod corpus;

pub use corpus::CorpusRetriever;
