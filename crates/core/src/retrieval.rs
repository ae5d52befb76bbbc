//! Reference blocks and the retrieval collaborator.
//!
//! A [`Retriever`] returns the passages a prompt is grounded on, ordered
//! by descending relevance. Block order is load-bearing: the n-th block is
//! cited as the n-th letter of the alphabet.

use crate::error::RetrievalError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Highest number of blocks that can carry a citation letter (`a`..=`z`).
pub const MAX_CITATIONS: usize = 26;

/// Citation letter for the block at `index`, or `None` past `z`.
pub fn citation_label(index: usize) -> Option<char> {
    if index < MAX_CITATIONS {
        Some((b'a' + index as u8) as char)
    } else {
        None
    }
}

/// A retrieved passage with provenance metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceBlock {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub url: String,
    pub text: String,
}

impl ReferenceBlock {
    /// Caller-facing metadata for this block.
    pub fn citation(&self) -> Citation {
        Citation {
            title: self.title.clone(),
            author: self.authors.clone(),
            date: self.date.clone(),
            url: self.url.clone(),
        }
    }
}

/// Provenance of a reference block as exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub author: Vec<String>,
    pub date: String,
    pub url: String,
}

/// The passage search collaborator.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// The backend name (e.g., "corpus", "pinecone").
    fn name(&self) -> &str;

    /// Return at most `k` blocks for `query`, most relevant first.
    async fn top_k(&self, query: &str, k: usize) -> Result<Vec<ReferenceBlock>, RetrievalError>;
}
