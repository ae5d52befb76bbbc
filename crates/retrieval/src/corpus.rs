//! In-memory corpus: keyword-ranked passages loaded from JSON.

use async_trait::async_trait;
use citeflow_core::error::RetrievalError;
use citeflow_core::retrieval::{ReferenceBlock, Retriever};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Query terms shorter than this are ignored.
const MIN_TERM_LEN: usize = 3;

/// A retriever over a fixed set of passages held in memory.
///
/// Blocks are scored by how often the query's terms occur in their title
/// and text, normalised by passage length. Ties keep corpus order.
pub struct CorpusRetriever {
    blocks: Arc<RwLock<Vec<ReferenceBlock>>>,
}

impl CorpusRetriever {
    pub fn new(blocks: Vec<ReferenceBlock>) -> Self {
        Self {
            blocks: Arc::new(RwLock::new(blocks)),
        }
    }

    /// Parse a JSON array of blocks.
    pub fn from_json(json: &str) -> Result<Self, RetrievalError> {
        let blocks: Vec<ReferenceBlock> =
            serde_json::from_str(json).map_err(|e| RetrievalError::Load(e.to_string()))?;
        Ok(Self::new(blocks))
    }

    /// Load a JSON array of blocks from disk.
    pub fn from_path(path: &Path) -> Result<Self, RetrievalError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RetrievalError::Load(format!("{}: {e}", path.display())))?;
        let retriever = Self::from_json(&content)?;
        debug!(path = %path.display(), "Loaded reference corpus");
        Ok(retriever)
    }

    pub async fn add(&self, block: ReferenceBlock) {
        self.blocks.write().await.push(block);
    }

    pub async fn len(&self) -> usize {
        self.blocks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for CorpusRetriever {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TERM_LEN)
        .map(str::to_lowercase)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

fn score(block: &ReferenceBlock, terms: &[String]) -> f32 {
    let haystack = format!("{} {}", block.title, block.text).to_lowercase();
    let occurrences: usize = terms.iter().map(|t| haystack.matches(t.as_str()).count()).sum();
    occurrences as f32 / (haystack.len() as f32 / 100.0).max(1.0)
}

#[async_trait]
impl Retriever for CorpusRetriever {
    fn name(&self) -> &str {
        "corpus"
    }

    async fn top_k(&self, query: &str, k: usize) -> Result<Vec<ReferenceBlock>, RetrievalError> {
        let terms = query_terms(query);
        if terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let blocks = self.blocks.read().await;
        let mut scored: Vec<(f32, &ReferenceBlock)> = blocks
            .iter()
            .map(|b| (score(b, &terms), b))
            .filter(|(s, _)| *s > 0.0)
            .collect();

        // Stable sort keeps corpus order among equal scores
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        debug!(query, hits = scored.len(), "Corpus search complete");

        Ok(scored.into_iter().map(|(_, b)| b.clone()).collect())
    }
}
