//! Scripted collaborators for orchestrator and gate tests.

use async_trait::async_trait;
use citeflow_core::error::{FollowupError, ProviderError, RetrievalError};
use citeflow_core::followup::{Followup, FollowupEngine};
use citeflow_core::message::Message;
use citeflow_core::moderation::{ModerationResult, Moderator};
use citeflow_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage,
};
use citeflow_core::retrieval::{ReferenceBlock, Retriever};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// How a scripted stream ends after its fragments.
#[derive(Debug, Clone)]
pub enum StreamEnd {
    /// Final chunk with `done: true`, carrying `usage` if set.
    Done(Option<Usage>),
    /// The sender is dropped without an end marker.
    Close,
    /// An error chunk.
    Fail(ProviderError),
    /// The stream stays open until the receiver is dropped.
    Hang,
}

/// A provider that streams a fixed list of fragments.
pub struct ScriptedProvider {
    fragments: Vec<String>,
    end: StreamEnd,
    open_error: Option<ProviderError>,
    requests: Mutex<Vec<ProviderRequest>>,
    released: Arc<Notify>,
}

impl ScriptedProvider {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            end: StreamEnd::Done(None),
            open_error: None,
            requests: Mutex::new(Vec::new()),
            released: Arc::new(Notify::new()),
        }
    }

    pub fn ending(mut self, end: StreamEnd) -> Self {
        self.end = end;
        self
    }

    /// `stream()` itself fails.
    pub fn refusing(error: ProviderError) -> Self {
        let mut provider = Self::new(&[]);
        provider.open_error = Some(error);
        provider
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Resolves once a hanging stream has seen its receiver dropped.
    pub async fn released(&self) {
        self.released.notified().await;
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }
        Ok(ProviderResponse {
            message: Message::assistant(self.fragments.concat()),
            usage: None,
            model: request.model,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }

        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let fragments = self.fragments.clone();
        let end = self.end.clone();
        let released = self.released.clone();

        tokio::spawn(async move {
            for fragment in fragments {
                if tx.send(Ok(StreamChunk::text(fragment))).await.is_err() {
                    released.notify_one();
                    return;
                }
            }
            match end {
                StreamEnd::Done(usage) => {
                    let _ = tx
                        .send(Ok(StreamChunk {
                            content: None,
                            done: true,
                            usage,
                        }))
                        .await;
                }
                StreamEnd::Close => {}
                StreamEnd::Fail(err) => {
                    let _ = tx.send(Err(err)).await;
                }
                StreamEnd::Hang => {
                    tx.closed().await;
                    released.notify_one();
                }
            }
        });

        Ok(rx)
    }
}

/// A retriever over a fixed list of blocks.
pub struct ScriptedRetriever {
    blocks: Vec<ReferenceBlock>,
    error: Option<RetrievalError>,
    calls: AtomicUsize,
}

impl ScriptedRetriever {
    pub fn new(blocks: Vec<ReferenceBlock>) -> Self {
        Self {
            blocks,
            error: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: RetrievalError) -> Self {
        Self {
            blocks: Vec::new(),
            error: Some(error),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for ScriptedRetriever {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn top_k(&self, _query: &str, k: usize) -> Result<Vec<ReferenceBlock>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        Ok(self.blocks.iter().take(k).cloned().collect())
    }
}

/// A moderator with a fixed verdict.
pub struct ScriptedModerator {
    verdict: Result<Vec<ModerationResult>, ProviderError>,
    inputs: Mutex<Vec<Vec<String>>>,
}

impl ScriptedModerator {
    fn with(verdict: Result<Vec<ModerationResult>, ProviderError>) -> Self {
        Self {
            verdict,
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn clean() -> Self {
        Self::with(Ok(vec![ModerationResult::clean(), ModerationResult::clean()]))
    }

    /// Passes the query, flags the prompt.
    pub fn flag_prompt() -> Self {
        let flagged = ModerationResult {
            flagged: true,
            categories: serde_json::json!({"violence": true, "harassment": false}),
            category_scores: serde_json::json!({"violence": 0.97, "harassment": 0.01}),
        };
        Self::with(Ok(vec![ModerationResult::clean(), flagged]))
    }

    pub fn failing() -> Self {
        Self::with(Err(ProviderError::Network("connection reset".into())))
    }

    pub fn calls(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }

    pub fn inputs(&self) -> Vec<Vec<String>> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Moderator for ScriptedModerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn moderate(&self, inputs: &[String]) -> Result<Vec<ModerationResult>, ProviderError> {
        self.inputs.lock().unwrap().push(inputs.to_vec());
        self.verdict.clone()
    }
}

/// A followup engine with a fixed answer.
pub struct ScriptedFollowups {
    answer: Result<Vec<Followup>, FollowupError>,
    texts: Mutex<Vec<Vec<String>>>,
}

impl ScriptedFollowups {
    pub fn new(followups: Vec<Followup>) -> Self {
        Self {
            answer: Ok(followups),
            texts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: Err(FollowupError::Unavailable("search service down".into())),
            texts: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(&self) -> Vec<Vec<String>> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl FollowupEngine for ScriptedFollowups {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn suggest(&self, texts: &[String]) -> Result<Vec<Followup>, FollowupError> {
        self.texts.lock().unwrap().push(texts.to_vec());
        self.answer.clone()
    }
}

pub fn block(title: &str, text: &str) -> ReferenceBlock {
    ReferenceBlock {
        title: title.into(),
        authors: vec!["Christiano".into(), "Leike".into()],
        date: "2017-06-12".into(),
        url: format!("https://example.org/{}", title.to_lowercase().replace(' ', "-")),
        text: text.into(),
    }
}

pub fn followup(text: &str) -> Followup {
    Followup {
        text: text.into(),
        pageid: "7755".into(),
        score: 0.8,
    }
}
