//! Caller-facing adapters over [`ChatOrchestrator`].
//!
//! Every call opens its own ledger session with the configured allowance
//! and closes it once the event sequence has ended.

use crate::orchestrator::{ChatOrchestrator, ChatRequest};
use crate::stream_event::{LoadingPhase, StreamEvent};
use citeflow_core::log::LogSink;
use citeflow_core::retrieval::{Citation, citation_label};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

/// Allowance per session when none is configured, in USD.
pub const DEFAULT_SESSION_BUDGET: f64 = 10.0;

/// A collapsed, non-streaming answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimpleAnswer {
    /// The full answer, or the error text if the invocation failed.
    pub response: String,

    /// Citations keyed by their letter. Absent if retrieval never completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<BTreeMap<String, Citation>>,
}

/// Runs invocations with a fresh budgeted session each.
#[derive(Clone)]
pub struct ChatService {
    orchestrator: ChatOrchestrator,
    session_budget: f64,
}

impl ChatService {
    pub fn new(orchestrator: ChatOrchestrator) -> Self {
        Self {
            orchestrator,
            session_budget: DEFAULT_SESSION_BUDGET,
        }
    }

    pub fn with_session_budget(mut self, usd: f64) -> Self {
        self.session_budget = usd;
        self
    }

    pub fn session_budget(&self) -> f64 {
        self.session_budget
    }

    pub fn orchestrator(&self) -> &ChatOrchestrator {
        &self.orchestrator
    }

    /// Start an invocation in a new session.
    pub fn start(&self, request: ChatRequest, log: Arc<dyn LogSink>) -> mpsc::Receiver<StreamEvent> {
        let ledger = self.orchestrator.ledger().clone();
        let session = ledger.create_session(self.session_budget);
        let mut inner = self.orchestrator.run_stream(request, session.clone(), log);
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            loop {
                // Caller gone: dropping `inner` cancels the orchestrator too
                let event = tokio::select! {
                    _ = tx.closed() => break,
                    event = inner.recv() => event,
                };
                let Some(event) = event else { break };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            drop(inner);

            if let Some(snapshot) = ledger.close_session(&session) {
                info!(
                    session = %session,
                    spent_usd = snapshot.spent_usd,
                    budget_usd = snapshot.budget_usd,
                    "Session finished"
                );
            }
        });

        rx
    }

    /// Each event as its own flat JSON object, in order.
    pub fn stream_json(
        &self,
        request: ChatRequest,
        log: Arc<dyn LogSink>,
    ) -> impl Stream<Item = String> + Send + 'static {
        ReceiverStream::new(self.start(request, log))
            .map(|event| serde_json::to_string(&event).unwrap_or_default())
    }

    /// Answer `query` in default mode with no history.
    pub async fn ask_simple_typed(&self, query: &str, log: Arc<dyn LogSink>) -> SimpleAnswer {
        let mut rx = self.start(ChatRequest::new(query), log);
        let mut answer = SimpleAnswer::default();

        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Loading {
                    phase: LoadingPhase::Semantic,
                    citations: Some(citations),
                } => {
                    let keyed = citations
                        .into_iter()
                        .enumerate()
                        .filter_map(|(i, c)| citation_label(i).map(|l| (l.to_string(), c)))
                        .collect();
                    answer.citations = Some(keyed);
                }
                StreamEvent::Streaming { content } => answer.response.push_str(&content),
                StreamEvent::Error { message } => answer.response = message,
                _ => {}
            }
        }

        answer
    }

    /// [`ask_simple_typed`](Self::ask_simple_typed) serialized to JSON.
    pub async fn ask_simple(&self, query: &str, log: Arc<dyn LogSink>) -> String {
        let answer = self.ask_simple_typed(query, log).await;
        serde_json::to_string(&answer).unwrap_or_default()
    }
}
