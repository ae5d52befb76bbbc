//! The chat invocation state machine.
//!
//! ```text
//! Start → SemanticSearch → PromptBuilt → ModerationChecked → Generating
//!       → Streaming* → { Done | Error }
//! ```
//!
//! Each invocation runs in its own task and reports progress as
//! [`StreamEvent`]s on a channel. Stages run strictly in order; the task
//! only suspends at remote calls, each bounded by `request_timeout`.
//! Dropping the receiver cancels the invocation at the next send and drops
//! the provider stream with it.

use crate::context::{Mode, PromptAssembler, PromptBudget, TokenCounter, prompt_text};
use crate::moderation::ModerationGate;
use crate::stream_event::{LoadingPhase, StreamEvent};
use citeflow_core::error::{ChatError, ProviderError};
use citeflow_core::followup::{Followup, FollowupEngine, NoFollowups};
use citeflow_core::log::LogSink;
use citeflow_core::message::HistoryEntry;
use citeflow_core::moderation::Moderator;
use citeflow_core::provider::{Provider, ProviderRequest, Usage};
use citeflow_core::retrieval::{MAX_CITATIONS, ReferenceBlock, Retriever};
use citeflow_telemetry::{LedgerError, PricingTable, SessionId, SessionLedger};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 128;

/// Model and budget settings for every invocation of an orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub model: String,
    /// Token window of the model.
    pub num_tokens: usize,
    pub context_fraction: f64,
    pub history_fraction: f64,
    /// Tokens held back from the completion budget.
    pub completion_margin: usize,
    /// Blocks retrieved when the request doesn't say.
    pub default_k: usize,
    pub temperature: f32,
    pub request_timeout: Duration,
}

impl ChatSettings {
    /// Window size and retrieval depth for a model family.
    pub fn for_model(model: impl Into<String>) -> Self {
        let model = model.into();
        let (num_tokens, default_k) = if model.starts_with("gpt-4") {
            (8191, 20)
        } else {
            (4095, 10)
        };
        Self {
            model,
            num_tokens,
            context_fraction: 0.5,
            history_fraction: 0.25,
            completion_margin: 50,
            default_k,
            temperature: 0.0,
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn prompt_budget(&self) -> PromptBudget {
        PromptBudget {
            num_tokens: self.num_tokens,
            context_fraction: self.context_fraction,
            history_fraction: self.history_fraction,
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::for_model("gpt-3.5-turbo")
    }
}

/// One chat invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub query: String,
    /// Answer style; validated when the invocation starts.
    pub mode: String,
    pub history: Vec<HistoryEntry>,
    /// Blocks to retrieve, at most 26.
    pub k: Option<usize>,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            mode: Mode::Default.as_str().to_string(),
            history: Vec::new(),
            k: None,
        }
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.history = history;
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }
}

/// Why an invocation stopped early.
enum Halt {
    Failed(ChatError),
    /// The event receiver went away.
    Cancelled,
}

impl From<ChatError> for Halt {
    fn from(err: ChatError) -> Self {
        Self::Failed(err)
    }
}

impl From<LedgerError> for Halt {
    fn from(err: LedgerError) -> Self {
        Self::Failed(err.into())
    }
}

/// Runs chat invocations against a fixed set of collaborators.
#[derive(Clone)]
pub struct ChatOrchestrator {
    provider: Arc<dyn Provider>,
    retriever: Arc<dyn Retriever>,
    gate: ModerationGate,
    followups: Arc<dyn FollowupEngine>,
    ledger: Arc<SessionLedger>,
    pricing: Arc<PricingTable>,
    assembler: PromptAssembler,
    counter: TokenCounter,
    settings: ChatSettings,
}

impl ChatOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        retriever: Arc<dyn Retriever>,
        moderator: Arc<dyn Moderator>,
        ledger: Arc<SessionLedger>,
        settings: ChatSettings,
        counter: TokenCounter,
    ) -> Self {
        Self {
            provider,
            retriever,
            gate: ModerationGate::new(moderator),
            followups: Arc::new(NoFollowups),
            ledger,
            pricing: Arc::new(PricingTable::with_defaults()),
            assembler: PromptAssembler::new(settings.prompt_budget(), counter.clone()),
            counter,
            settings,
        }
    }

    pub fn with_followups(mut self, followups: Arc<dyn FollowupEngine>) -> Self {
        self.followups = followups;
        self
    }

    pub fn with_pricing(mut self, pricing: Arc<PricingTable>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &Arc<SessionLedger> {
        &self.ledger
    }

    /// Start an invocation charged to `session`.
    ///
    /// The receiver yields `loading*`, `streaming*`, then exactly one
    /// `done` or `error`, and closes after it.
    pub fn run_stream(
        &self,
        request: ChatRequest,
        session: SessionId,
        log: Arc<dyn LogSink>,
    ) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let this = self.clone();

        tokio::spawn(async move {
            match this.drive(&request, &session, log.as_ref(), &tx).await {
                Ok(followups) => {
                    let _ = tx.send(StreamEvent::Done { followups }).await;
                }
                Err(Halt::Failed(err)) => {
                    warn!(session = %session, error = %err, "Chat invocation failed");
                    let _ = tx
                        .send(StreamEvent::Error {
                            message: err.to_string(),
                        })
                        .await;
                }
                Err(Halt::Cancelled) => {
                    debug!(session = %session, "Receiver dropped, invocation cancelled");
                }
            }
        });

        rx
    }

    /// Run an invocation to completion and return every event.
    pub async fn run_collect(
        &self,
        request: ChatRequest,
        session: SessionId,
        log: Arc<dyn LogSink>,
    ) -> Vec<StreamEvent> {
        let mut rx = self.run_stream(request, session, log);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    async fn drive(
        &self,
        request: &ChatRequest,
        session: &SessionId,
        log: &dyn LogSink,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<Vec<Followup>, Halt> {
        let started = Instant::now();
        let limit = self.settings.request_timeout;
        let mode: Mode = request.mode.parse()?;

        // ── Semantic search ──────────────────────────────────────
        let k = request
            .k
            .unwrap_or(self.settings.default_k)
            .min(MAX_CITATIONS);
        let mut blocks = bounded("Retrieval", limit, self.retriever.top_k(&request.query, k)).await?;
        blocks.truncate(k);
        debug!(retriever = self.retriever.name(), k, found = blocks.len(), "Retrieved blocks");

        let citations = blocks.iter().map(ReferenceBlock::citation).collect();
        emit(
            tx,
            StreamEvent::Loading {
                phase: LoadingPhase::Semantic,
                citations: Some(citations),
            },
        )
        .await?;

        // ── Prompt ───────────────────────────────────────────────
        emit(tx, StreamEvent::loading(LoadingPhase::Prompt)).await?;
        let (messages, stats) =
            self.assembler
                .assemble_with_stats(&request.query, mode, &request.history, &blocks);
        debug!(
            context_tokens = stats.context_tokens,
            history_tokens = stats.history_tokens,
            blocks = stats.blocks_used,
            history = stats.history_kept,
            "Prompt assembled"
        );

        let prompt = prompt_text(&messages);
        bounded("Moderation", limit, self.gate.check(&request.query, &prompt, log)).await?;

        // ── Generation ───────────────────────────────────────────
        let prompt_tokens = self.counter.count_messages(&messages);
        let available = self.settings.num_tokens as i64
            - prompt_tokens as i64
            - self.settings.completion_margin as i64;
        if available < 1 {
            return Err(ChatError::Completion(ProviderError::ContextOverflow(format!(
                "prompt uses {prompt_tokens} of {} tokens",
                self.settings.num_tokens
            )))
            .into());
        }
        let max_tokens = u32::try_from(available).unwrap_or(u32::MAX);

        self.ledger.check(session)?;
        emit(tx, StreamEvent::loading(LoadingPhase::Llm)).await?;

        let model = self.settings.model.as_str();
        let provider_request = ProviderRequest {
            model: model.to_string(),
            messages,
            temperature: self.settings.temperature,
            max_tokens: Some(max_tokens),
            stream: true,
            stop: vec![],
        };
        let mut chunks = bounded("Completion", limit, self.provider.stream(provider_request)).await?;

        let prompt_tokens = u32::try_from(prompt_tokens).unwrap_or(u32::MAX);
        self.ledger
            .record_usage(session, model, &Usage::new(prompt_tokens, 0), &self.pricing)?;

        let mut response = String::new();
        let mut completion_tokens: u32 = 0;
        loop {
            let next = tokio::select! {
                _ = tx.closed() => return Err(Halt::Cancelled),
                next = tokio::time::timeout(limit, chunks.recv()) => next,
            };
            let chunk = match next {
                Err(_) => return Err(timed_out("Completion", limit).into()),
                Ok(None) => break,
                Ok(Some(Err(err))) => return Err(ChatError::Completion(err).into()),
                Ok(Some(Ok(chunk))) => chunk,
            };

            if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                let tokens = u32::try_from(self.counter.count(&content)).unwrap_or(u32::MAX);
                self.ledger
                    .record_usage(session, model, &Usage::new(0, tokens), &self.pricing)?;
                completion_tokens = completion_tokens.saturating_add(tokens);
                response.push_str(&content);
                emit(tx, StreamEvent::Streaming { content }).await?;
                self.ledger.check(session)?;
            }

            // Backend-reported usage settles whatever local counting missed
            if let Some(usage) = chunk.usage {
                let extra = Usage::new(
                    usage.prompt_tokens.saturating_sub(prompt_tokens),
                    usage.completion_tokens.saturating_sub(completion_tokens),
                );
                if extra.total_tokens > 0 {
                    self.ledger
                        .record_usage(session, model, &extra, &self.pricing)?;
                    completion_tokens = completion_tokens.max(usage.completion_tokens);
                }
            }

            if chunk.done {
                break;
            }
        }
        drop(chunks);

        debug!(prompt = %prompt, "Prompt sent");
        debug!(response = %response, "Response received");
        info!(
            session = %session,
            model,
            prompt_tokens,
            completion_tokens,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Answer complete"
        );
        log.log(&request.query);
        log.log(&response);

        // ── Followups ────────────────────────────────────────────
        let texts = [request.query.clone(), response];
        let followups = match bounded("Followup lookup", limit, self.followups.suggest(&texts)).await {
            Ok(followups) => followups,
            Err(err) => {
                warn!(engine = self.followups.name(), error = %err, "Followup lookup failed");
                Vec::new()
            }
        };

        Ok(followups)
    }
}

async fn emit(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> Result<(), Halt> {
    tx.send(event).await.map_err(|_| Halt::Cancelled)
}

/// Await a remote call for at most `limit`.
async fn bounded<T, E>(
    operation: &'static str,
    limit: Duration,
    call: impl Future<Output = Result<T, E>>,
) -> Result<T, ChatError>
where
    E: Into<ChatError>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(timed_out(operation, limit)),
    }
}

fn timed_out(operation: &'static str, limit: Duration) -> ChatError {
    ChatError::Timeout {
        operation,
        secs: limit.as_secs(),
    }
}
