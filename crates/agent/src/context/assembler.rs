//! Prompt assembly: reference passages, history, and question.
//!
//! Builds the message sequence sent to the completion service:
//!
//! 1. **System**: sourcing instructions followed by the reference blocks,
//!    each labelled with its citation letter, within the context budget
//! 2. **History**: the most recent turns, newest first until the history
//!    budget is spent, then restored to chronological order
//! 3. **User**: citation instructions, the mode clause, and the question
//!
//! Assembly is deterministic: identical inputs always produce identical
//! prompts.

use crate::context::token::TokenCounter;
use citeflow_core::error::ChatError;
use citeflow_core::message::{HistoryEntry, Message, Role};
use citeflow_core::retrieval::{MAX_CITATIONS, ReferenceBlock, citation_label};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::LazyLock;

/// Most recent history entries considered for a prompt.
pub const MAX_HISTORY_TURNS: usize = 10;

const SOURCE_PREAMBLE: &str = "You are a helpful assistant knowledgeable about AI Alignment and Safety. \
Please give a clear and coherent answer to the user's questions.(written after \"Q:\") \
using the following sources. Each source is labeled with a letter. Feel free to \
use the sources in any order, and try to use multiple sources in your answers.\n\n";

const HISTORY_CAVEAT: &str = "Before the question (\"Q: \"), there will be a history of previous questions and answers. \
These sources only apply to the last question. Any sources used in previous answers \
are invalid.";

const CITATION_INSTRUCTIONS: &str = "In your answer, please cite any claims you make back to each source \
using the format: [a], [b], etc. If you use multiple sources to make a claim \
cite all of them. For example: \"AGI is concerning [c, d, e].\"\n\n";

const CONCISE_CLAUSE: &str = "Answer very concisely, getting to the crux of the matter in as \
few words as possible. Limit your answer to 1-2 sentences.\n\n";

const ROOKIE_CLAUSE: &str = "This user is new to the field of AI Alignment and Safety - don't \
assume they know any technical terms or jargon. Still give a complete answer \
without patronizing the user, but take any extra time needed to \
explain new concepts or to illustrate your answer with examples. \
Put extra effort into explaining the intuition behind concepts \
rather than just giving a formal definition.\n\n";

static NUMERIC_CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[0-9]+\]").expect("numeric citation pattern is valid"));

// ── Types ─────────────────────────────────────────────────────────────────

/// Answer style requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Default,
    Concise,
    Rookie,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Concise => "concise",
            Self::Rookie => "rookie",
        }
    }

    /// Extra instruction inserted before the question.
    fn clause(&self) -> &'static str {
        match self {
            Self::Default => "",
            Self::Concise => CONCISE_CLAUSE,
            Self::Rookie => ROOKIE_CLAUSE,
        }
    }
}

impl FromStr for Mode {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "concise" => Ok(Self::Concise),
            "rookie" => Ok(Self::Rookie),
            other => Err(ChatError::InvalidMode(other.to_string())),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token budget split for one prompt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PromptBudget {
    /// Total token window of the model.
    pub num_tokens: usize,
    /// Share of the window for the system message.
    pub context_fraction: f64,
    /// Share of the window for history.
    pub history_fraction: f64,
}

impl PromptBudget {
    pub fn new(num_tokens: usize) -> Self {
        Self {
            num_tokens,
            ..Self::default()
        }
    }

    pub fn context_budget(&self) -> usize {
        (self.num_tokens as f64 * self.context_fraction).floor() as usize
    }

    pub fn history_budget(&self) -> usize {
        (self.num_tokens as f64 * self.history_fraction).floor() as usize
    }
}

impl Default for PromptBudget {
    fn default() -> Self {
        Self {
            num_tokens: 4095,
            context_fraction: 0.5,
            history_fraction: 0.25,
        }
    }
}

/// What went into an assembled prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptStats {
    /// Tokens of the rendered preamble and reference blocks.
    pub context_tokens: usize,
    /// Tokens of the kept history messages.
    pub history_tokens: usize,
    /// Blocks rendered, including a truncated last one.
    pub blocks_used: usize,
    /// History entries kept.
    pub history_kept: usize,
}

// ── Assembler ─────────────────────────────────────────────────────────────

/// Builds budgeted prompts.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    budget: PromptBudget,
    counter: TokenCounter,
}

impl PromptAssembler {
    pub fn new(budget: PromptBudget, counter: TokenCounter) -> Self {
        Self { budget, counter }
    }

    pub fn budget(&self) -> &PromptBudget {
        &self.budget
    }

    /// Assemble the prompt: one system message, chronological history, one
    /// user message.
    pub fn assemble(
        &self,
        query: &str,
        mode: Mode,
        history: &[HistoryEntry],
        blocks: &[ReferenceBlock],
    ) -> Vec<Message> {
        self.assemble_with_stats(query, mode, history, blocks).0
    }

    pub fn assemble_with_stats(
        &self,
        query: &str,
        mode: Mode,
        history: &[HistoryEntry],
        blocks: &[ReferenceBlock],
    ) -> (Vec<Message>, PromptStats) {
        let mut stats = PromptStats::default();

        let system = self.system_message(blocks, !history.is_empty(), &mut stats);
        let turns = self.history_messages(history, &mut stats);

        let mut messages = Vec::with_capacity(turns.len() + 2);
        messages.push(Message::system(system));
        messages.extend(turns);
        messages.push(Message::user(question_prompt(query, mode)));

        (messages, stats)
    }

    fn system_message(
        &self,
        blocks: &[ReferenceBlock],
        has_history: bool,
        stats: &mut PromptStats,
    ) -> String {
        let budget = self.budget.context_budget();
        let mut text = String::from(SOURCE_PREAMBLE);

        // Measured on the accumulated text, not summed per piece
        for (index, block) in blocks.iter().take(MAX_CITATIONS).enumerate() {
            let Some(label) = citation_label(index) else {
                break;
            };
            let rendered = render_block(label, block);
            let candidate = format!("{text}{rendered}");

            if self.counter.count(&candidate) <= budget {
                text = candidate;
                stats.blocks_used += 1;
                continue;
            }

            let mut remaining = budget.saturating_sub(self.counter.count(&text));
            while remaining > 0 {
                let capped = format!("{text}{}", self.counter.cap(&rendered, remaining));
                if self.counter.count(&capped) <= budget {
                    text = capped;
                    stats.blocks_used += 1;
                    break;
                }
                remaining -= 1;
            }
            break;
        }

        let mut text = text.trim().to_string();
        stats.context_tokens = self.counter.count(&text);
        if has_history {
            text.push_str("\n\n");
            text.push_str(HISTORY_CAVEAT);
        }
        text
    }

    fn history_messages(&self, history: &[HistoryEntry], stats: &mut PromptStats) -> Vec<Message> {
        let budget = self.budget.history_budget();
        let mut used = 0;
        let mut kept = Vec::new();

        for entry in history.iter().rev().take(MAX_HISTORY_TURNS) {
            let remaining = budget.saturating_sub(used);
            if remaining == 0 {
                break;
            }

            let message = match entry.role {
                Role::User => {
                    Message::user(self.counter.cap(&format!("Q: {}", entry.content), remaining))
                }
                // Anything that isn't the user is replayed as the assistant
                Role::Assistant | Role::System => {
                    let scrubbed = scrub_citations(&entry.content);
                    Message::assistant(self.counter.cap(&scrubbed, remaining))
                }
            };

            used += self.counter.count(&message.content);
            kept.push(message);

            if used >= budget {
                break;
            }
        }

        stats.history_tokens = used;
        stats.history_kept = kept.len();
        kept.reverse();
        kept
    }
}

/// Contents of all messages joined by blank lines, as sent to moderation.
pub fn prompt_text(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_block(label: char, block: &ReferenceBlock) -> String {
    format!(
        "[{label}] {} - {} - {}\n{}\n\n",
        block.title,
        block.authors.join(","),
        block.date,
        block.text
    )
}

/// Replace numeric citations such as `[12]` with `[x]`.
fn scrub_citations(text: &str) -> String {
    NUMERIC_CITATION.replace_all(text, "[x]").into_owned()
}

fn question_prompt(query: &str, mode: Mode) -> String {
    format!("{CITATION_INSTRUCTIONS}{}Q: {query}", mode.clause())
}

// ── Tests ─────────────────────────────────────────────────────────────────
