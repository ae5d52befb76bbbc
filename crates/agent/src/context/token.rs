//! Token counting and truncation.
//!
//! Every measurement in a chat invocation (reference blocks, history turns,
//! truncation, and the completion budget) goes through one [`TokenCounter`]
//! backed by the `cl100k_base` BPE, so the numbers always agree.

use citeflow_core::message::Message;
use std::sync::{Arc, OnceLock};
use tiktoken_rs::CoreBPE;

/// Marker returned when nothing of the text fits.
pub const ELLIPSIS: &str = "...";

/// Marker appended to a truncated text.
const TRUNCATION_MARKER: &str = " ...";

static CL100K: OnceLock<Arc<CoreBPE>> = OnceLock::new();

/// The tokenizer could not be initialised.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Failed to load cl100k_base tokenizer: {0}")]
pub struct TokenizerError(String);

/// Shared token counter. Cheap to clone.
#[derive(Clone)]
pub struct TokenCounter {
    bpe: Arc<CoreBPE>,
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("encoding", &"cl100k_base")
            .finish()
    }
}

impl TokenCounter {
    /// The process-wide `cl100k_base` counter.
    pub fn cl100k() -> Result<Self, TokenizerError> {
        if let Some(bpe) = CL100K.get() {
            return Ok(Self { bpe: bpe.clone() });
        }
        let bpe = Arc::new(tiktoken_rs::cl100k_base().map_err(|e| TokenizerError(e.to_string()))?);
        Ok(Self {
            bpe: CL100K.get_or_init(|| bpe).clone(),
        })
    }

    /// Number of tokens in `text`.
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Cost of one prompt message: its content plus its role label.
    pub fn count_message(&self, message: &Message) -> usize {
        self.count(&message.content) + self.count(message.role.as_str())
    }

    pub fn count_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }

    /// Limit `text` to at most `max_tokens` tokens.
    ///
    /// Text that already fits is returned unchanged. Otherwise the result is
    /// a prefix of `text` followed by `" ..."`, and re-tokenizes to at most
    /// `max_tokens`. A ceiling of zero yields `"..."`.
    pub fn cap(&self, text: &str, max_tokens: usize) -> String {
        if max_tokens == 0 {
            return ELLIPSIS.to_string();
        }

        let tokens = self.bpe.encode_ordinary(text);
        if tokens.len() <= max_tokens {
            return text.to_string();
        }

        // Longest prefix of at most `n` tokens that decodes on a UTF-8 boundary
        let decode_prefix = |mut n: usize| -> (String, usize) {
            loop {
                match self.bpe.decode(tokens[..n].to_vec()) {
                    Ok(prefix) => return (prefix, n),
                    Err(_) if n > 0 => n -= 1,
                    Err(_) => return (String::new(), 0),
                }
            }
        };

        let mut take = max_tokens;
        loop {
            let (prefix, used) = decode_prefix(take);
            let candidate = format!("{prefix}{TRUNCATION_MARKER}");
            if self.count(&candidate) <= max_tokens {
                return candidate;
            }
            if used == 0 {
                return ELLIPSIS.to_string();
            }
            take = used - 1;
        }
    }
}
