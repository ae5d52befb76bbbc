//! Token-budgeted prompt construction.
//!
//! | Segment | Budget | Trim strategy |
//! |---------|--------|---------------|
//! | System (preamble + reference blocks) | `context_fraction` of the window | Block that overflows is capped, later blocks dropped |
//! | History | `history_fraction` of the window | Oldest turns dropped, last kept turn capped |
//! | Question | remainder | Never trimmed |

pub mod assembler;
pub mod token;

pub use assembler::{MAX_HISTORY_TURNS, Mode, PromptAssembler, PromptBudget, PromptStats, prompt_text};
pub use token::{TokenCounter, TokenizerError};
