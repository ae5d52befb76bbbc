//! Cost tracking and budget enforcement for Citeflow.
//!
//! Provides model pricing and the session ledger that gates generation
//! once a chat invocation has spent its allowance.

pub mod ledger;
pub mod model;
pub mod pricing;

pub use ledger::SessionLedger;
pub use model::{SessionId, SessionSnapshot};
pub use pricing::{ModelPricing, PricingTable};

use citeflow_core::ChatError;

/// Errors from the ledger.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("budget exceeded for session {session}: spent ${spent:.4} of ${budget:.4}")]
    BudgetExceeded {
        session: SessionId,
        spent: f64,
        budget: f64,
    },

    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
}

impl From<LedgerError> for ChatError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::BudgetExceeded { .. } => ChatError::BudgetExceeded,
            // A missing account means nothing may be spent on its behalf.
            LedgerError::UnknownSession(_) => ChatError::BudgetExceeded,
        }
    }
}
