//! Session budget ledger: per-invocation spending accounts.
//!
//! Each session owns one account guarded by its own mutex; the outer map
//! lock is only held to insert, remove, or look up an account, so cost
//! accrual on one session never waits on another.
//!
//! A session is spendable while `spent < budget`. Once an accrual brings
//! `spent` to or past the budget the account is marked exhausted and every
//! later accrual is refused without touching `spent`.

use crate::LedgerError;
use crate::model::{SessionId, SessionSnapshot};
use crate::pricing::PricingTable;
use chrono::{DateTime, Utc};
use citeflow_core::Usage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

#[derive(Debug)]
struct Account {
    budget: f64,
    spent: f64,
    exhausted: bool,
    records: u64,
    created_at: DateTime<Utc>,
}

impl Account {
    fn snapshot(&self, id: &SessionId) -> SessionSnapshot {
        SessionSnapshot {
            id: id.clone(),
            budget_usd: self.budget,
            spent_usd: self.spent,
            remaining_usd: (self.budget - self.spent).max(0.0),
            exhausted: self.exhausted,
            records: self.records,
            created_at: self.created_at,
        }
    }
}

/// The ledger service. Share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct SessionLedger {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Account>>>>,
}

impl SessionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new account with `total_budget` USD.
    pub fn create_session(&self, total_budget: f64) -> SessionId {
        let id = SessionId::new();
        let budget = if total_budget.is_finite() {
            total_budget.max(0.0)
        } else {
            0.0
        };
        let account = Account {
            budget,
            spent: 0.0,
            exhausted: budget <= 0.0,
            records: 0,
            created_at: Utc::now(),
        };
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id.clone(), Arc::new(Mutex::new(account)));
        debug!(session = %id, budget, "Session opened");
        id
    }

    pub fn current_cost(&self, id: &SessionId) -> Result<f64, LedgerError> {
        self.with_account(id, |acc| acc.spent)
    }

    pub fn total_budget(&self, id: &SessionId) -> Result<f64, LedgerError> {
        self.with_account(id, |acc| acc.budget)
    }

    /// Whether generation may proceed: `Ok` while `spent < budget`.
    pub fn check(&self, id: &SessionId) -> Result<(), LedgerError> {
        let (spent, budget) = self.with_account(id, |acc| (acc.spent, acc.budget))?;
        if spent >= budget {
            return Err(LedgerError::BudgetExceeded {
                session: id.clone(),
                spent,
                budget,
            });
        }
        Ok(())
    }

    /// Add `usd` to the session's spend and return the new total.
    ///
    /// Refused with `BudgetExceeded` if the account was already exhausted.
    pub fn record_cost(&self, id: &SessionId, usd: f64) -> Result<f64, LedgerError> {
        let account = self.account(id)?;
        let mut acc = account
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if acc.exhausted {
            return Err(LedgerError::BudgetExceeded {
                session: id.clone(),
                spent: acc.spent,
                budget: acc.budget,
            });
        }

        if usd.is_finite() && usd > 0.0 {
            acc.spent += usd;
        }
        acc.records += 1;

        if acc.spent >= acc.budget {
            acc.exhausted = true;
            warn!(
                session = %id,
                spent = acc.spent,
                budget = acc.budget,
                "Session budget exhausted"
            );
        }

        Ok(acc.spent)
    }

    /// Price `usage` on `model` and record it.
    pub fn record_usage(
        &self,
        id: &SessionId,
        model: &str,
        usage: &Usage,
        pricing: &PricingTable,
    ) -> Result<f64, LedgerError> {
        self.record_cost(id, pricing.compute_cost(model, usage))
    }

    pub fn snapshot(&self, id: &SessionId) -> Result<SessionSnapshot, LedgerError> {
        self.with_account(id, |acc| acc.snapshot(id))
    }

    /// Drop the session's account, returning its final state.
    pub fn close_session(&self, id: &SessionId) -> Option<SessionSnapshot> {
        let account = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id)?;
        let acc = account
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!(session = %id, spent = acc.spent, "Session closed");
        Some(acc.snapshot(id))
    }

    /// Number of open sessions.
    pub fn active_sessions(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn account(&self, id: &SessionId) -> Result<Arc<Mutex<Account>>, LedgerError> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownSession(id.clone()))
    }

    fn with_account<T>(
        &self,
        id: &SessionId,
        f: impl FnOnce(&Account) -> T,
    ) -> Result<T, LedgerError> {
        let account = self.account(id)?;
        let acc = account
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(f(&acc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_is_spendable() {
        let ledger = SessionLedger::new();
        let id = ledger.create_session(10.0);
        assert_eq!(ledger.current_cost(&id).unwrap(), 0.0);
        assert_eq!(ledger.total_budget(&id).unwrap(), 10.0);
        assert!(ledger.check(&id).is_ok());
    }

    #[test]
    fn check_halts_once_cost_reaches_budget() {
        let ledger = SessionLedger::new();
        let id = ledger.create_session(1.0);

        ledger.record_cost(&id, 0.4).unwrap();
        assert!(ledger.check(&id).is_ok());

        ledger.record_cost(&id, 0.6).unwrap();
        let err = ledger.check(&id).unwrap_err();
        assert!(matches!(err, LedgerError::BudgetExceeded { .. }));
    }

    #[test]
    fn no_accrual_after_exhaustion() {
        let ledger = SessionLedger::new();
        let id = ledger.create_session(1.0);

        assert!((ledger.record_cost(&id, 1.5).unwrap() - 1.5).abs() < 1e-12);
        assert!(ledger.record_cost(&id, 0.25).is_err());
        assert!((ledger.current_cost(&id).unwrap() - 1.5).abs() < 1e-12);
        assert_eq!(ledger.snapshot(&id).unwrap().records, 1);
    }

    #[test]
    fn zero_budget_starts_exhausted() {
        let ledger = SessionLedger::new();
        let id = ledger.create_session(0.0);
        assert!(ledger.check(&id).is_err());
        assert!(ledger.record_cost(&id, 0.0).is_err());
    }

    #[test]
    fn negative_cost_is_ignored() {
        let ledger = SessionLedger::new();
        let id = ledger.create_session(1.0);
        ledger.record_cost(&id, -5.0).unwrap();
        assert_eq!(ledger.current_cost(&id).unwrap(), 0.0);
    }

    #[test]
    fn sessions_are_isolated() {
        let ledger = SessionLedger::new();
        let a = ledger.create_session(1.0);
        let b = ledger.create_session(1.0);

        ledger.record_cost(&a, 2.0).unwrap();
        assert!(ledger.check(&a).is_err());
        assert!(ledger.check(&b).is_ok());
        assert_eq!(ledger.current_cost(&b).unwrap(), 0.0);
    }

    #[test]
    fn unknown_session_errors() {
        let ledger = SessionLedger::new();
        let ghost = SessionId("ghost".into());
        assert!(matches!(
            ledger.check(&ghost),
            Err(LedgerError::UnknownSession(_))
        ));
        assert!(ledger.record_cost(&ghost, 1.0).is_err());
    }

    #[test]
    fn record_usage_prices_tokens() {
        let ledger = SessionLedger::new();
        let pricing = PricingTable::with_defaults();
        let id = ledger.create_session(10.0);

        let spent = ledger
            .record_usage(&id, "gpt-4", &Usage::new(1000, 500), &pricing)
            .unwrap();
        assert!((spent - 0.06).abs() < 1e-10);
    }

    #[test]
    fn close_session_removes_account() {
        let ledger = SessionLedger::new();
        let id = ledger.create_session(5.0);
        ledger.record_cost(&id, 1.0).unwrap();
        assert_eq!(ledger.active_sessions(), 1);

        let snap = ledger.close_session(&id).unwrap();
        assert!((snap.remaining_usd - 4.0).abs() < 1e-12);
        assert_eq!(ledger.active_sessions(), 0);
        assert!(ledger.close_session(&id).is_none());
    }

    #[test]
    fn concurrent_accrual_on_separate_sessions() {
        let ledger = Arc::new(SessionLedger::new());
        let ids: Vec<SessionId> = (0..8).map(|_| ledger.create_session(100.0)).collect();

        let handles: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        ledger.record_cost(&id, 0.01).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for id in &ids {
            assert!((ledger.current_cost(id).unwrap() - 1.0).abs() < 1e-9);
        }
    }
}
