//! In-process collaborators for simulation and tests.
//!
//! Each one is deterministic and can be told to fail the next N calls, so
//! settlement retry paths can be driven without a network.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use sto_schemas::{CurrencyAmount, CurrencyKind, InvestorClass, InvestorId, TokenAmount};
use uuid::Uuid;

use crate::{
    Clock, CollaboratorError, ComplianceOracle, ComplianceVerdict, EventSink, FundsSettlement,
    SaleEvent, TokenLedger,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decrements `counter` if positive; true means "fail this call".
fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ---------------------------------------------------------------------------
// Compliance
// ---------------------------------------------------------------------------

/// Allow-list keyed by investor. Unknown investors are denied.
#[derive(Default)]
pub struct StaticCompliance {
    allowed: RwLock<BTreeMap<InvestorId, InvestorClass>>,
    fail_next: AtomicU32,
}

impl StaticCompliance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&self, investor: InvestorId, class: InvestorClass) {
        self.allowed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(investor, class);
    }

    pub fn revoke(&self, investor: &InvestorId) {
        self.allowed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(investor);
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }
}

impl ComplianceOracle for StaticCompliance {
    fn check(&self, investor: &InvestorId) -> Result<ComplianceVerdict, CollaboratorError> {
        if take_failure(&self.fail_next) {
            return Err(CollaboratorError::new("compliance", "injected failure"));
        }
        let allowed = self.allowed.read().unwrap_or_else(PoisonError::into_inner);
        Ok(match allowed.get(investor) {
            Some(class) => ComplianceVerdict {
                allowed: true,
                class: *class,
            },
            None => ComplianceVerdict {
                allowed: false,
                class: InvestorClass::NonAccredited,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Token ledger
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LedgerBook {
    issuances: BTreeMap<Uuid, (InvestorId, TokenAmount)>,
    balances: BTreeMap<InvestorId, TokenAmount>,
}

/// Idempotent on issuance id.
#[derive(Default)]
pub struct InMemoryTokenLedger {
    book: Mutex<LedgerBook>,
    fail_next: AtomicU32,
}

impl InMemoryTokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn balance_of(&self, investor: &InvestorId) -> TokenAmount {
        lock(&self.book)
            .balances
            .get(investor)
            .copied()
            .unwrap_or(TokenAmount::ZERO)
    }

    pub fn total_issued(&self) -> TokenAmount {
        lock(&self.book)
            .balances
            .values()
            .fold(TokenAmount::ZERO, |acc, v| acc.saturating_add(*v))
    }

    pub fn issuance_count(&self) -> usize {
        lock(&self.book).issuances.len()
    }
}

impl TokenLedger for InMemoryTokenLedger {
    fn issue(
        &self,
        issuance_id: Uuid,
        to: &InvestorId,
        amount: TokenAmount,
    ) -> Result<(), CollaboratorError> {
        if take_failure(&self.fail_next) {
            return Err(CollaboratorError::new("token ledger", "injected failure"));
        }
        let mut book = lock(&self.book);
        if let Some((prev_to, prev_amount)) = book.issuances.get(&issuance_id) {
            if prev_to == to && *prev_amount == amount {
                return Ok(());
            }
            return Err(CollaboratorError::new(
                "token ledger",
                format!("issuance {issuance_id} replayed with different parameters"),
            ));
        }
        let balance = book.balances.get(to).copied().unwrap_or(TokenAmount::ZERO);
        let next = balance
            .checked_add(amount)
            .ok_or_else(|| CollaboratorError::new("token ledger", "balance overflow"))?;
        book.balances.insert(to.clone(), next);
        book.issuances.insert(issuance_id, (to.clone(), amount));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub purchase_id: Uuid,
    pub currency: CurrencyKind,
    pub amount: CurrencyAmount,
    /// Destination for forwards, investor for refunds.
    pub counterparty: String,
}

#[derive(Default)]
struct Transfers {
    forwards: BTreeMap<Uuid, Transfer>,
    refunds: BTreeMap<Uuid, Transfer>,
}

/// Records transfers; a replay of the same purchase id is a no-op.
#[derive(Default)]
pub struct RecordingSettlement {
    transfers: Mutex<Transfers>,
    fail_forwards: AtomicU32,
    fail_refunds: AtomicU32,
}

impl RecordingSettlement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_forwards(&self, n: u32) {
        self.fail_forwards.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_refunds(&self, n: u32) {
        self.fail_refunds.store(n, Ordering::SeqCst);
    }

    pub fn forwards(&self) -> Vec<Transfer> {
        lock(&self.transfers).forwards.values().cloned().collect()
    }

    pub fn refunds(&self) -> Vec<Transfer> {
        lock(&self.transfers).refunds.values().cloned().collect()
    }

    /// Sum forwarded per currency.
    pub fn forwarded_total(&self, currency: &CurrencyKind) -> CurrencyAmount {
        lock(&self.transfers)
            .forwards
            .values()
            .filter(|t| &t.currency == currency)
            .fold(CurrencyAmount::ZERO, |acc, t| acc.saturating_add(t.amount))
    }
}

impl FundsSettlement for RecordingSettlement {
    fn forward(
        &self,
        purchase_id: Uuid,
        currency: &CurrencyKind,
        amount: CurrencyAmount,
        destination: &str,
    ) -> Result<(), CollaboratorError> {
        if take_failure(&self.fail_forwards) {
            return Err(CollaboratorError::new("settlement", "forward: injected failure"));
        }
        lock(&self.transfers)
            .forwards
            .entry(purchase_id)
            .or_insert_with(|| Transfer {
                purchase_id,
                currency: currency.clone(),
                amount,
                counterparty: destination.to_string(),
            });
        Ok(())
    }

    fn refund(
        &self,
        purchase_id: Uuid,
        currency: &CurrencyKind,
        amount: CurrencyAmount,
        investor: &InvestorId,
    ) -> Result<(), CollaboratorError> {
        if take_failure(&self.fail_refunds) {
            return Err(CollaboratorError::new("settlement", "refund: injected failure"));
        }
        lock(&self.transfers)
            .refunds
            .entry(purchase_id)
            .or_insert_with(|| Transfer {
                purchase_id,
                currency: currency.clone(),
                amount,
                counterparty: investor.to_string(),
            });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Rejected events are not recorded.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<SaleEvent>>,
    fail_next: AtomicU32,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<SaleEvent> {
        lock(&self.events).clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        lock(&self.events).iter().map(SaleEvent::kind).collect()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: &SaleEvent) -> Result<(), CollaboratorError> {
        if take_failure(&self.fail_next) {
            return Err(CollaboratorError::new("event sink", "injected failure"));
        }
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *lock(&self.now) = t;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_issue_is_idempotent() {
        let ledger = InMemoryTokenLedger::new();
        let id = Uuid::new_v4();
        let alice = InvestorId::new("alice");
        ledger.issue(id, &alice, TokenAmount::new(10)).unwrap();
        ledger.issue(id, &alice, TokenAmount::new(10)).unwrap();
        assert_eq!(ledger.balance_of(&alice), TokenAmount::new(10));
        assert_eq!(ledger.issuance_count(), 1);
        assert!(ledger.issue(id, &alice, TokenAmount::new(11)).is_err());
    }

    #[test]
    fn injected_failures_count_down() {
        let ledger = InMemoryTokenLedger::new();
        ledger.fail_next(2);
        let alice = InvestorId::new("alice");
        assert!(ledger.issue(Uuid::new_v4(), &alice, TokenAmount::new(1)).is_err());
        assert!(ledger.issue(Uuid::new_v4(), &alice, TokenAmount::new(1)).is_err());
        assert!(ledger.issue(Uuid::new_v4(), &alice, TokenAmount::new(1)).is_ok());
    }

    #[test]
    fn unknown_investor_is_denied() {
        let c = StaticCompliance::new();
        c.allow(InvestorId::new("a"), InvestorClass::Accredited);
        assert!(c.check(&InvestorId::new("a")).unwrap().allowed);
        assert!(!c.check(&InvestorId::new("b")).unwrap().allowed);
    }
}
