//! The sale controller: one sale instance, end to end.
//!
//! ```text
//! purchase(req)
//!   ├── amount / currency / beneficiary checks       (no lock)
//!   ├── ComplianceOracle::check(beneficiary)          (no lock)
//!   ├── RateSource::rate(currency)                    (no lock)
//!   ├── lock book
//!   │     ├── derive state from Clock                → SaleNotOpen / SalePaused
//!   │     ├── check_fresh(rate, now)                 → RateUnavailable
//!   │     ├── allocate + commit_plan                  (all-or-nothing)
//!   │     └── record pending settlement, version += 1
//!   └── unlock, then: events, issue, forward, refund
//! ```
//!
//! The rate fetched before the lock is the rate used for the whole purchase;
//! its freshness is judged against the clock read under the lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use sto_allocator::{allocate, commit_plan, AllocationInput, AllocationPlan, AllocationPolicy};
use sto_caps::{InvestorCapState, InvestorCapTracker};
use sto_config::SaleConfig;
use sto_rates::{check_fresh, Rate, RateSource};
use sto_schemas::{CurrencyAmount, CurrencyKind, InvestorClass, InvestorId, TokenAmount, Units};
use sto_tiers::{Tier, TierLedger, TierSpec};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    derive_state, Clock, CollaboratorError, ComplianceOracle, EventSink, FundsSettlement,
    SaleError, SaleEvent, SaleState, TokenLedger,
};

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct Collaborators {
    pub compliance: Arc<dyn ComplianceOracle>,
    pub rates: Arc<dyn RateSource>,
    pub tokens: Arc<dyn TokenLedger>,
    pub funds: Arc<dyn FundsSettlement>,
    pub events: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
}

// ---------------------------------------------------------------------------
// Requests and receipts
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    /// Caller-supplied idempotency key. Derived from the sale id when absent.
    #[serde(default)]
    pub purchase_id: Option<Uuid>,
    /// Pays, and receives any refund.
    pub buyer: InvestorId,
    /// Receives the tokens and carries the cap. Defaults to `buyer`.
    #[serde(default)]
    pub beneficiary: Option<InvestorId>,
    pub currency: CurrencyKind,
    pub amount: CurrencyAmount,
    #[serde(default)]
    pub min_tokens: Option<TokenAmount>,
}

impl PurchaseRequest {
    pub fn new(buyer: InvestorId, currency: CurrencyKind, amount: CurrencyAmount) -> Self {
        Self {
            purchase_id: None,
            buyer,
            beneficiary: None,
            currency,
            amount,
            min_tokens: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.purchase_id = Some(id);
        self
    }

    pub fn for_beneficiary(mut self, beneficiary: InvestorId) -> Self {
        self.beneficiary = Some(beneficiary);
        self
    }

    pub fn with_min_tokens(mut self, min_tokens: TokenAmount) -> Self {
        self.min_tokens = Some(min_tokens);
        self
    }

    pub fn beneficiary(&self) -> &InvestorId {
        self.beneficiary.as_ref().unwrap_or(&self.buyer)
    }
}

/// Which post-commit effects have landed for a purchase.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementProgress {
    /// `TokenPurchase` events accepted by the sink, one per fill.
    pub fills_recorded: usize,
    pub issued: bool,
    pub forwarded: bool,
    /// `FundsReceived` accepted by the sink.
    pub funds_recorded: bool,
    pub refunded: bool,
    /// `Refunded` accepted by the sink (trivially true with nothing to refund).
    pub refund_recorded: bool,
    pub attempts: u32,
    pub last_error: Option<String>,
    #[serde(skip)]
    in_flight: bool,
}

impl SettlementProgress {
    pub fn is_complete(&self, fills: usize) -> bool {
        self.fills_recorded >= fills
            && self.issued
            && self.forwarded
            && self.funds_recorded
            && self.refunded
            && self.refund_recorded
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SettlementStatus {
    Complete,
    /// Committed; `retry_settlement` replays the missing steps.
    Pending { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub purchase_id: Uuid,
    pub buyer: InvestorId,
    pub beneficiary: InvestorId,
    pub class: InvestorClass,
    pub rate: Rate,
    pub plan: AllocationPlan,
    pub committed_at: DateTime<Utc>,
    pub settlement: SettlementProgress,
}

impl PurchaseRecord {
    pub fn is_settled(&self) -> bool {
        self.settlement.is_complete(self.plan.fills.len())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub purchase_id: Uuid,
    pub plan: AllocationPlan,
    pub settlement: SettlementStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleStats {
    pub sale_id: Option<Uuid>,
    pub state: SaleState,
    pub paused: bool,
    pub finalized: bool,
    pub version: u64,
    pub tokens_sold: TokenAmount,
    pub tokens_remaining: TokenAmount,
    pub units_raised: Units,
    pub funds_raised: BTreeMap<CurrencyKind, CurrencyAmount>,
    pub tokens_sold_by_currency: BTreeMap<CurrencyKind, TokenAmount>,
    pub investor_count: usize,
    pub purchase_count: usize,
    pub pending_settlements: usize,
    pub current_tier: Option<usize>,
}

// ---------------------------------------------------------------------------
// Book
// ---------------------------------------------------------------------------

struct Terms {
    config: SaleConfig,
    tiers: TierLedger,
}

/// Everything a purchase reads or writes. One per sale, behind one mutex.
struct Book {
    terms: Option<Terms>,
    caps: InvestorCapTracker,
    paused: bool,
    finalized: bool,
    finalizing: bool,
    version: u64,
    next_seq: u64,
    purchases: BTreeMap<Uuid, PurchaseRecord>,
    units_raised: Units,
    funds_raised: BTreeMap<CurrencyKind, CurrencyAmount>,
    tokens_by_currency: BTreeMap<CurrencyKind, TokenAmount>,
}

impl Book {
    fn new() -> Self {
        Self {
            terms: None,
            caps: InvestorCapTracker::new(Units::ZERO),
            paused: false,
            finalized: false,
            finalizing: false,
            version: 0,
            next_seq: 0,
            purchases: BTreeMap::new(),
            units_raised: Units::ZERO,
            funds_raised: BTreeMap::new(),
            tokens_by_currency: BTreeMap::new(),
        }
    }

    fn state(&self, now: DateTime<Utc>) -> SaleState {
        derive_state(
            self.terms.as_ref().map(|t| &t.config),
            now,
            self.terms.as_ref().is_some_and(|t| t.tiers.is_sold_out()),
        )
    }

    fn terms(&self) -> Result<&Terms, SaleError> {
        self.terms.as_ref().ok_or(SaleError::NotConfigured)
    }

    fn terms_mut(&mut self) -> Result<&mut Terms, SaleError> {
        self.terms.as_mut().ok_or(SaleError::NotConfigured)
    }

    fn next_purchase_id(&mut self, sale_id: Uuid) -> Uuid {
        loop {
            let id = Uuid::new_v5(&sale_id, format!("purchase:{}", self.next_seq).as_bytes());
            self.next_seq += 1;
            if !self.purchases.contains_key(&id) {
                return id;
            }
        }
    }

    /// Closed by exhaustion rather than by `end_time`.
    fn sold_out_before_end(&self, now: DateTime<Utc>) -> bool {
        self.terms
            .as_ref()
            .is_some_and(|t| t.tiers.is_sold_out() && now < t.config.end_time)
    }

    /// Steps that must see the same snapshot as the commit.
    fn plan(
        &self,
        req: &PurchaseRequest,
        checked: &Checked,
        now: DateTime<Utc>,
    ) -> Result<AllocationPlan, SaleError> {
        let state = self.state(now);
        if state != SaleState::Open {
            if state == SaleState::Closed && self.sold_out_before_end(now) {
                return Err(SaleError::SoldOut);
            }
            return Err(SaleError::SaleNotOpen { state });
        }
        if self.paused {
            return Err(SaleError::SalePaused);
        }
        let terms = self.terms()?;
        if !terms.config.accepted_currencies.contains(&req.currency) {
            return Err(SaleError::UnsupportedCurrency {
                currency: req.currency.clone(),
            });
        }
        check_fresh(
            &req.currency,
            &checked.rate,
            now,
            terms.config.rate_tolerance_secs,
        )
        .map_err(SaleError::RateUnavailable)?;

        let policy = AllocationPolicy {
            minimum_investment: terms.config.minimum_investment,
            discount_currency: terms.config.discount_currency.clone(),
        };
        let input = AllocationInput {
            investor: req.beneficiary().clone(),
            class: checked.class,
            currency: req.currency.clone(),
            amount: req.amount,
            rate: checked.rate.clone(),
            min_tokens: req.min_tokens,
        };
        Ok(allocate(&policy, &input, &terms.tiers, &self.caps)?)
    }
}

/// Results of the checks done before taking the lock.
struct Checked {
    class: InvestorClass,
    rate: Rate,
}

// ---------------------------------------------------------------------------
// SaleController
// ---------------------------------------------------------------------------

pub struct SaleController {
    book: Mutex<Book>,
    compliance: Arc<dyn ComplianceOracle>,
    rates: Arc<dyn RateSource>,
    tokens: Arc<dyn TokenLedger>,
    funds: Arc<dyn FundsSettlement>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl SaleController {
    pub fn new(collab: Collaborators) -> Self {
        Self {
            book: Mutex::new(Book::new()),
            compliance: collab.compliance,
            rates: collab.rates,
            tokens: collab.tokens,
            funds: collab.funds,
            events: collab.events,
            clock: collab.clock,
        }
    }

    /// `new` followed by `configure`.
    pub fn with_setup(
        collab: Collaborators,
        config: SaleConfig,
        tiers: Vec<TierSpec>,
    ) -> Result<Self, SaleError> {
        let sale = Self::new(collab);
        sale.configure(config, tiers)?;
        Ok(sale)
    }

    /// Nothing in the book is modified before a panic could occur except
    /// through `commit_plan`'s final swap, so a poisoned lock is still
    /// consistent.
    fn lock(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lifecycle and admin events only. Purchase accounting events are
    /// settlement steps and are retried until the sink accepts them.
    fn emit(&self, event: &SaleEvent) {
        if let Err(e) = self.events.emit(event) {
            warn!(kind = event.kind(), error = %e, "event sink rejected event");
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn state(&self) -> SaleState {
        self.lock().state(self.clock.now())
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    pub fn config(&self) -> Option<SaleConfig> {
        self.lock().terms.as_ref().map(|t| t.config.clone())
    }

    /// Empty before configuration.
    pub fn tiers(&self) -> Vec<Tier> {
        self.lock()
            .terms
            .as_ref()
            .map(|t| t.tiers.tiers().to_vec())
            .unwrap_or_default()
    }

    pub fn investor(&self, investor: &InvestorId) -> Option<InvestorCapState> {
        self.lock().caps.state(investor).cloned()
    }

    pub fn purchase_record(&self, purchase_id: &Uuid) -> Option<PurchaseRecord> {
        self.lock().purchases.get(purchase_id).cloned()
    }

    pub fn pending_settlements(&self) -> Vec<Uuid> {
        self.lock()
            .purchases
            .values()
            .filter(|r| !r.is_settled())
            .map(|r| r.purchase_id)
            .collect()
    }

    pub fn stats(&self) -> SaleStats {
        let book = self.lock();
        let now = self.clock.now();
        let tiers = book.terms.as_ref().map(|t| &t.tiers);
        SaleStats {
            sale_id: book.terms.as_ref().map(|t| t.config.sale_id),
            state: book.state(now),
            paused: book.paused,
            finalized: book.finalized,
            version: book.version,
            tokens_sold: tiers.map_or(TokenAmount::ZERO, TierLedger::total_sold),
            tokens_remaining: tiers.map_or(TokenAmount::ZERO, TierLedger::total_remaining),
            units_raised: book.units_raised,
            funds_raised: book.funds_raised.clone(),
            tokens_sold_by_currency: book.tokens_by_currency.clone(),
            investor_count: book.caps.investor_count(),
            purchase_count: book.purchases.len(),
            pending_settlements: book
                .purchases
                .values()
                .filter(|r| !r.is_settled())
                .count(),
            current_tier: tiers.and_then(TierLedger::current_tier),
        }
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    fn admin<F>(&self, field: &str, change: F) -> Result<(), SaleError>
    where
        F: FnOnce(&mut Book) -> Result<(), SaleError>,
    {
        let version = {
            let mut book = self.lock();
            let state = book.state(self.clock.now());
            if !state.accepts_config_changes() {
                debug!(field, %state, "config change refused");
                return Err(SaleError::ConfigLocked { state });
            }
            change(&mut book)?;
            book.version += 1;
            book.version
        };
        info!(field, version, "sale config changed");
        self.emit(&SaleEvent::ConfigChanged {
            field: field.to_string(),
            version,
        });
        Ok(())
    }

    pub fn configure(&self, config: SaleConfig, tiers: Vec<TierSpec>) -> Result<(), SaleError> {
        config
            .validate()
            .map_err(|reason| SaleError::InvalidConfig { reason })?;
        let tiers = TierLedger::new(tiers).map_err(|e| SaleError::InvalidConfig {
            reason: e.to_string(),
        })?;
        self.admin("configure", move |book| {
            book.caps.set_non_accredited_limit(config.non_accredited_limit);
            book.terms = Some(Terms { config, tiers });
            Ok(())
        })
    }

    pub fn set_tiers(&self, tiers: Vec<TierSpec>) -> Result<(), SaleError> {
        let tiers = TierLedger::new(tiers).map_err(|e| SaleError::InvalidConfig {
            reason: e.to_string(),
        })?;
        self.admin("tiers", move |book| {
            book.terms_mut()?.tiers = tiers;
            Ok(())
        })
    }

    pub fn set_limits(
        &self,
        non_accredited_limit: Units,
        minimum_investment: Units,
    ) -> Result<(), SaleError> {
        self.admin("limits", move |book| {
            let config = &mut book.terms_mut()?.config;
            config.non_accredited_limit = non_accredited_limit;
            config.minimum_investment = minimum_investment;
            book.caps.set_non_accredited_limit(non_accredited_limit);
            Ok(())
        })
    }

    pub fn set_accepted_currencies(
        &self,
        accepted: BTreeSet<CurrencyKind>,
        discount_currency: Option<CurrencyKind>,
    ) -> Result<(), SaleError> {
        self.admin("accepted_currencies", move |book| {
            let terms = book.terms_mut()?;
            let mut next = terms.config.clone();
            next.accepted_currencies = accepted;
            next.discount_currency = discount_currency;
            next.validate()
                .map_err(|reason| SaleError::InvalidConfig { reason })?;
            terms.config = next;
            Ok(())
        })
    }

    pub fn set_times(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), SaleError> {
        self.admin("times", move |book| {
            let terms = book.terms_mut()?;
            let mut next = terms.config.clone();
            next.start_time = start;
            next.end_time = end;
            next.validate()
                .map_err(|reason| SaleError::InvalidConfig { reason })?;
            terms.config = next;
            Ok(())
        })
    }

    pub fn set_limit_override(&self, investor: InvestorId, limit: Units) -> Result<(), SaleError> {
        self.admin("limit_override", move |book| {
            book.terms()?;
            book.caps.set_limit_override(investor, limit);
            Ok(())
        })
    }

    pub fn set_allow_beneficial_investments(&self, allow: bool) -> Result<(), SaleError> {
        self.admin("allow_beneficial_investments", move |book| {
            book.terms_mut()?.config.allow_beneficial_investments = allow;
            Ok(())
        })
    }

    /// Idempotent; a repeated pause emits nothing.
    pub fn pause(&self) -> Result<(), SaleError> {
        self.set_paused(true)
    }

    pub fn unpause(&self) -> Result<(), SaleError> {
        self.set_paused(false)
    }

    fn set_paused(&self, paused: bool) -> Result<(), SaleError> {
        let version = {
            let mut book = self.lock();
            book.terms()?;
            if book.paused == paused {
                return Ok(());
            }
            book.paused = paused;
            book.version += 1;
            book.version
        };
        info!(paused, version, "sale pause flag changed");
        self.emit(&if paused {
            SaleEvent::Paused { version }
        } else {
            SaleEvent::Unpaused { version }
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Purchases
    // -----------------------------------------------------------------------

    /// Everything that can be decided without the book lock.
    fn check(&self, req: &PurchaseRequest) -> Result<Checked, SaleError> {
        if req.amount.is_zero() {
            return Err(SaleError::InvalidAmount);
        }
        let config = self.config().ok_or(SaleError::SaleNotOpen {
            state: SaleState::Unconfigured,
        })?;
        if !config.accepted_currencies.contains(&req.currency) {
            return Err(SaleError::UnsupportedCurrency {
                currency: req.currency.clone(),
            });
        }
        let beneficiary = req.beneficiary();
        if beneficiary != &req.buyer && !config.allow_beneficial_investments {
            return Err(SaleError::BeneficiaryNotAllowed {
                buyer: req.buyer.clone(),
                beneficiary: beneficiary.clone(),
            });
        }

        let verdict = self
            .compliance
            .check(beneficiary)
            .map_err(SaleError::Collaborator)?;
        if !verdict.allowed {
            return Err(SaleError::NotWhitelisted {
                investor: beneficiary.clone(),
            });
        }

        let rate = self
            .rates
            .rate(&req.currency)
            .map_err(SaleError::RateUnavailable)?;

        Ok(Checked {
            class: verdict.class,
            rate,
        })
    }

    /// What `purchase` would allocate right now. Mutates nothing.
    pub fn preview(&self, req: &PurchaseRequest) -> Result<AllocationPlan, SaleError> {
        let checked = self.check(req)?;
        let book = self.lock();
        book.plan(req, &checked, self.clock.now())
    }

    pub fn purchase(&self, req: PurchaseRequest) -> Result<PurchaseReceipt, SaleError> {
        let result = self.purchase_inner(&req);
        if let Err(e) = &result {
            debug!(
                buyer = %req.buyer,
                currency = %req.currency,
                amount = %req.amount,
                code = e.code(),
                "purchase rejected"
            );
        }
        result
    }

    fn purchase_inner(&self, req: &PurchaseRequest) -> Result<PurchaseReceipt, SaleError> {
        let checked = self.check(req)?;

        let record = {
            let mut book = self.lock();
            let now = self.clock.now();

            if let Some(id) = req.purchase_id {
                if book.purchases.contains_key(&id) {
                    return Err(SaleError::DuplicatePurchase { purchase_id: id });
                }
            }

            let plan = book.plan(req, &checked, now)?;
            let r = &plan.result;

            let units_raised = book
                .units_raised
                .checked_add(r.unit_of_account_consumed)
                .ok_or(SaleError::Overflow {
                    stage: "units raised",
                })?;
            let funds = book
                .funds_raised
                .get(&req.currency)
                .copied()
                .unwrap_or_default()
                .checked_add(r.currency_amount_consumed)
                .ok_or(SaleError::Overflow {
                    stage: "funds raised",
                })?;
            let sold = book
                .tokens_by_currency
                .get(&req.currency)
                .copied()
                .unwrap_or_default()
                .checked_add(r.tokens_allocated)
                .ok_or(SaleError::Overflow {
                    stage: "tokens by currency",
                })?;

            let sale_id = {
                let Book { terms, caps, .. } = &mut *book;
                let terms = terms.as_mut().ok_or(SaleError::NotConfigured)?;
                commit_plan(&plan, &mut terms.tiers, caps)?;
                terms.config.sale_id
            };

            book.units_raised = units_raised;
            book.funds_raised.insert(req.currency.clone(), funds);
            book.tokens_by_currency.insert(req.currency.clone(), sold);

            let purchase_id = match req.purchase_id {
                Some(id) => id,
                None => book.next_purchase_id(sale_id),
            };
            let record = PurchaseRecord {
                purchase_id,
                buyer: req.buyer.clone(),
                beneficiary: req.beneficiary().clone(),
                class: checked.class,
                rate: checked.rate,
                plan,
                committed_at: now,
                settlement: SettlementProgress::default(),
            };
            book.purchases.insert(purchase_id, record.clone());
            book.version += 1;
            record
        };

        let r = &record.plan.result;
        info!(
            purchase_id = %record.purchase_id,
            investor = %record.beneficiary,
            currency = %record.plan.currency,
            tokens = %r.tokens_allocated,
            units = %r.unit_of_account_consumed,
            refunded = %r.currency_amount_refunded,
            "purchase committed"
        );

        let settlement = self.settle(record.purchase_id)?;
        Ok(PurchaseReceipt {
            purchase_id: record.purchase_id,
            plan: record.plan,
            settlement,
        })
    }

    // -----------------------------------------------------------------------
    // Settlement
    // -----------------------------------------------------------------------

    /// Replay the outstanding post-commit steps of a purchase.
    pub fn retry_settlement(&self, purchase_id: Uuid) -> Result<SettlementStatus, SaleError> {
        let status = self.settle(purchase_id)?;
        info!(%purchase_id, ?status, "settlement retried");
        Ok(status)
    }

    fn settle(&self, purchase_id: Uuid) -> Result<SettlementStatus, SaleError> {
        let (record, destination) = {
            let mut book = self.lock();
            let destination = book.terms()?.config.settlement_destination.clone();
            let record = book
                .purchases
                .get_mut(&purchase_id)
                .ok_or(SaleError::UnknownPurchase { purchase_id })?;
            if record.is_settled() {
                return Ok(SettlementStatus::Complete);
            }
            if record.settlement.in_flight {
                return Ok(SettlementStatus::Pending {
                    reason: "settlement in progress".to_string(),
                });
            }
            record.settlement.in_flight = true;
            record.settlement.attempts += 1;
            (record.clone(), destination)
        };

        let mut progress = record.settlement.clone();
        let outcome = self.run_settlement(&record, &destination, &mut progress);

        {
            let mut book = self.lock();
            if let Some(stored) = book.purchases.get_mut(&purchase_id) {
                progress.in_flight = false;
                progress.last_error = outcome.as_ref().err().map(|e| e.to_string());
                stored.settlement = progress;
            }
        }

        match outcome {
            Ok(()) => Ok(SettlementStatus::Complete),
            Err(e) => {
                warn!(%purchase_id, error = %e, "settlement pending");
                Ok(SettlementStatus::Pending {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Record fills, issue, forward, refund. Accounting events are steps of
    /// their own, so an event the sink rejected is re-emitted on retry. Each
    /// step lands at most once; stops at the first failure with `progress`
    /// reflecting what landed.
    fn run_settlement(
        &self,
        record: &PurchaseRecord,
        destination: &str,
        progress: &mut SettlementProgress,
    ) -> Result<(), CollaboratorError> {
        let r = &record.plan.result;
        let currency = &record.plan.currency;

        for fill in record.plan.fills.iter().skip(progress.fills_recorded) {
            self.events.emit(&SaleEvent::TokenPurchase {
                purchase_id: record.purchase_id,
                buyer: record.buyer.clone(),
                beneficiary: record.beneficiary.clone(),
                currency: currency.clone(),
                tier_index: fill.tier_index,
                is_discount: fill.is_discount,
                tokens: fill.tokens,
                units: fill.units,
                price: fill.price,
            })?;
            progress.fills_recorded += 1;
        }

        if !progress.issued {
            self.tokens
                .issue(record.purchase_id, &record.beneficiary, r.tokens_allocated)?;
            progress.issued = true;
        }

        if !progress.forwarded {
            self.funds.forward(
                record.purchase_id,
                currency,
                r.currency_amount_consumed,
                destination,
            )?;
            progress.forwarded = true;
        }
        if !progress.funds_recorded {
            self.events.emit(&SaleEvent::FundsReceived {
                purchase_id: record.purchase_id,
                currency: currency.clone(),
                amount: r.currency_amount_consumed,
                destination: destination.to_string(),
            })?;
            progress.funds_recorded = true;
        }

        if r.currency_amount_refunded.is_zero() {
            progress.refunded = true;
            progress.refund_recorded = true;
            return Ok(());
        }
        if !progress.refunded {
            self.funds.refund(
                record.purchase_id,
                currency,
                r.currency_amount_refunded,
                &record.buyer,
            )?;
            progress.refunded = true;
        }
        if !progress.refund_recorded {
            self.events.emit(&SaleEvent::Refunded {
                purchase_id: record.purchase_id,
                investor: record.buyer.clone(),
                currency: currency.clone(),
                amount: r.currency_amount_refunded,
            })?;
            progress.refund_recorded = true;
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Finalize
    // -----------------------------------------------------------------------

    /// Issue unsold tokens to the treasury once the sale has closed.
    ///
    /// A ledger failure leaves the sale unfinalized; calling again retries
    /// with the same issuance id.
    pub fn finalize(&self) -> Result<TokenAmount, SaleError> {
        let (sale_id, treasury, unsold, sold) = {
            let mut book = self.lock();
            if book.finalized {
                return Err(SaleError::AlreadyFinalized);
            }
            let state = book.state(self.clock.now());
            if state != SaleState::Closed {
                return Err(SaleError::SaleNotClosed { state });
            }
            if book.finalizing {
                return Err(SaleError::Collaborator(CollaboratorError::new(
                    "token ledger",
                    "finalize already in progress",
                )));
            }
            let terms = book.terms()?;
            let snapshot = (
                terms.config.sale_id,
                terms.config.treasury.clone(),
                terms.tiers.total_remaining(),
                terms.tiers.total_sold(),
            );
            book.finalizing = true;
            snapshot
        };

        let issued = if unsold.is_zero() {
            Ok(())
        } else {
            self.tokens
                .issue(Uuid::new_v5(&sale_id, b"finalize"), &treasury, unsold)
        };

        let version = {
            let mut book = self.lock();
            book.finalizing = false;
            if let Err(e) = issued {
                drop(book);
                warn!(error = %e, "finalize failed");
                return Err(SaleError::Collaborator(e));
            }
            book.finalized = true;
            book.version += 1;
            book.version
        };

        info!(%treasury, unsold = %unsold, sold = %sold, version, "sale finalized");
        self.emit(&SaleEvent::Finalized {
            treasury,
            unsold_tokens: unsold,
            tokens_sold: sold,
        });
        Ok(unsold)
    }
}
