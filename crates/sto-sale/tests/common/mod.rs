#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use sto_config::SaleConfig;
use sto_rates::{FixedRateSource, Rate};
use sto_sale::memory::{
    InMemoryTokenLedger, ManualClock, MemoryEventSink, RecordingSettlement, StaticCompliance,
};
use sto_sale::{Collaborators, EventSink, FanoutSink, PurchaseRequest, SaleController};
use sto_schemas::{CurrencyAmount, CurrencyKind, InvestorClass, InvestorId, Price, TokenAmount, Units};
use sto_tiers::TierSpec;
use uuid::Uuid;

pub fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}

pub fn start() -> DateTime<Utc> {
    ts(2026, 3, 1)
}

pub fn end() -> DateTime<Utc> {
    ts(2026, 4, 1)
}

pub fn during() -> DateTime<Utc> {
    ts(2026, 3, 10)
}

pub fn usd() -> CurrencyKind {
    CurrencyKind::new("USD")
}

pub fn poly() -> CurrencyKind {
    CurrencyKind::new("POLY")
}

pub fn eth() -> CurrencyKind {
    CurrencyKind::new("ETH")
}

pub fn id(s: &str) -> InvestorId {
    InvestorId::new(s)
}

pub fn t(n: u128) -> TokenAmount {
    TokenAmount::new(n)
}

pub fn u(n: u128) -> Units {
    Units::new(n)
}

pub fn c(n: u128) -> CurrencyAmount {
    CurrencyAmount::new(n)
}

pub fn sale_id() -> Uuid {
    Uuid::parse_str("0b8c1f9e-5a7d-4c3b-9e21-6f4a2d8c7b10").unwrap()
}

/// Open 2026-03-01..2026-04-01. USD at par, POLY at 1/2 and discount-eligible.
/// Non-accredited limit 50 units.
pub fn config() -> SaleConfig {
    SaleConfig {
        sale_id: sale_id(),
        start_time: start(),
        end_time: end(),
        non_accredited_limit: u(50),
        minimum_investment: u(0),
        accepted_currencies: BTreeSet::from([usd(), poly()]),
        discount_currency: Some(poly()),
        settlement_destination: "escrow:test".to_string(),
        treasury: id("treasury"),
        rate_tolerance_secs: 600,
        allow_beneficial_investments: false,
    }
}

/// Tier 0: 100 tokens at 1 unit, 20 of them at 1/2 for POLY.
/// Tier 1: 100 tokens at 2 units.
pub fn tiers() -> Vec<TierSpec> {
    vec![
        TierSpec::regular(Price::per_token(1).unwrap(), t(100))
            .with_discount(Price::new(1, 2).unwrap(), t(20)),
        TierSpec::regular(Price::per_token(2).unwrap(), t(100)),
    ]
}

pub struct Harness {
    pub sale: SaleController,
    pub compliance: Arc<StaticCompliance>,
    pub rates: Arc<FixedRateSource>,
    pub tokens: Arc<InMemoryTokenLedger>,
    pub funds: Arc<RecordingSettlement>,
    pub events: Arc<MemoryEventSink>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// Configured, clock inside the window, rates stamped now.
    pub fn open() -> Self {
        let h = Self::unconfigured(during());
        h.sale.configure(config(), tiers()).unwrap();
        h
    }

    pub fn unconfigured(now: DateTime<Utc>) -> Self {
        Self::with_events(now, None)
    }

    /// `extra` receives events alongside the in-memory sink.
    pub fn with_events(now: DateTime<Utc>, extra: Option<Arc<dyn EventSink>>) -> Self {
        let compliance = Arc::new(StaticCompliance::new());
        compliance.allow(id("alice"), InvestorClass::Accredited);
        compliance.allow(id("bob"), InvestorClass::NonAccredited);
        compliance.allow(id("carol"), InvestorClass::Accredited);

        let clock = Arc::new(ManualClock::new(now));
        let rates = Arc::new(FixedRateSource::new());
        let tokens = Arc::new(InMemoryTokenLedger::new());
        let funds = Arc::new(RecordingSettlement::new());
        let events = Arc::new(MemoryEventSink::new());

        let sink: Arc<dyn EventSink> = match extra {
            Some(extra) => Arc::new(FanoutSink::new(vec![
                events.clone() as Arc<dyn EventSink>,
                extra,
            ])),
            None => events.clone(),
        };

        let sale = SaleController::new(Collaborators {
            compliance: compliance.clone(),
            rates: rates.clone(),
            tokens: tokens.clone(),
            funds: funds.clone(),
            events: sink,
            clock: clock.clone(),
        });
        let h = Self {
            sale,
            compliance,
            rates,
            tokens,
            funds,
            events,
            clock,
        };
        h.stamp_rates(now);
        h
    }

    pub fn stamp_rates(&self, as_of: DateTime<Utc>) {
        self.rates.set(usd(), Rate::new(1, 1, as_of));
        self.rates.set(poly(), Rate::new(1, 2, as_of));
    }

    pub fn buy(&self, who: &str, currency: CurrencyKind, amount: u128) -> PurchaseRequest {
        PurchaseRequest::new(id(who), currency, c(amount))
    }
}
