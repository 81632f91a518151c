//! `sto simulate`: replay a purchase script against in-memory collaborators.
//!
//! Each scripted purchase moves the clock to its `at` and restamps every
//! configured rate at that instant, so only the sale's own rules decide the
//! outcome.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use sto_config::SaleSetup;
use sto_rates::FixedRateSource;
use sto_sale::memory::{
    InMemoryTokenLedger, ManualClock, MemoryEventSink, RecordingSettlement, StaticCompliance,
};
use sto_sale::{
    Collaborators, EventSink, FanoutSink, JournalSink, PurchaseRequest, SaleController, SaleStats,
    SettlementStatus,
};
use sto_schemas::{
    CurrencyAmount, CurrencyKind, InvestorClass, InvestorId, TokenAmount, Units,
};
use tracing::info;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Script
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    /// Whitelisted investors. Anyone else is denied by compliance.
    #[serde(default)]
    pub investors: Vec<ScriptInvestor>,
    pub purchases: Vec<ScriptPurchase>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptInvestor {
    pub id: InvestorId,
    pub class: InvestorClass,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptPurchase {
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub purchase_id: Option<Uuid>,
    pub buyer: InvestorId,
    #[serde(default)]
    pub beneficiary: Option<InvestorId>,
    pub currency: CurrencyKind,
    pub amount: CurrencyAmount,
    #[serde(default)]
    pub min_tokens: Option<TokenAmount>,
}

impl ScriptPurchase {
    fn request(&self) -> PurchaseRequest {
        PurchaseRequest {
            purchase_id: self.purchase_id,
            buyer: self.buyer.clone(),
            beneficiary: self.beneficiary.clone(),
            currency: self.currency.clone(),
            amount: self.amount,
            min_tokens: self.min_tokens,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Committed {
        index: usize,
        purchase_id: Uuid,
        tokens: TokenAmount,
        units: Units,
        kept: CurrencyAmount,
        refunded: CurrencyAmount,
        settlement: SettlementStatus,
    },
    Rejected {
        index: usize,
        code: &'static str,
        message: String,
    },
}

impl Outcome {
    /// One `key=value` line for stdout.
    pub fn line(&self) -> String {
        match self {
            Outcome::Committed {
                index,
                purchase_id,
                tokens,
                units,
                kept,
                refunded,
                settlement,
            } => {
                let settled = matches!(settlement, SettlementStatus::Complete);
                format!(
                    "purchase[{index}] committed purchase_id={purchase_id} tokens={tokens} \
                     units={units} kept={kept} refunded={refunded} settled={settled}"
                )
            }
            Outcome::Rejected {
                index,
                code,
                message,
            } => format!("purchase[{index}] rejected code={code} message=\"{message}\""),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub outcomes: Vec<Outcome>,
    pub stats: SaleStats,
    /// Tokens sent to the treasury, when finalized.
    pub finalized_unsold: Option<TokenAmount>,
    pub journal_entries: Option<u64>,
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub fn run(
    setup: SaleSetup,
    script: &Script,
    journal: Option<&Path>,
    finalize: bool,
) -> Result<SimulationReport> {
    let sale_id = setup.config.sale_id;
    let end_time = setup.config.end_time;

    let compliance = Arc::new(StaticCompliance::new());
    for inv in &script.investors {
        compliance.allow(inv.id.clone(), inv.class);
    }
    let clock = Arc::new(ManualClock::new(setup.config.start_time));
    let rates = Arc::new(FixedRateSource::new());
    let tokens = Arc::new(InMemoryTokenLedger::new());
    let memory_events = Arc::new(MemoryEventSink::new());

    let journal_sink = match journal {
        Some(path) => Some(Arc::new(
            JournalSink::open(path, sale_id)
                .with_context(|| format!("open journal failed: {}", path.display()))?,
        )),
        None => None,
    };
    let events: Arc<dyn EventSink> = match &journal_sink {
        Some(j) => Arc::new(FanoutSink::new(vec![
            memory_events.clone() as Arc<dyn EventSink>,
            j.clone() as Arc<dyn EventSink>,
        ])),
        None => memory_events.clone(),
    };

    let sale = SaleController::with_setup(
        Collaborators {
            compliance,
            rates: rates.clone(),
            tokens,
            funds: Arc::new(RecordingSettlement::new()),
            events,
            clock: clock.clone(),
        },
        setup.config,
        setup.tiers,
    )
    .context("configure sale")?;

    let mut outcomes = Vec::with_capacity(script.purchases.len());
    for (index, p) in script.purchases.iter().enumerate() {
        clock.set(p.at);
        for (currency, quote) in &setup.rates {
            rates.set(currency.clone(), quote.at(p.at));
        }

        let outcome = match sale.purchase(p.request()) {
            Ok(r) => Outcome::Committed {
                index,
                purchase_id: r.purchase_id,
                tokens: r.plan.result.tokens_allocated,
                units: r.plan.result.unit_of_account_consumed,
                kept: r.plan.result.currency_amount_consumed,
                refunded: r.plan.result.currency_amount_refunded,
                settlement: r.settlement,
            },
            Err(e) => Outcome::Rejected {
                index,
                code: e.code(),
                message: e.to_string(),
            },
        };
        outcomes.push(outcome);
    }

    let finalized_unsold = if finalize {
        clock.set(end_time);
        Some(sale.finalize().context("finalize")?)
    } else {
        None
    };

    let stats = sale.stats();
    info!(
        purchases = outcomes.len(),
        tokens_sold = %stats.tokens_sold,
        "simulation complete"
    );

    Ok(SimulationReport {
        outcomes,
        stats,
        finalized_unsold,
        journal_entries: journal_sink.map(|j| j.entries()),
    })
}
