//! Shared runtime state for sto-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The sale controller is
//! synchronous and holds its lock only for in-memory work, so handlers call
//! it directly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sto_config::{AdminToken, LoadedConfig};
use sto_rates::FixedRateSource;
use sto_sale::memory::{InMemoryTokenLedger, RecordingSettlement, StaticCompliance};
use sto_sale::{
    Clock, CollaboratorError, Collaborators, EventSink, FanoutSink, JournalSink, SaleController,
    SaleEvent, SaleStats,
};
use tokio::sync::broadcast;
use tracing::info;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Status { stats: SaleStats },
    Sale { event: SaleEvent },
    LogLine { level: String, msg: String },
}

/// Forwards sale events onto the bus. Having no subscribers is not an error.
pub struct BusSink {
    bus: broadcast::Sender<BusMsg>,
}

impl BusSink {
    pub fn new(bus: broadcast::Sender<BusMsg>) -> Self {
        Self { bus }
    }
}

impl EventSink for BusSink {
    fn emit(&self, event: &SaleEvent) -> Result<(), CollaboratorError> {
        let _ = self.bus.send(BusMsg::Sale {
            event: event.clone(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub config_hash: String,
    pub sale: SaleController,
    /// In-memory allow-list; edited through `/v1/admin/whitelist`.
    pub compliance: Arc<StaticCompliance>,
    /// Quotes pushed through `/v1/admin/rates`, seeded from `/rates`.
    pub rates: Arc<FixedRateSource>,
    pub clock: Arc<dyn Clock>,
    /// `None` keeps every admin route closed.
    pub admin_token: Option<AdminToken>,
}

impl AppState {
    /// Build the sale from a loaded config document.
    ///
    /// Reads `/sale`, `/tiers`, `/rates` and `/daemon/journal_path`. The
    /// admin token is resolved by the caller so tests can inject one.
    pub fn boot(
        loaded: &LoadedConfig,
        admin_token: Option<AdminToken>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let setup = loaded.sale_setup()?;
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);

        let now = clock.now();
        let rates = Arc::new(FixedRateSource::new());
        for (currency, quote) in &setup.rates {
            rates.set(currency.clone(), quote.at(now));
        }
        let compliance = Arc::new(StaticCompliance::new());

        let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(BusSink::new(bus.clone()))];
        if let Some(path) = journal_path(&loaded.config_json) {
            let journal = JournalSink::open(&path, setup.config.sale_id)
                .with_context(|| format!("open journal failed: {}", path.display()))?;
            info!(path = %path.display(), entries = journal.entries(), "journal attached");
            sinks.push(Arc::new(journal));
        }

        let sale = SaleController::with_setup(
            Collaborators {
                compliance: compliance.clone(),
                rates: rates.clone(),
                tokens: Arc::new(InMemoryTokenLedger::new()),
                funds: Arc::new(RecordingSettlement::new()),
                events: Arc::new(FanoutSink::new(sinks)),
                clock: clock.clone(),
            },
            setup.config,
            setup.tiers,
        )
        .context("configure sale")?;

        Ok(Self {
            bus,
            build: BuildInfo {
                service: "sto-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            config_hash: loaded.config_hash.clone(),
            sale,
            compliance,
            rates,
            clock,
            admin_token,
        })
    }
}

fn journal_path(config_json: &Value) -> Option<PathBuf> {
    config_json
        .pointer("/daemon/journal_path")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Spawn a background task that replays pending settlements every `interval`.
pub fn spawn_settlement_retry(state: Arc<AppState>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for purchase_id in state.sale.pending_settlements() {
                if let Ok(status) = state.sale.retry_settlement(purchase_id) {
                    let _ = state.bus.send(BusMsg::LogLine {
                        level: "INFO".to_string(),
                        msg: format!("settlement retry {purchase_id}: {status:?}"),
                    });
                }
            }
        }
    });
}
