use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use sto_config::SaleConfig;

/// `Unconfigured -> Scheduled -> Open -> Closed`, derived on read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleState {
    Unconfigured,
    Scheduled,
    Open,
    Closed,
}

impl SaleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleState::Unconfigured => "UNCONFIGURED",
            SaleState::Scheduled => "SCHEDULED",
            SaleState::Open => "OPEN",
            SaleState::Closed => "CLOSED",
        }
    }

    /// Administrative changes are accepted only before the sale opens.
    pub fn accepts_config_changes(&self) -> bool {
        matches!(self, SaleState::Unconfigured | SaleState::Scheduled)
    }
}

impl fmt::Display for SaleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `[start_time, end_time)` is open unless every tier is exhausted.
pub fn derive_state(config: Option<&SaleConfig>, now: DateTime<Utc>, sold_out: bool) -> SaleState {
    let Some(cfg) = config else {
        return SaleState::Unconfigured;
    };
    if now < cfg.start_time {
        SaleState::Scheduled
    } else if now >= cfg.end_time || sold_out {
        SaleState::Closed
    } else {
        SaleState::Open
    }
}
