use serde::{Deserialize, Serialize};
use std::sync::Arc;
use sto_schemas::{CurrencyAmount, CurrencyKind, InvestorId, Price, TokenAmount, Units};
use uuid::Uuid;

use crate::{CollaboratorError, EventSink};

/// Accounting events, one per observable effect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SaleEvent {
    /// One per sub-allocation touched, in walk order.
    TokenPurchase {
        purchase_id: Uuid,
        buyer: InvestorId,
        beneficiary: InvestorId,
        currency: CurrencyKind,
        tier_index: usize,
        is_discount: bool,
        tokens: TokenAmount,
        units: Units,
        price: Price,
    },
    FundsReceived {
        purchase_id: Uuid,
        currency: CurrencyKind,
        amount: CurrencyAmount,
        destination: String,
    },
    Refunded {
        purchase_id: Uuid,
        investor: InvestorId,
        currency: CurrencyKind,
        amount: CurrencyAmount,
    },
    ConfigChanged {
        field: String,
        version: u64,
    },
    Paused {
        version: u64,
    },
    Unpaused {
        version: u64,
    },
    Finalized {
        treasury: InvestorId,
        unsold_tokens: TokenAmount,
        tokens_sold: TokenAmount,
    },
}

impl SaleEvent {
    /// Journal discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            SaleEvent::TokenPurchase { .. } => "TOKEN_PURCHASE",
            SaleEvent::FundsReceived { .. } => "FUNDS_RECEIVED",
            SaleEvent::Refunded { .. } => "REFUNDED",
            SaleEvent::ConfigChanged { .. } => "CONFIG_CHANGED",
            SaleEvent::Paused { .. } => "PAUSED",
            SaleEvent::Unpaused { .. } => "UNPAUSED",
            SaleEvent::Finalized { .. } => "FINALIZED",
        }
    }
}

/// Delivers every event to each sink in order. The first failure is
/// reported after all sinks have been tried.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &SaleEvent) -> Result<(), CollaboratorError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.emit(event) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &SaleEvent) -> Result<(), CollaboratorError> {
        Ok(())
    }
}
