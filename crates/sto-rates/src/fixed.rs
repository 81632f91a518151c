//! In-memory rate source.
//!
//! Rates are set explicitly; nothing ticks. Tests move `as_of` backwards to
//! simulate a stalled feed.

use std::collections::BTreeMap;
use std::sync::RwLock;

use sto_schemas::CurrencyKind;

use crate::{Rate, RateError, RateSource};

#[derive(Debug, Default)]
pub struct FixedRateSource {
    rates: RwLock<BTreeMap<CurrencyKind, Rate>>,
}

impl FixedRateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rates<I>(items: I) -> Self
    where
        I: IntoIterator<Item = (CurrencyKind, Rate)>,
    {
        let src = Self::new();
        for (c, r) in items {
            src.set(c, r);
        }
        src
    }

    pub fn set(&self, currency: CurrencyKind, rate: Rate) {
        // Poisoning cannot leave the map half-written.
        let mut g = self.rates.write().unwrap_or_else(|e| e.into_inner());
        g.insert(currency, rate);
    }

    pub fn remove(&self, currency: &CurrencyKind) {
        let mut g = self.rates.write().unwrap_or_else(|e| e.into_inner());
        g.remove(currency);
    }
}

impl RateSource for FixedRateSource {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn rate(&self, currency: &CurrencyKind) -> Result<Rate, RateError> {
        let g = self.rates.read().unwrap_or_else(|e| e.into_inner());
        g.get(currency).cloned().ok_or_else(|| RateError::Missing {
            currency: currency.clone(),
        })
    }
}
