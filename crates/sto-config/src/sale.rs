use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use sto_rates::Rate;
use sto_schemas::{dec, CurrencyKind, InvestorId, Price, TokenAmount, Units};
use sto_tiers::{TierLedger, TierSpec};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SaleConfig
// ---------------------------------------------------------------------------

/// Static parameters of one sale. Tiers are carried separately.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleConfig {
    pub sale_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub non_accredited_limit: Units,
    /// Applies to an investor's first purchase only.
    pub minimum_investment: Units,
    pub accepted_currencies: BTreeSet<CurrencyKind>,
    /// Currency that may buy from discounted sub-allocations.
    pub discount_currency: Option<CurrencyKind>,
    /// Where consumed funds are forwarded.
    pub settlement_destination: String,
    /// Receives unsold tokens on finalize.
    pub treasury: InvestorId,
    pub rate_tolerance_secs: i64,
    pub allow_beneficial_investments: bool,
}

impl SaleConfig {
    /// Cross-field checks. Tier checks live in `TierLedger::new`.
    pub fn validate(&self) -> Result<(), String> {
        if self.end_time <= self.start_time {
            return Err(format!(
                "end_time {} must be after start_time {}",
                self.end_time, self.start_time
            ));
        }
        if self.accepted_currencies.is_empty() {
            return Err("accepted_currencies must not be empty".to_string());
        }
        if let Some(dc) = &self.discount_currency {
            if !self.accepted_currencies.contains(dc) {
                return Err(format!("discount_currency {dc} is not an accepted currency"));
            }
        }
        if self.rate_tolerance_secs <= 0 {
            return Err("rate_tolerance_secs must be > 0".to_string());
        }
        if self.settlement_destination.trim().is_empty() {
            return Err("settlement_destination must not be empty".to_string());
        }
        if self.treasury.as_str().trim().is_empty() {
            return Err("treasury must not be empty".to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RateQuote
// ---------------------------------------------------------------------------

/// A configured conversion ratio without a timestamp. Simulation stamps it
/// with the purchase time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateQuote {
    #[serde(with = "dec")]
    pub numerator: u128,
    #[serde(with = "dec")]
    pub denominator: u128,
}

impl RateQuote {
    pub fn at(&self, as_of: DateTime<Utc>) -> Rate {
        Rate::new(self.numerator, self.denominator, as_of)
    }
}

// ---------------------------------------------------------------------------
// SaleSetup
// ---------------------------------------------------------------------------

/// Everything a sale needs from the config document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaleSetup {
    pub config: SaleConfig,
    pub tiers: Vec<TierSpec>,
    /// `/rates`; empty when absent.
    pub rates: BTreeMap<CurrencyKind, RateQuote>,
}

impl SaleSetup {
    pub fn from_config_json(config: &Value) -> Result<Self> {
        let sale_config = SaleConfig {
            sale_id: Uuid::parse_str(&required_str(config, "/sale/sale_id")?)
                .context("/sale/sale_id: not a uuid")?,
            start_time: read_time(config, "/sale/start_time")?,
            end_time: read_time(config, "/sale/end_time")?,
            non_accredited_limit: Units::new(required_u128(config, "/sale/non_accredited_limit")?),
            minimum_investment: Units::new(read_u128(config, "/sale/minimum_investment")?.unwrap_or(0)),
            accepted_currencies: read_currencies(config, "/sale/accepted_currencies")?,
            discount_currency: read_str(config, "/sale/discount_currency")?.map(CurrencyKind::new),
            settlement_destination: required_str(config, "/sale/settlement_destination")?,
            treasury: InvestorId::new(required_str(config, "/sale/treasury")?),
            rate_tolerance_secs: read_i64(config, "/sale/rate_tolerance_secs")?.unwrap_or(3_600),
            allow_beneficial_investments: read_bool(config, "/sale/allow_beneficial_investments")?
                .unwrap_or(false),
        };
        sale_config
            .validate()
            .map_err(|reason| anyhow!("CONFIG_INVALID /sale: {reason}"))?;

        let tiers = read_tiers(config)?;
        TierLedger::new(tiers.clone()).context("CONFIG_INVALID /tiers")?;

        let rates = read_rates(config)?;

        Ok(Self {
            config: sale_config,
            tiers,
            rates,
        })
    }
}

/// `"3"` is 3 units per token; `"7/2"` is 7 units per 2 tokens.
pub fn parse_price(s: &str) -> Option<Price> {
    match s.split_once('/') {
        Some((u, t)) => Price::new(dec::parse_u128(u.trim())?, dec::parse_u128(t.trim())?),
        None => Price::per_token(dec::parse_u128(s.trim())?),
    }
}

// ---------------------------------------------------------------------------
// Pointer readers
// ---------------------------------------------------------------------------

fn read_str(config: &Value, ptr: &str) -> Result<Option<String>> {
    match config.pointer(ptr) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(other) => bail!("{ptr}: expected string, got {other}"),
    }
}

fn required_str(config: &Value, ptr: &str) -> Result<String> {
    read_str(config, ptr)?.ok_or_else(|| anyhow!("{ptr}: required"))
}

/// Integers or decimal strings. Large values must be quoted: YAML turns
/// them into floats.
fn read_u128(config: &Value, ptr: &str) -> Result<Option<u128>> {
    value_u128(config.pointer(ptr), ptr)
}

fn value_u128(v: Option<&Value>, ptr: &str) -> Result<Option<u128>> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|n| Some(n as u128))
            .ok_or_else(|| anyhow!("{ptr}: expected a non-negative integer, got {n}")),
        Some(Value::String(s)) => dec::parse_u128(s.trim())
            .map(Some)
            .ok_or_else(|| anyhow!("{ptr}: not a non-negative integer: {s:?}")),
        Some(other) => bail!("{ptr}: expected integer, got {other}"),
    }
}

fn required_u128(config: &Value, ptr: &str) -> Result<u128> {
    read_u128(config, ptr)?.ok_or_else(|| anyhow!("{ptr}: required"))
}

fn read_i64(config: &Value, ptr: &str) -> Result<Option<i64>> {
    match config.pointer(ptr) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| anyhow!("{ptr}: expected integer, got {v}")),
    }
}

fn read_bool(config: &Value, ptr: &str) -> Result<Option<bool>> {
    match config.pointer(ptr) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => bail!("{ptr}: expected bool, got {other}"),
    }
}

fn read_time(config: &Value, ptr: &str) -> Result<DateTime<Utc>> {
    let raw = required_str(config, ptr)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("{ptr}: not RFC 3339: {raw:?}"))
}

fn read_currencies(config: &Value, ptr: &str) -> Result<BTreeSet<CurrencyKind>> {
    let items = config
        .pointer(ptr)
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("{ptr}: required list"))?;
    let mut out = BTreeSet::new();
    for (i, item) in items.iter().enumerate() {
        let s = item
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow!("{ptr}/{i}: expected currency code"))?;
        out.insert(CurrencyKind::new(s));
    }
    Ok(out)
}

fn read_price(v: Option<&Value>, ptr: &str) -> Result<Option<Price>> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|u| Price::per_token(u as u128))
            .map(Some)
            .ok_or_else(|| anyhow!("{ptr}: price must be a positive integer, got {n}")),
        Some(Value::String(s)) => parse_price(s)
            .map(Some)
            .ok_or_else(|| anyhow!("{ptr}: bad price {s:?} (expected \"u\" or \"u/t\")")),
        Some(other) => bail!("{ptr}: expected price, got {other}"),
    }
}

fn read_tiers(config: &Value) -> Result<Vec<TierSpec>> {
    let items = config
        .pointer("/tiers")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("/tiers: required list"))?;

    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let at = |field: &str| format!("/tiers/{i}/{field}");

        let price = read_price(item.get("price"), &at("price"))?
            .ok_or_else(|| anyhow!("{}: required", at("price")))?;
        let capacity = value_u128(item.get("capacity"), &at("capacity"))?
            .ok_or_else(|| anyhow!("{}: required", at("capacity")))?;

        let mut spec = TierSpec::regular(price, TokenAmount::new(capacity));
        let discount_price = read_price(item.get("discount_price"), &at("discount_price"))?;
        let discount_capacity = value_u128(item.get("discount_capacity"), &at("discount_capacity"))?;
        match (discount_price, discount_capacity) {
            (Some(p), Some(c)) => spec = spec.with_discount(p, TokenAmount::new(c)),
            (None, None) => {}
            _ => bail!(
                "/tiers/{i}: discount_price and discount_capacity must be given together"
            ),
        }
        out.push(spec);
    }
    Ok(out)
}

fn read_rates(config: &Value) -> Result<BTreeMap<CurrencyKind, RateQuote>> {
    let Some(v) = config.pointer("/rates") else {
        return Ok(BTreeMap::new());
    };
    let map = v
        .as_object()
        .ok_or_else(|| anyhow!("/rates: expected map of currency -> rate"))?;

    let mut out = BTreeMap::new();
    for (code, raw) in map {
        let ptr = format!("/rates/{code}");
        let quote = match raw {
            Value::Object(_) => serde_json::from_value::<RateQuote>(raw.clone())
                .with_context(|| format!("{ptr}: expected {{numerator, denominator}}"))?,
            Value::String(s) if s.contains('/') => {
                let (n, d) = s.split_once('/').unwrap_or_default();
                RateQuote {
                    numerator: dec::parse_u128(n.trim())
                        .ok_or_else(|| anyhow!("{ptr}: bad numerator in {s:?}"))?,
                    denominator: dec::parse_u128(d.trim())
                        .ok_or_else(|| anyhow!("{ptr}: bad denominator in {s:?}"))?,
                }
            }
            other => RateQuote {
                numerator: value_u128(Some(other), &ptr)?
                    .ok_or_else(|| anyhow!("{ptr}: required"))?,
                denominator: 1,
            },
        };
        if quote.numerator == 0 || quote.denominator == 0 {
            bail!("{ptr}: rate sides must be > 0");
        }
        out.insert(CurrencyKind::new(code.as_str()), quote);
    }
    Ok(out)
}
