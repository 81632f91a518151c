use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use sto_schemas::{mul_div_ceil, mul_div_floor, CurrencyAmount, CurrencyKind, Units};

// ---------------------------------------------------------------------------
// Rate
// ---------------------------------------------------------------------------

/// One currency base unit is worth `numerator / denominator` unit-of-account
/// base units, as observed at `as_of`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    #[serde(with = "sto_schemas::dec")]
    pub numerator: u128,
    #[serde(with = "sto_schemas::dec")]
    pub denominator: u128,
    pub as_of: DateTime<Utc>,
}

impl Rate {
    pub fn new(numerator: u128, denominator: u128, as_of: DateTime<Utc>) -> Self {
        Self {
            numerator,
            denominator,
            as_of,
        }
    }

    /// A zero side makes the rate unusable in one direction or the other.
    pub fn is_usable(&self) -> bool {
        self.numerator > 0 && self.denominator > 0
    }

    /// Currency → unit of account, truncated toward zero.
    ///
    /// Truncation never grants spend-cap room that was not paid for.
    pub fn to_units(&self, amount: CurrencyAmount) -> Option<Units> {
        mul_div_floor(amount.raw(), self.numerator, self.denominator).map(Units::new)
    }

    /// Unit of account → currency, rounded up.
    ///
    /// The currency kept for `units` is always worth at least `units`.
    pub fn to_currency(&self, units: Units) -> Option<CurrencyAmount> {
        mul_div_ceil(units.raw(), self.denominator, self.numerator).map(CurrencyAmount::new)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Every variant maps to `RateUnavailable` at the sale boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateError {
    /// The source has no rate for this currency.
    Missing { currency: CurrencyKind },
    /// The newest rate is older than the configured tolerance.
    Stale {
        currency: CurrencyKind,
        age_secs: i64,
        tolerance_secs: i64,
    },
    /// The rate is structurally unusable (zero side, future timestamp).
    Invalid {
        currency: CurrencyKind,
        reason: String,
    },
    /// The feed could not be reached.
    Transport(String),
}

impl fmt::Display for RateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateError::Missing { currency } => write!(f, "no rate for currency {currency}"),
            RateError::Stale {
                currency,
                age_secs,
                tolerance_secs,
            } => write!(
                f,
                "stale rate for {currency}: age {age_secs}s exceeds tolerance {tolerance_secs}s"
            ),
            RateError::Invalid { currency, reason } => {
                write!(f, "invalid rate for {currency}: {reason}")
            }
            RateError::Transport(msg) => write!(f, "rate feed transport error: {msg}"),
        }
    }
}

impl std::error::Error for RateError {}

// ---------------------------------------------------------------------------
// Source trait
// ---------------------------------------------------------------------------

/// Upstream rate feed contract.
///
/// Object-safe and `Send + Sync` so a controller can hold
/// `Arc<dyn RateSource>` and share it across request handlers.
pub trait RateSource: Send + Sync {
    /// Human-readable feed name for logs.
    fn name(&self) -> &'static str;

    /// Latest rate for `currency`. Freshness is checked by the caller
    /// against its own clock; see [`check_fresh`].
    fn rate(&self, currency: &CurrencyKind) -> Result<Rate, RateError>;
}

// ---------------------------------------------------------------------------
// Freshness guard
// ---------------------------------------------------------------------------

/// Fail-closed freshness check.
///
/// Rejects when:
/// - either side of the ratio is zero,
/// - `as_of` is after `now` (a feed cannot observe the future),
/// - `now - as_of > tolerance_secs`.
///
/// `tolerance_secs == 0` demands a rate stamped exactly `now`.
pub fn check_fresh(
    currency: &CurrencyKind,
    rate: &Rate,
    now: DateTime<Utc>,
    tolerance_secs: i64,
) -> Result<(), RateError> {
    if !rate.is_usable() {
        return Err(RateError::Invalid {
            currency: currency.clone(),
            reason: "zero numerator or denominator".to_string(),
        });
    }

    let age_secs = (now - rate.as_of).num_seconds();
    if rate.as_of > now {
        return Err(RateError::Invalid {
            currency: currency.clone(),
            reason: format!("as_of {} is after now {}", rate.as_of, now),
        });
    }
    if age_secs > tolerance_secs {
        return Err(RateError::Stale {
            currency: currency.clone(),
            age_secs,
            tolerance_secs,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn to_units_truncates() {
        // 1 currency unit = 3/2 units.
        let r = Rate::new(3, 2, t0());
        assert_eq!(r.to_units(CurrencyAmount::new(5)), Some(Units::new(7)));
    }

    #[test]
    fn to_currency_rounds_up() {
        let r = Rate::new(3, 2, t0());
        // 7 units * 2/3 = 4.67 -> 5
        assert_eq!(r.to_currency(Units::new(7)), Some(CurrencyAmount::new(5)));
        assert_eq!(r.to_currency(Units::new(6)), Some(CurrencyAmount::new(4)));
    }

    #[test]
    fn fresh_within_tolerance() {
        let eth = CurrencyKind::new("ETH");
        let r = Rate::new(1, 1, t0());
        assert!(check_fresh(&eth, &r, t0() + Duration::seconds(60), 60).is_ok());
    }

    #[test]
    fn stale_beyond_tolerance() {
        let eth = CurrencyKind::new("ETH");
        let r = Rate::new(1, 1, t0());
        let err = check_fresh(&eth, &r, t0() + Duration::seconds(61), 60).unwrap_err();
        assert!(matches!(err, RateError::Stale { age_secs: 61, .. }));
    }

    #[test]
    fn future_and_zero_rates_are_invalid() {
        let eth = CurrencyKind::new("ETH");
        let future = Rate::new(1, 1, t0() + Duration::seconds(1));
        assert!(matches!(
            check_fresh(&eth, &future, t0(), 60),
            Err(RateError::Invalid { .. })
        ));
        let zero = Rate::new(0, 1, t0());
        assert!(matches!(
            check_fresh(&eth, &zero, t0(), 60),
            Err(RateError::Invalid { .. })
        ));
    }
}
