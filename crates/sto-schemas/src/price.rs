//! Tier price as an exact ratio.
//!
//! `Price { units, tokens }` reads "`units` unit-of-account base units buy
//! `tokens` token base units". Keeping both sides lets a tier quote prices
//! finer than one unit-of-account base unit per token base unit without
//! floating point.
//!
//! # Rounding
//!
//! Both conversions round in the sale's favour:
//!
//! - [`Price::tokens_for`] floors (the investor never gets a partial token
//!   base unit they did not fully pay for).
//! - [`Price::cost_of`] ceils (a token amount never costs less than its exact
//!   value).
//!
//! Consequently `cost_of(tokens_for(u)) <= u` for every `u`.

use crate::{TokenAmount, Units};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// `floor(a * b / c)`; `None` on overflow or `c == 0`.
#[inline]
pub fn mul_div_floor(a: u128, b: u128, c: u128) -> Option<u128> {
    if c == 0 {
        return None;
    }
    a.checked_mul(b).map(|p| p / c)
}

/// `ceil(a * b / c)`; `None` on overflow or `c == 0`.
#[inline]
pub fn mul_div_ceil(a: u128, b: u128, c: u128) -> Option<u128> {
    if c == 0 {
        return None;
    }
    let p = a.checked_mul(b)?;
    let q = p / c;
    if p % c == 0 {
        Some(q)
    } else {
        q.checked_add(1)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Price {
    #[serde(with = "crate::dec")]
    units: u128,
    #[serde(with = "crate::dec", default = "one")]
    tokens: u128,
}

fn one() -> u128 {
    1
}

impl Price {
    /// `None` when either side is zero.
    pub fn new(units: u128, tokens: u128) -> Option<Self> {
        if units == 0 || tokens == 0 {
            return None;
        }
        Some(Self { units, tokens })
    }

    /// Whole price per single token base unit.
    pub fn per_token(units: u128) -> Option<Self> {
        Self::new(units, 1)
    }

    pub fn units(&self) -> u128 {
        self.units
    }

    pub fn tokens(&self) -> u128 {
        self.tokens
    }

    /// A deserialized price may carry zeros; callers validating config use this.
    pub fn is_valid(&self) -> bool {
        self.units > 0 && self.tokens > 0
    }

    /// Token base units purchasable with `budget` (floored).
    pub fn tokens_for(&self, budget: Units) -> Option<TokenAmount> {
        mul_div_floor(budget.raw(), self.tokens, self.units).map(TokenAmount::new)
    }

    /// Unit-of-account cost of `amount` (ceiled).
    pub fn cost_of(&self, amount: TokenAmount) -> Option<Units> {
        mul_div_ceil(amount.raw(), self.units, self.tokens).map(Units::new)
    }

    /// Exact ratio comparison (`self.units/self.tokens` vs `other`).
    ///
    /// `None` only if the cross products overflow.
    pub fn checked_cmp(&self, other: &Price) -> Option<Ordering> {
        let lhs = self.units.checked_mul(other.tokens)?;
        let rhs = other.units.checked_mul(self.tokens)?;
        Some(lhs.cmp(&rhs))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tokens == 1 {
            write!(f, "{}", self.units)
        } else {
            write!(f, "{}/{}", self.units, self.tokens)
        }
    }
}
