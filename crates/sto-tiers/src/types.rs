use serde::{Deserialize, Serialize};
use sto_schemas::{Price, TokenAmount};

/// Configured shape of one pricing band.
///
/// `discount_capacity` is a sub-allocation of `total_capacity`, not an
/// addition to it: a discounted sale consumes both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSpec {
    pub regular_price: Price,
    /// Defaults to `regular_price` when a tier has no discount band.
    pub discount_price: Price,
    pub total_capacity: TokenAmount,
    #[serde(default)]
    pub discount_capacity: TokenAmount,
}

impl TierSpec {
    /// A tier with no discounted sub-allocation.
    pub fn regular(price: Price, capacity: TokenAmount) -> Self {
        Self {
            regular_price: price,
            discount_price: price,
            total_capacity: capacity,
            discount_capacity: TokenAmount::ZERO,
        }
    }

    pub fn with_discount(mut self, price: Price, capacity: TokenAmount) -> Self {
        self.discount_price = price;
        self.discount_capacity = capacity;
        self
    }
}

/// A tier with its running counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub spec: TierSpec,
    pub total_sold: TokenAmount,
    pub discount_sold: TokenAmount,
}

impl Tier {
    pub fn new(spec: TierSpec) -> Self {
        Self {
            spec,
            total_sold: TokenAmount::ZERO,
            discount_sold: TokenAmount::ZERO,
        }
    }

    pub fn regular_price(&self) -> Price {
        self.spec.regular_price
    }

    pub fn discount_price(&self) -> Price {
        self.spec.discount_price
    }

    pub fn remaining(&self) -> TokenAmount {
        self.spec.total_capacity.saturating_sub(self.total_sold)
    }

    /// Bounded by both the discount band and the tier as a whole.
    pub fn remaining_discount(&self) -> TokenAmount {
        self.spec
            .discount_capacity
            .saturating_sub(self.discount_sold)
            .min(self.remaining())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining().is_zero()
    }
}
