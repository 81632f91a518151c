//! Tier ledger: the single write boundary for tier sold counters.
//!
//! # Invariants (checked on construction and on every commit)
//!
//! - at least one tier;
//! - every price is a non-zero ratio and `discount_price <= regular_price`;
//! - `0 < total_capacity` and `discount_capacity <= total_capacity`;
//! - the capacities of all tiers sum without overflowing `u128`, so the
//!   totals reported by the read surface are exact;
//! - `discount_sold <= discount_capacity`, `total_sold <= total_capacity`;
//! - counters only ever increase.
//!
//! A failed [`TierLedger::commit`] leaves the ledger untouched.

use std::cmp::Ordering;

use sto_schemas::TokenAmount;

use crate::{Tier, TierSpec};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierLedgerError {
    /// A sale needs at least one tier.
    EmptyTierSet,
    /// Tier failed validation at configuration time.
    InvalidTier { index: usize, reason: String },
    /// `tier_index` is out of range.
    UnknownTier { index: usize },
    /// The commit would push a counter past its capacity.
    CapacityExceeded {
        index: usize,
        requested: TokenAmount,
        remaining: TokenAmount,
    },
}

impl std::fmt::Display for TierLedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTierSet => write!(f, "tier set must contain at least one tier"),
            Self::InvalidTier { index, reason } => write!(f, "tier {index} invalid: {reason}"),
            Self::UnknownTier { index } => write!(f, "unknown tier index {index}"),
            Self::CapacityExceeded {
                index,
                requested,
                remaining,
            } => write!(
                f,
                "tier {index} capacity exceeded: requested {requested}, remaining {remaining}"
            ),
        }
    }
}

impl std::error::Error for TierLedgerError {}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Ordered tier set. Index 0 is consumed first; order never changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TierLedger {
    tiers: Vec<Tier>,
}

impl TierLedger {
    pub fn new(specs: Vec<TierSpec>) -> Result<Self, TierLedgerError> {
        if specs.is_empty() {
            return Err(TierLedgerError::EmptyTierSet);
        }
        let mut capacity = TokenAmount::ZERO;
        for (index, spec) in specs.iter().enumerate() {
            validate_spec(index, spec)?;
            capacity = capacity.checked_add(spec.total_capacity).ok_or_else(|| {
                TierLedgerError::InvalidTier {
                    index,
                    reason: "cumulative capacity overflows u128".to_string(),
                }
            })?;
        }
        Ok(Self {
            tiers: specs.into_iter().map(Tier::new).collect(),
        })
    }

    // -----------------------------------------------------------------------
    // Read surface
    // -----------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn tier(&self, index: usize) -> Result<&Tier, TierLedgerError> {
        self.tiers
            .get(index)
            .ok_or(TierLedgerError::UnknownTier { index })
    }

    pub fn remaining_capacity(&self, index: usize) -> Result<TokenAmount, TierLedgerError> {
        self.tier(index).map(Tier::remaining)
    }

    pub fn remaining_discount_capacity(
        &self,
        index: usize,
    ) -> Result<TokenAmount, TierLedgerError> {
        self.tier(index).map(Tier::remaining_discount)
    }

    /// First tier that still has capacity.
    pub fn current_tier(&self) -> Option<usize> {
        self.tiers.iter().position(|t| !t.is_exhausted())
    }

    pub fn is_sold_out(&self) -> bool {
        self.current_tier().is_none()
    }

    pub fn total_sold(&self) -> TokenAmount {
        sum(self.tiers.iter().map(|t| t.total_sold))
    }

    pub fn total_capacity(&self) -> TokenAmount {
        sum(self.tiers.iter().map(|t| t.spec.total_capacity))
    }

    pub fn total_remaining(&self) -> TokenAmount {
        sum(self.tiers.iter().map(Tier::remaining))
    }

    // -----------------------------------------------------------------------
    // Write surface
    // -----------------------------------------------------------------------

    /// Record `tokens` sold from tier `index`.
    ///
    /// A discounted sale increments both `discount_sold` and `total_sold`.
    pub fn commit(
        &mut self,
        index: usize,
        tokens: TokenAmount,
        is_discount: bool,
    ) -> Result<(), TierLedgerError> {
        let tier = self
            .tiers
            .get(index)
            .ok_or(TierLedgerError::UnknownTier { index })?;

        let remaining = if is_discount {
            tier.remaining_discount()
        } else {
            tier.remaining()
        };
        if tokens > remaining {
            return Err(TierLedgerError::CapacityExceeded {
                index,
                requested: tokens,
                remaining,
            });
        }

        // Bounded by capacity above, so these cannot overflow.
        let tier = &mut self.tiers[index];
        tier.total_sold = TokenAmount::new(tier.total_sold.raw() + tokens.raw());
        if is_discount {
            tier.discount_sold = TokenAmount::new(tier.discount_sold.raw() + tokens.raw());
        }
        Ok(())
    }
}

/// Exact: every summand is bounded by its tier's capacity and `new` rejects
/// tier sets whose capacities overflow.
fn sum(it: impl Iterator<Item = TokenAmount>) -> TokenAmount {
    TokenAmount::new(it.map(TokenAmount::raw).sum())
}

fn validate_spec(index: usize, spec: &TierSpec) -> Result<(), TierLedgerError> {
    let invalid = |reason: &str| TierLedgerError::InvalidTier {
        index,
        reason: reason.to_string(),
    };

    if !spec.regular_price.is_valid() || !spec.discount_price.is_valid() {
        return Err(invalid("prices must be non-zero"));
    }
    match spec.discount_price.checked_cmp(&spec.regular_price) {
        Some(Ordering::Greater) => return Err(invalid("discount_price exceeds regular_price")),
        None => return Err(invalid("price comparison overflowed")),
        _ => {}
    }
    if spec.total_capacity.is_zero() {
        return Err(invalid("total_capacity must be > 0"));
    }
    if spec.discount_capacity > spec.total_capacity {
        return Err(invalid("discount_capacity exceeds total_capacity"));
    }
    Ok(())
}
