use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sto_schemas::{InvestorClass, InvestorId, TokenAmount, Units};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapError {
    /// The spend would take a NonAccredited investor past their limit, or
    /// they are already at it.
    CapExceeded {
        investor: InvestorId,
        limit: Units,
        invested: Units,
        attempted: Units,
    },
    /// Cumulative counters overflowed `u128`.
    Overflow { investor: InvestorId },
}

impl std::fmt::Display for CapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CapExceeded {
                investor,
                limit,
                invested,
                attempted,
            } => write!(
                f,
                "investor {investor} cap exceeded: limit {limit}, invested {invested}, attempted {attempted}"
            ),
            Self::Overflow { investor } => {
                write!(f, "investor {investor} cumulative counters overflowed")
            }
        }
    }
}

impl std::error::Error for CapError {}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Cumulative per-investor record. Created on first successful purchase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestorCapState {
    /// Class observed on the most recent purchase.
    pub class: InvestorClass,
    /// Monotonic non-decreasing.
    pub invested_units: Units,
    pub tokens_bought: TokenAmount,
    pub purchase_count: u64,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvestorCapTracker {
    non_accredited_limit: Units,
    overrides: BTreeMap<InvestorId, Units>,
    investors: BTreeMap<InvestorId, InvestorCapState>,
}

impl InvestorCapTracker {
    pub fn new(non_accredited_limit: Units) -> Self {
        Self {
            non_accredited_limit,
            overrides: BTreeMap::new(),
            investors: BTreeMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Limits
    // -----------------------------------------------------------------------

    pub fn non_accredited_limit(&self) -> Units {
        self.non_accredited_limit
    }

    pub fn set_non_accredited_limit(&mut self, limit: Units) {
        self.non_accredited_limit = limit;
    }

    pub fn set_limit_override(&mut self, investor: InvestorId, limit: Units) {
        self.overrides.insert(investor, limit);
    }

    pub fn clear_limit_override(&mut self, investor: &InvestorId) {
        self.overrides.remove(investor);
    }

    /// Override if present, else the sale-wide non-accredited limit.
    pub fn effective_limit(&self, investor: &InvestorId) -> Units {
        self.overrides
            .get(investor)
            .copied()
            .unwrap_or(self.non_accredited_limit)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn current_spend(&self, investor: &InvestorId) -> Units {
        self.investors
            .get(investor)
            .map(|s| s.invested_units)
            .unwrap_or(Units::ZERO)
    }

    pub fn state(&self, investor: &InvestorId) -> Option<&InvestorCapState> {
        self.investors.get(investor)
    }

    pub fn has_invested(&self, investor: &InvestorId) -> bool {
        self.investors.contains_key(investor)
    }

    pub fn investor_count(&self) -> usize {
        self.investors.len()
    }

    pub fn investors(&self) -> impl Iterator<Item = (&InvestorId, &InvestorCapState)> {
        self.investors.iter()
    }

    /// Units the investor may still spend.
    ///
    /// `Ok(None)` means unbounded (Accredited). A NonAccredited investor at
    /// or over their limit gets `CapExceeded` rather than `Some(0)`.
    pub fn headroom(
        &self,
        investor: &InvestorId,
        class: InvestorClass,
    ) -> Result<Option<Units>, CapError> {
        if class == InvestorClass::Accredited {
            return Ok(None);
        }
        let limit = self.effective_limit(investor);
        let invested = self.current_spend(investor);
        match limit.checked_sub(invested) {
            Some(room) if !room.is_zero() => Ok(Some(room)),
            _ => Err(CapError::CapExceeded {
                investor: investor.clone(),
                limit,
                invested,
                attempted: Units::ZERO,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Write surface
    // -----------------------------------------------------------------------

    /// Add `units` to the investor's running total.
    ///
    /// Fails without mutation if a NonAccredited investor would end above
    /// their effective limit.
    pub fn commit_spend(
        &mut self,
        investor: &InvestorId,
        units: Units,
        class: InvestorClass,
        tokens: TokenAmount,
    ) -> Result<(), CapError> {
        let invested = self.current_spend(investor);
        let new_total = invested
            .checked_add(units)
            .ok_or_else(|| CapError::Overflow {
                investor: investor.clone(),
            })?;

        if class == InvestorClass::NonAccredited {
            let limit = self.effective_limit(investor);
            if new_total > limit {
                return Err(CapError::CapExceeded {
                    investor: investor.clone(),
                    limit,
                    invested,
                    attempted: units,
                });
            }
        }

        let prev_tokens = self
            .investors
            .get(investor)
            .map(|s| s.tokens_bought)
            .unwrap_or(TokenAmount::ZERO);
        let tokens_bought = prev_tokens
            .checked_add(tokens)
            .ok_or_else(|| CapError::Overflow {
                investor: investor.clone(),
            })?;

        let entry = self
            .investors
            .entry(investor.clone())
            .or_insert(InvestorCapState {
                class,
                invested_units: Units::ZERO,
                tokens_bought: TokenAmount::ZERO,
                purchase_count: 0,
            });
        entry.class = class;
        entry.invested_units = new_total;
        entry.tokens_bought = tokens_bought;
        entry.purchase_count = entry.purchase_count.saturating_add(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> InvestorId {
        InvestorId::new("alice")
    }

    #[test]
    fn accredited_has_no_ceiling() {
        let mut t = InvestorCapTracker::new(Units::new(10));
        assert_eq!(t.headroom(&alice(), InvestorClass::Accredited), Ok(None));
        t.commit_spend(
            &alice(),
            Units::new(1_000),
            InvestorClass::Accredited,
            TokenAmount::new(1),
        )
        .unwrap();
        assert_eq!(t.current_spend(&alice()), Units::new(1_000));
    }

    #[test]
    fn non_accredited_capped_exactly() {
        let mut t = InvestorCapTracker::new(Units::new(10));
        t.commit_spend(
            &alice(),
            Units::new(8),
            InvestorClass::NonAccredited,
            TokenAmount::new(8),
        )
        .unwrap();
        assert_eq!(
            t.headroom(&alice(), InvestorClass::NonAccredited),
            Ok(Some(Units::new(2)))
        );

        let before = t.clone();
        assert!(matches!(
            t.commit_spend(
                &alice(),
                Units::new(3),
                InvestorClass::NonAccredited,
                TokenAmount::new(3)
            ),
            Err(CapError::CapExceeded { .. })
        ));
        assert_eq!(t, before);

        t.commit_spend(
            &alice(),
            Units::new(2),
            InvestorClass::NonAccredited,
            TokenAmount::new(2),
        )
        .unwrap();
        assert_eq!(t.current_spend(&alice()), Units::new(10));
        assert!(t.headroom(&alice(), InvestorClass::NonAccredited).is_err());
    }

    #[test]
    fn override_replaces_default_limit() {
        let mut t = InvestorCapTracker::new(Units::new(10));
        t.set_limit_override(alice(), Units::new(100));
        assert_eq!(t.effective_limit(&alice()), Units::new(100));
        assert_eq!(t.effective_limit(&InvestorId::new("bob")), Units::new(10));
        t.clear_limit_override(&alice());
        assert_eq!(t.effective_limit(&alice()), Units::new(10));
    }

    #[test]
    fn purchase_count_and_tokens_accumulate() {
        let mut t = InvestorCapTracker::new(Units::new(100));
        for _ in 0..3 {
            t.commit_spend(
                &alice(),
                Units::new(5),
                InvestorClass::NonAccredited,
                TokenAmount::new(7),
            )
            .unwrap();
        }
        let s = t.state(&alice()).unwrap();
        assert_eq!(s.purchase_count, 3);
        assert_eq!(s.tokens_bought, TokenAmount::new(21));
        assert_eq!(t.investor_count(), 1);
    }
}
