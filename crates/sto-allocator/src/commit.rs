//! All-or-nothing application of an [`AllocationPlan`].
//!
//! Commits are staged on clones of the tier ledger and cap tracker and
//! swapped in only after every step succeeds, so a refusal halfway through a
//! multi-tier plan leaves the originals byte-for-byte unchanged.

use sto_caps::{CapError, InvestorCapTracker};
use sto_tiers::TierLedger;

use crate::{allocate, AllocationError, AllocationInput, AllocationPlan, AllocationPolicy};

pub fn commit_plan(
    plan: &AllocationPlan,
    tiers: &mut TierLedger,
    caps: &mut InvestorCapTracker,
) -> Result<(), AllocationError> {
    let mut staged_tiers = tiers.clone();
    let mut staged_caps = caps.clone();

    for fill in &plan.fills {
        staged_tiers
            .commit(fill.tier_index, fill.tokens, fill.is_discount)
            .map_err(AllocationError::CapacityExceeded)?;
    }

    staged_caps
        .commit_spend(
            &plan.investor,
            plan.result.unit_of_account_consumed,
            plan.class,
            plan.result.tokens_allocated,
        )
        .map_err(|e| match e {
            CapError::Overflow { .. } => AllocationError::Overflow { stage: "cap commit" },
            other => AllocationError::CapCommit(other),
        })?;

    *tiers = staged_tiers;
    *caps = staged_caps;
    Ok(())
}

/// Plan and commit in one step against the caller's state.
pub fn execute(
    policy: &AllocationPolicy,
    input: &AllocationInput,
    tiers: &mut TierLedger,
    caps: &mut InvestorCapTracker,
) -> Result<AllocationPlan, AllocationError> {
    let plan = allocate(policy, input, tiers, caps)?;
    commit_plan(&plan, tiers, caps)?;
    Ok(plan)
}
