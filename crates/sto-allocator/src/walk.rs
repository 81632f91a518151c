//! Tier walk.
//!
//! # Algorithm
//!
//! 1. Reject a zero amount or an unusable rate.
//! 2. `requested = floor(amount * rate)`.
//! 3. First purchase by this investor must satisfy `requested >= minimum`.
//! 4. Fail `SoldOut` if no tier has capacity.
//! 5. `available = requested`, bounded by cap headroom for NonAccredited.
//! 6. From the first open tier, in index order:
//!    a. discount-eligible currency with discount capacity left: buy from the
//!       discounted sub-allocation at `discount_price`;
//!    b. then the regular sub-allocation of the same tier at `regular_price`,
//!       bounded by what the tier has left after (a);
//!    c. a sub-allocation the budget cannot fully buy is split
//!       (`tokens = floor(budget / price)`) and the walk stops there;
//!    d. stop as soon as the budget hits zero; never record a zero fill.
//! 7. Convert consumed units back to currency (ceil, clamped) and refund
//!    the rest.

use sto_caps::{CapError, InvestorCapTracker};
use sto_schemas::{Price, TokenAmount, Units};
use sto_tiers::TierLedger;

use crate::{
    AllocationError, AllocationInput, AllocationPlan, AllocationPolicy, PurchaseResult, TierFill,
};

/// Outcome of buying from one sub-allocation.
struct Take {
    tokens: TokenAmount,
    cost: Units,
    /// The budget ran out inside this sub-allocation.
    split: bool,
}

/// Buy as much of `cap` as `budget` allows at `price`.
fn take(budget: Units, cap: TokenAmount, price: Price) -> Result<Take, AllocationError> {
    let full_cost = price.cost_of(cap).ok_or(AllocationError::Overflow {
        stage: "tier cost",
    })?;
    if full_cost <= budget {
        return Ok(Take {
            tokens: cap,
            cost: full_cost,
            split: false,
        });
    }

    let tokens = price.tokens_for(budget).ok_or(AllocationError::Overflow {
        stage: "tier split",
    })?;
    let cost = price.cost_of(tokens).ok_or(AllocationError::Overflow {
        stage: "tier split cost",
    })?;
    Ok(Take {
        tokens,
        cost,
        split: true,
    })
}

/// Plan a purchase against the given snapshot. Pure; mutates nothing.
pub fn allocate(
    policy: &AllocationPolicy,
    input: &AllocationInput,
    tiers: &TierLedger,
    caps: &InvestorCapTracker,
) -> Result<AllocationPlan, AllocationError> {
    // 1) Input validation.
    if input.amount.is_zero() {
        return Err(AllocationError::InvalidAmount);
    }
    if !input.rate.is_usable() {
        return Err(AllocationError::RateUnavailable {
            currency: input.currency.clone(),
        });
    }

    // 2) Normalize to unit of account.
    let requested = input
        .rate
        .to_units(input.amount)
        .ok_or(AllocationError::Overflow {
            stage: "currency to units",
        })?;

    // 3) Minimum applies to the first purchase only.
    if !caps.has_invested(&input.investor) && requested < policy.minimum_investment {
        return Err(AllocationError::BelowMinimum {
            requested,
            minimum: policy.minimum_investment,
        });
    }

    // 4) Sold out.
    let Some(start) = tiers.current_tier() else {
        return Err(AllocationError::SoldOut);
    };

    // 5) Cap headroom.
    let available = match caps.headroom(&input.investor, input.class) {
        Ok(None) => requested,
        Ok(Some(room)) => requested.min(room),
        Err(CapError::CapExceeded {
            investor,
            limit,
            invested,
            ..
        }) => {
            return Err(AllocationError::CapExceeded {
                investor,
                limit,
                invested,
            })
        }
        Err(CapError::Overflow { .. }) => {
            return Err(AllocationError::Overflow { stage: "cap headroom" })
        }
    };

    // 6) Walk.
    let discount_eligible = policy.is_discount_eligible(&input.currency);
    let mut budget = available;
    let mut fills: Vec<TierFill> = Vec::new();

    'tiers: for (index, tier) in tiers.tiers().iter().enumerate().skip(start) {
        if budget.is_zero() {
            break;
        }
        let mut tier_left = tier.remaining();
        if tier_left.is_zero() {
            continue;
        }

        if discount_eligible {
            let discount_left = tier.remaining_discount();
            if !discount_left.is_zero() {
                let t = take(budget, discount_left, tier.discount_price())?;
                if !t.tokens.is_zero() {
                    fills.push(TierFill {
                        tier_index: index,
                        is_discount: true,
                        tokens: t.tokens,
                        units: t.cost,
                        price: tier.discount_price(),
                    });
                }
                budget = budget.saturating_sub(t.cost);
                tier_left = tier_left.saturating_sub(t.tokens);
                if t.split {
                    break 'tiers;
                }
            }
        }

        if budget.is_zero() {
            break;
        }
        if tier_left.is_zero() {
            continue;
        }

        let t = take(budget, tier_left, tier.regular_price())?;
        if !t.tokens.is_zero() {
            fills.push(TierFill {
                tier_index: index,
                is_discount: false,
                tokens: t.tokens,
                units: t.cost,
                price: tier.regular_price(),
            });
        }
        budget = budget.saturating_sub(t.cost);
        if t.split {
            break;
        }
    }

    // Totals.
    let mut tokens = TokenAmount::ZERO;
    let mut units = Units::ZERO;
    for f in &fills {
        tokens = tokens
            .checked_add(f.tokens)
            .ok_or(AllocationError::Overflow { stage: "token total" })?;
        units = units
            .checked_add(f.units)
            .ok_or(AllocationError::Overflow { stage: "unit total" })?;
    }

    if tokens.is_zero() {
        return Err(AllocationError::ZeroAllocation { available });
    }
    if let Some(min_tokens) = input.min_tokens {
        if tokens < min_tokens {
            return Err(AllocationError::SlippageExceeded { min_tokens, tokens });
        }
    }

    // 7) Back to currency. Never keep more than was submitted.
    let consumed = input
        .rate
        .to_currency(units)
        .ok_or(AllocationError::Overflow {
            stage: "units to currency",
        })?
        .min(input.amount);
    let refunded = input.amount.saturating_sub(consumed);

    assert_eq!(
        consumed.checked_add(refunded),
        Some(input.amount),
        "currency conservation violated: consumed {consumed} + refunded {refunded} != submitted {}",
        input.amount
    );

    Ok(AllocationPlan {
        investor: input.investor.clone(),
        class: input.class,
        currency: input.currency.clone(),
        amount: input.amount,
        rate: input.rate.clone(),
        requested_units: requested,
        available_units: available,
        fills,
        result: PurchaseResult {
            tokens_allocated: tokens,
            unit_of_account_consumed: units,
            currency_amount_consumed: consumed,
            currency_amount_refunded: refunded,
        },
    })
}
