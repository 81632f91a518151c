mod common;

use common::*;
use sto_allocator::*;
use sto_caps::InvestorCapTracker;
use sto_schemas::{CurrencyAmount, InvestorClass, InvestorId};
use sto_tiers::{TierLedger, TierSpec};

#[test]
fn scenario_non_accredited_cap_clamps() {
    let mut tiers = TierLedger::new(vec![TierSpec::regular(p(1), t(1_000))]).unwrap();
    let mut caps = InvestorCapTracker::new(u(10));
    let retail = InvestorId::new("retail");

    // Prior spend of 8.
    execute(
        &policy(0),
        &buy("retail", InvestorClass::NonAccredited, usd(), 8, par_rate()),
        &mut tiers,
        &mut caps,
    )
    .unwrap();
    assert_eq!(caps.current_spend(&retail), u(8));

    let plan = execute(
        &policy(0),
        &buy("retail", InvestorClass::NonAccredited, usd(), 5, par_rate()),
        &mut tiers,
        &mut caps,
    )
    .unwrap();

    assert_eq!(plan.requested_units, u(5));
    assert_eq!(plan.available_units, u(2));
    assert_eq!(plan.result.tokens_allocated, t(2));
    assert_eq!(plan.result.unit_of_account_consumed, u(2));
    assert_eq!(plan.result.currency_amount_refunded, CurrencyAmount::new(3));
    assert_eq!(caps.current_spend(&retail), u(10));

    // At the cap: further purchases fail with no mutation.
    let tiers_before = tiers.clone();
    let caps_before = caps.clone();
    let err = execute(
        &policy(0),
        &buy("retail", InvestorClass::NonAccredited, usd(), 1, par_rate()),
        &mut tiers,
        &mut caps,
    )
    .unwrap_err();
    assert!(matches!(err, AllocationError::CapExceeded { .. }));
    assert_eq!(tiers, tiers_before);
    assert_eq!(caps, caps_before);
}

#[test]
fn scenario_limit_override_raises_ceiling() {
    let mut tiers = TierLedger::new(vec![TierSpec::regular(p(1), t(1_000))]).unwrap();
    let mut caps = InvestorCapTracker::new(u(10));
    caps.set_limit_override(InvestorId::new("vip"), u(40));

    let plan = execute(
        &policy(0),
        &buy("vip", InvestorClass::NonAccredited, usd(), 100, par_rate()),
        &mut tiers,
        &mut caps,
    )
    .unwrap();
    assert_eq!(plan.result.tokens_allocated, t(40));
    assert_eq!(plan.result.currency_amount_refunded, CurrencyAmount::new(60));
}
