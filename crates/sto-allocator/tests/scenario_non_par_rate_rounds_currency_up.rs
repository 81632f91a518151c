mod common;

use chrono::{TimeZone, Utc};
use common::*;
use sto_allocator::*;
use sto_caps::InvestorCapTracker;
use sto_rates::Rate;
use sto_schemas::{CurrencyAmount, InvestorClass};
use sto_tiers::{TierLedger, TierSpec};

/// One currency base unit is worth three unit-of-account base units.
fn triple_rate() -> Rate {
    Rate::new(3, 1, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())
}

#[test]
fn scenario_partial_unit_of_account_is_kept_not_refunded() {
    let mut tiers = TierLedger::new(vec![TierSpec::regular(p(2), t(100))]).unwrap();
    let mut caps = InvestorCapTracker::new(u(1_000));

    // 5 currency -> 15 units -> 7 tokens costing 14 units.
    // 14 units are worth 4.67 currency: the sale keeps 5, not 4.
    let plan = execute(
        &policy(0),
        &buy("acc", InvestorClass::Accredited, usd(), 5, triple_rate()),
        &mut tiers,
        &mut caps,
    )
    .unwrap();

    assert_eq!(plan.result.tokens_allocated, t(7));
    assert_eq!(plan.result.unit_of_account_consumed, u(14));
    assert_eq!(plan.result.currency_amount_consumed, CurrencyAmount::new(5));
    assert_eq!(plan.result.currency_amount_refunded, CurrencyAmount::ZERO);
}

#[test]
fn scenario_sold_out_refund_under_non_par_rate() {
    let mut tiers = TierLedger::new(vec![TierSpec::regular(p(2), t(5))]).unwrap();
    let mut caps = InvestorCapTracker::new(u(1_000));

    // 7 currency -> 21 units; the tier sells out at 10 units (3.33 currency).
    let plan = execute(
        &policy(0),
        &buy("acc", InvestorClass::Accredited, usd(), 7, triple_rate()),
        &mut tiers,
        &mut caps,
    )
    .unwrap();

    assert_eq!(plan.result.tokens_allocated, t(5));
    assert_eq!(plan.result.unit_of_account_consumed, u(10));
    assert_eq!(plan.result.currency_amount_consumed, CurrencyAmount::new(4));
    assert_eq!(plan.result.currency_amount_refunded, CurrencyAmount::new(3));
    assert!(tiers.is_sold_out());

    // Plans travel as JSON through the CLI report and the daemon.
    let v = serde_json::to_value(&plan).unwrap();
    assert_eq!(v["result"]["currency_amount_consumed"], "4");
    assert_eq!(v["result"]["currency_amount_refunded"], "3");
    assert_eq!(v["fills"][0]["tokens"], "5");
    let back: AllocationPlan = serde_json::from_value(v).unwrap();
    assert_eq!(back, plan);
}
