mod common;

use common::*;
use sto_allocator::*;
use sto_caps::InvestorCapTracker;
use sto_schemas::{CurrencyAmount, InvestorClass};
use sto_tiers::{TierLedger, TierSpec};

#[test]
fn scenario_two_tier_carry() {
    let mut tiers = TierLedger::new(vec![
        TierSpec::regular(p(1), t(50)),
        TierSpec::regular(p(2), t(50)),
    ])
    .unwrap();
    let mut caps = InvestorCapTracker::new(u(1_000));

    let plan = execute(
        &policy(0),
        &buy("acc", InvestorClass::Accredited, usd(), 100, par_rate()),
        &mut tiers,
        &mut caps,
    )
    .unwrap();

    assert_eq!(plan.result.tokens_allocated, t(75));
    assert_eq!(plan.result.unit_of_account_consumed, u(100));
    assert_eq!(plan.result.currency_amount_refunded, CurrencyAmount::ZERO);

    assert_eq!(plan.fills.len(), 2);
    assert_eq!((plan.fills[0].tier_index, plan.fills[0].tokens, plan.fills[0].units), (0, t(50), u(50)));
    assert_eq!((plan.fills[1].tier_index, plan.fills[1].tokens, plan.fills[1].units), (1, t(25), u(50)));

    assert_eq!(tiers.remaining_capacity(0).unwrap(), t(0));
    assert_eq!(tiers.remaining_capacity(1).unwrap(), t(25));
    assert_eq!(tiers.current_tier(), Some(1));
}
