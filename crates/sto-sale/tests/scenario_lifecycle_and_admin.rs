mod common;

use common::*;
use std::collections::BTreeSet;
use sto_sale::{SaleError, SaleEvent, SaleState};
use sto_tiers::TierSpec;

#[test]
fn state_follows_config_and_clock() {
    let h = Harness::unconfigured(ts(2026, 2, 20));
    assert_eq!(h.sale.state(), SaleState::Unconfigured);
    assert!(h.sale.tiers().is_empty());
    assert_eq!(
        h.sale.purchase(h.buy("alice", usd(), 10)).unwrap_err(),
        SaleError::SaleNotOpen {
            state: SaleState::Unconfigured
        }
    );
    assert_eq!(h.sale.pause().unwrap_err(), SaleError::NotConfigured);
    assert_eq!(
        h.sale.set_limits(u(10), u(1)).unwrap_err(),
        SaleError::NotConfigured
    );

    h.sale.configure(config(), tiers()).unwrap();
    assert_eq!(h.sale.state(), SaleState::Scheduled);
    assert_eq!(h.sale.tiers().len(), 2);
    assert_eq!(
        h.sale.purchase(h.buy("alice", usd(), 10)).unwrap_err(),
        SaleError::SaleNotOpen {
            state: SaleState::Scheduled
        }
    );

    h.clock.set(start());
    h.stamp_rates(start());
    assert_eq!(h.sale.state(), SaleState::Open);
    assert!(h.sale.purchase(h.buy("alice", usd(), 10)).is_ok());

    h.clock.set(end());
    h.stamp_rates(end());
    assert_eq!(h.sale.state(), SaleState::Closed);
    assert_eq!(
        h.sale.purchase(h.buy("alice", usd(), 10)).unwrap_err(),
        SaleError::SaleNotOpen {
            state: SaleState::Closed
        }
    );
}

#[test]
fn config_changes_only_before_open() {
    let h = Harness::unconfigured(ts(2026, 2, 20));
    h.sale.configure(config(), tiers()).unwrap();

    h.sale.set_limits(u(40), u(5)).unwrap();
    h.sale.set_limit_override(id("bob"), u(60)).unwrap();
    h.sale
        .set_accepted_currencies(BTreeSet::from([usd()]), None)
        .unwrap();
    h.sale
        .set_tiers(vec![TierSpec::regular(
            sto_schemas::Price::per_token(1).unwrap(),
            t(500),
        )])
        .unwrap();
    assert_eq!(h.sale.version(), 5);

    let cfg = h.sale.config().unwrap();
    assert_eq!(cfg.non_accredited_limit, u(40));
    assert_eq!(cfg.minimum_investment, u(5));
    assert_eq!(cfg.discount_currency, None);

    let versions: Vec<_> = h
        .events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SaleEvent::ConfigChanged { field, version } => Some((field, version)),
            _ => None,
        })
        .collect();
    assert_eq!(
        versions,
        vec![
            ("configure".to_string(), 1),
            ("limits".to_string(), 2),
            ("limit_override".to_string(), 3),
            ("accepted_currencies".to_string(), 4),
            ("tiers".to_string(), 5),
        ]
    );

    h.clock.set(during());
    h.stamp_rates(during());

    // Override lifts bob past the 40 unit default.
    let r = h.sale.purchase(h.buy("bob", usd(), 70)).unwrap();
    assert_eq!(r.plan.result.tokens_allocated, t(60));
    assert_eq!(
        h.sale.purchase(h.buy("carol", poly(), 10)).unwrap_err(),
        SaleError::UnsupportedCurrency { currency: poly() }
    );
    assert_eq!(
        h.sale.purchase(h.buy("carol", usd(), 4)).unwrap_err().code(),
        "BELOW_MINIMUM"
    );

    let locked = SaleError::ConfigLocked {
        state: SaleState::Open,
    };
    assert_eq!(h.sale.set_limits(u(1), u(1)).unwrap_err(), locked);
    assert_eq!(h.sale.configure(config(), tiers()).unwrap_err(), locked);
    assert_eq!(h.sale.set_times(start(), end()).unwrap_err(), locked);
    assert_eq!(
        h.sale.set_allow_beneficial_investments(true).unwrap_err(),
        locked
    );
    assert_eq!(h.sale.config().unwrap(), cfg);

    h.clock.set(end());
    assert_eq!(
        h.sale.set_limit_override(id("bob"), u(1)).unwrap_err(),
        SaleError::ConfigLocked {
            state: SaleState::Closed
        }
    );
}

#[test]
fn invalid_config_is_rejected_whole() {
    let h = Harness::unconfigured(ts(2026, 2, 20));

    let mut bad = config();
    bad.end_time = bad.start_time;
    assert_eq!(h.sale.configure(bad, tiers()).unwrap_err().code(), "INVALID_CONFIG");
    assert_eq!(
        h.sale.configure(config(), Vec::new()).unwrap_err().code(),
        "INVALID_CONFIG"
    );
    assert_eq!(h.sale.state(), SaleState::Unconfigured);
    assert_eq!(h.sale.version(), 0);

    h.sale.configure(config(), tiers()).unwrap();
    let err = h
        .sale
        .set_accepted_currencies(BTreeSet::from([usd()]), Some(poly()))
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_CONFIG");
    assert_eq!(h.sale.config().unwrap(), config());

    assert_eq!(
        h.sale.set_times(end(), start()).unwrap_err().code(),
        "INVALID_CONFIG"
    );
    assert_eq!(h.sale.version(), 1);
}

#[test]
fn pause_blocks_purchases_and_is_idempotent() {
    let h = Harness::open();

    h.sale.pause().unwrap();
    h.sale.pause().unwrap();
    assert_eq!(h.sale.state(), SaleState::Open);
    assert!(h.sale.stats().paused);
    assert_eq!(
        h.sale.purchase(h.buy("alice", usd(), 10)).unwrap_err(),
        SaleError::SalePaused
    );
    assert_eq!(
        h.sale.preview(&h.buy("alice", usd(), 10)).unwrap_err(),
        SaleError::SalePaused
    );

    h.sale.unpause().unwrap();
    h.sale.unpause().unwrap();
    assert!(h.sale.purchase(h.buy("alice", usd(), 10)).is_ok());

    assert_eq!(
        h.events.kinds(),
        vec![
            "CONFIG_CHANGED",
            "PAUSED",
            "UNPAUSED",
            "TOKEN_PURCHASE",
            "FUNDS_RECEIVED"
        ]
    );
    assert_eq!(h.sale.version(), 4);
}

#[test]
fn finalize_sends_unsold_to_treasury_once() {
    let h = Harness::open();
    h.sale.purchase(h.buy("alice", usd(), 60)).unwrap();

    assert_eq!(
        h.sale.finalize().unwrap_err(),
        SaleError::SaleNotClosed {
            state: SaleState::Open
        }
    );

    h.clock.set(end());
    h.tokens.fail_next(1);
    let err = h.sale.finalize().unwrap_err();
    assert!(err.is_retryable(), "{err}");
    assert!(!h.sale.stats().finalized);

    assert_eq!(h.sale.finalize().unwrap(), t(140));
    assert_eq!(h.tokens.balance_of(&id("treasury")), t(140));
    assert_eq!(h.tokens.total_issued(), t(200));
    assert!(h.sale.stats().finalized);

    assert_eq!(h.sale.finalize().unwrap_err(), SaleError::AlreadyFinalized);
    assert_eq!(h.tokens.balance_of(&id("treasury")), t(140));

    let last = h.events.events().pop().unwrap();
    assert_eq!(
        last,
        SaleEvent::Finalized {
            treasury: id("treasury"),
            unsold_tokens: t(140),
            tokens_sold: t(60),
        }
    );
}

#[test]
fn finalize_after_sell_out_issues_nothing() {
    let h = Harness::open();
    h.sale.purchase(h.buy("alice", usd(), 300)).unwrap();
    let issued = h.tokens.issuance_count();

    assert_eq!(h.sale.finalize().unwrap(), t(0));
    assert_eq!(h.tokens.issuance_count(), issued);
}
