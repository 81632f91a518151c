mod common;

use common::*;
use std::sync::Mutex;
use std::thread;
use sto_sale::{SaleError, SaleState};
use sto_schemas::{CurrencyAmount, InvestorClass, TokenAmount};

#[test]
fn racing_buyers_never_oversell() {
    let h = Harness::open();
    for i in 0..16 {
        h.compliance
            .allow(id(&format!("whale-{i}")), InvestorClass::Accredited);
    }

    let receipts = Mutex::new(Vec::new());
    let rejections = Mutex::new(Vec::new());

    thread::scope(|s| {
        for i in 0..16 {
            let h = &h;
            let receipts = &receipts;
            let rejections = &rejections;
            s.spawn(move || {
                let who = format!("whale-{i}");
                for _ in 0..5 {
                    match h.sale.purchase(h.buy(&who, usd(), 25)) {
                        Ok(r) => receipts.lock().unwrap().push(r),
                        Err(e) => rejections.lock().unwrap().push(e),
                    }
                }
            });
        }
    });

    let receipts = receipts.into_inner().unwrap();
    let rejections = rejections.into_inner().unwrap();
    assert_eq!(receipts.len() + rejections.len(), 80);

    let tokens = receipts.iter().fold(TokenAmount::ZERO, |acc, r| {
        acc.checked_add(r.plan.result.tokens_allocated).unwrap()
    });
    let kept = receipts.iter().fold(CurrencyAmount::ZERO, |acc, r| {
        acc.checked_add(r.plan.result.currency_amount_consumed).unwrap()
    });
    for r in &receipts {
        let res = &r.plan.result;
        assert_eq!(
            res.currency_amount_consumed
                .checked_add(res.currency_amount_refunded)
                .unwrap(),
            c(25)
        );
    }

    // 100 at 1 + 100 at 2; every 25 unit budget buys at least one token.
    assert_eq!(tokens, t(200));
    assert_eq!(kept, c(300));
    assert_eq!(h.tokens.total_issued(), t(200));
    assert_eq!(h.funds.forwarded_total(&usd()), c(300));

    let stats = h.sale.stats();
    assert_eq!(stats.tokens_sold, t(200));
    assert_eq!(stats.tokens_remaining, t(0));
    assert_eq!(stats.units_raised, u(300));
    assert_eq!(stats.state, SaleState::Closed);
    assert_eq!(stats.pending_settlements, 0);

    assert!(rejections.iter().all(|e| *e == SaleError::SoldOut));
}
