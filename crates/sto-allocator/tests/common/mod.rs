#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use sto_allocator::{AllocationInput, AllocationPolicy};
use sto_rates::Rate;
use sto_schemas::{CurrencyAmount, CurrencyKind, InvestorClass, InvestorId, Price, TokenAmount, Units};

pub fn p(units: u128) -> Price {
    Price::per_token(units).unwrap()
}

pub fn t(n: u128) -> TokenAmount {
    TokenAmount::new(n)
}

pub fn u(n: u128) -> Units {
    Units::new(n)
}

pub fn usd() -> CurrencyKind {
    CurrencyKind::new("USD")
}

pub fn poly() -> CurrencyKind {
    CurrencyKind::new("POLY")
}

pub fn policy(minimum: u128) -> AllocationPolicy {
    AllocationPolicy {
        minimum_investment: Units::new(minimum),
        discount_currency: Some(poly()),
    }
}

pub fn par_rate() -> Rate {
    Rate::new(1, 1, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())
}

pub fn buy(
    investor: &str,
    class: InvestorClass,
    currency: CurrencyKind,
    amount: u128,
    rate: Rate,
) -> AllocationInput {
    AllocationInput {
        investor: InvestorId::new(investor),
        class,
        currency,
        amount: CurrencyAmount::new(amount),
        rate,
        min_tokens: None,
    }
}
