//! sto-schemas
//!
//! Shared value types for the tiered sale engine.
//!
//! - Identity newtypes (`InvestorId`, `CurrencyKind`) and `InvestorClass`.
//! - Wide fixed-point quantities (`Units`, `TokenAmount`, `CurrencyAmount`)
//!   stored as `u128` with checked arithmetic only.
//! - `Price`: a unit-of-account / token ratio with floor/ceil conversions.
//!
//! Pure types. No IO, no time, no floating point.

mod amounts;
mod ids;
mod price;

pub mod dec;

pub use amounts::{CurrencyAmount, TokenAmount, Units};
pub use ids::{CurrencyKind, InvestorClass, InvestorId};
pub use price::{mul_div_ceil, mul_div_floor, Price};
