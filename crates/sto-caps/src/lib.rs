//! sto-caps
//!
//! Per-investor cumulative spend and the non-accredited ceiling.
//!
//! - Spend is cumulative across every purchase and every currency.
//! - NonAccredited investors are bounded by the sale limit, or by a
//!   per-investor override when one is set.
//! - Accredited investors are unbounded here; only tier capacity limits them.
//!
//! Pure deterministic logic. No IO, no time.

mod tracker;

pub use tracker::{CapError, InvestorCapState, InvestorCapTracker};
