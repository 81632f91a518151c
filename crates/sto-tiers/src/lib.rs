//! sto-tiers
//!
//! Price tiers and the ledger that owns their sold counters.
//!
//! - `TierSpec`: configured shape of one tier (prices + capacities).
//! - `Tier`: a spec plus its running `total_sold` / `discount_sold`.
//! - `TierLedger`: the only write path for those counters.
//!
//! Pure deterministic logic. No IO, no time.

mod ledger;
mod types;

pub use ledger::{TierLedger, TierLedgerError};
pub use types::{Tier, TierSpec};
