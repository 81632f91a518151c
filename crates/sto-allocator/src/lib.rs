//! sto-allocator
//!
//! The tier walk: turns one normalized purchase into an exact token quantity,
//! a consumed unit-of-account amount, and a refundable currency remainder.
//!
//! - [`allocate`] is pure: it reads a `TierLedger` and an
//!   `InvestorCapTracker` snapshot and returns an [`AllocationPlan`].
//! - [`commit_plan`] applies a plan all-or-nothing.
//! - [`execute`] is `allocate` followed by `commit_plan`.
//!
//! Rounding always favours the sale: units truncate, tokens floor, costs and
//! the currency kept ceil (clamped to what was submitted).
//!
//! No IO, no time, no logging. The caller pins the rate and holds whatever
//! lock makes the snapshot linearizable.

mod commit;
mod types;
mod walk;

pub use commit::{commit_plan, execute};
pub use types::{
    AllocationError, AllocationInput, AllocationPlan, AllocationPolicy, PurchaseResult, TierFill,
};
pub use walk::allocate;
