//! sto-rates
//!
//! Rate oracle boundary: currency → unit-of-account exchange rates.
//!
//! - `Rate`: an exact `numerator / denominator` ratio plus its `as_of` time.
//! - `RateSource`: the object-safe trait the sale controller is wired with.
//! - `check_fresh`: fail-closed staleness guard.
//! - `FixedRateSource`: in-memory source for simulation and tests.
//!
//! Nothing here fetches or verifies signed feeds; acquisition lives outside
//! this workspace.

mod fixed;
mod rate;

pub use fixed::FixedRateSource;
pub use rate::{check_fresh, Rate, RateError, RateSource};
