//! sto-sale
//!
//! The sale controller and its collaborator seams.
//!
//! - [`SaleController`] owns one sale: config, tier ledger, cap tracker,
//!   purchase records. Every purchase is linearized by a single book lock.
//! - Collaborators ([`ComplianceOracle`], [`RateSource`](sto_rates::RateSource),
//!   [`TokenLedger`], [`FundsSettlement`], [`EventSink`], [`Clock`]) are
//!   traits; [`memory`] has deterministic in-process versions.
//! - [`JournalSink`] appends every event to a hash-chained journal.
//!
//! Side effects run after the lock is released. A committed purchase whose
//! settlement failed stays pending and can be replayed with
//! [`SaleController::retry_settlement`].

mod clock;
mod collab;
mod controller;
mod error;
mod events;
mod journal;
mod lifecycle;
pub mod memory;

pub use clock::{Clock, SystemClock};
pub use collab::{
    CollaboratorError, ComplianceOracle, ComplianceVerdict, EventSink, FundsSettlement,
    TokenLedger,
};
pub use controller::{
    Collaborators, PurchaseReceipt, PurchaseRecord, PurchaseRequest, SaleController, SaleStats,
    SettlementProgress, SettlementStatus,
};
pub use error::{ErrorClass, SaleError};
pub use events::{FanoutSink, NullSink, SaleEvent};
pub use journal::JournalSink;
pub use lifecycle::{derive_state, SaleState};
