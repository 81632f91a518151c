//! Collaborators the controller calls out to.
//!
//! All are object-safe and `Send + Sync`; the controller holds them as
//! `Arc<dyn _>`. None is ever called while the book lock is held.

use std::fmt;
use sto_schemas::{CurrencyAmount, CurrencyKind, InvestorClass, InvestorId, TokenAmount};
use uuid::Uuid;

use crate::SaleEvent;

/// A collaborator could not be reached or refused the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollaboratorError {
    pub service: &'static str,
    pub reason: String,
}

impl CollaboratorError {
    pub fn new(service: &'static str, reason: impl Into<String>) -> Self {
        Self {
            service,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.service, self.reason)
    }
}

impl std::error::Error for CollaboratorError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComplianceVerdict {
    pub allowed: bool,
    pub class: InvestorClass,
}

pub trait ComplianceOracle: Send + Sync {
    fn check(&self, investor: &InvestorId) -> Result<ComplianceVerdict, CollaboratorError>;
}

/// Token issuance.
///
/// # Contract
/// `issue` is idempotent on `issuance_id`: a repeated call with the same id
/// must not mint twice and must report success.
pub trait TokenLedger: Send + Sync {
    fn issue(
        &self,
        issuance_id: Uuid,
        to: &InvestorId,
        amount: TokenAmount,
    ) -> Result<(), CollaboratorError>;
}

/// Movement of the payment currencies. Both calls are idempotent on
/// `purchase_id`.
pub trait FundsSettlement: Send + Sync {
    fn forward(
        &self,
        purchase_id: Uuid,
        currency: &CurrencyKind,
        amount: CurrencyAmount,
        destination: &str,
    ) -> Result<(), CollaboratorError>;

    fn refund(
        &self,
        purchase_id: Uuid,
        currency: &CurrencyKind,
        amount: CurrencyAmount,
        investor: &InvestorId,
    ) -> Result<(), CollaboratorError>;
}

/// Accounting event consumer. Failures are logged, never fatal to a
/// committed purchase.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &SaleEvent) -> Result<(), CollaboratorError>;
}
