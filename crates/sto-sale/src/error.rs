use std::fmt;
use sto_allocator::AllocationError;
use sto_caps::CapError;
use sto_rates::RateError;
use sto_schemas::{CurrencyKind, InvestorId, TokenAmount, Units};
use sto_tiers::TierLedgerError;
use uuid::Uuid;

use crate::{CollaboratorError, SaleState};

/// How a caller should react to a [`SaleError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Reject; do not retry the same request.
    InputValidation,
    /// Cannot be satisfied under current state; a smaller request may work.
    Capacity,
    /// Transient; retry with backoff.
    Infrastructure,
    /// Wrong sale state for this call.
    Lifecycle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaleError {
    // input validation
    InvalidAmount,
    UnsupportedCurrency { currency: CurrencyKind },
    BeneficiaryNotAllowed { buyer: InvestorId, beneficiary: InvestorId },
    NotWhitelisted { investor: InvestorId },
    BelowMinimum { requested: Units, minimum: Units },
    ZeroAllocation { available: Units },
    SlippageExceeded { min_tokens: TokenAmount, tokens: TokenAmount },
    DuplicatePurchase { purchase_id: Uuid },
    UnknownPurchase { purchase_id: Uuid },
    InvalidConfig { reason: String },
    Overflow { stage: &'static str },

    // capacity
    CapExceeded { investor: InvestorId, limit: Units, invested: Units },
    SoldOut,
    CapacityExceeded(TierLedgerError),

    // infrastructure
    RateUnavailable(RateError),
    Collaborator(CollaboratorError),

    // lifecycle
    NotConfigured,
    SaleNotOpen { state: SaleState },
    SalePaused,
    ConfigLocked { state: SaleState },
    SaleNotClosed { state: SaleState },
    AlreadyFinalized,
}

impl SaleError {
    pub fn kind(&self) -> ErrorClass {
        use SaleError::*;
        match self {
            InvalidAmount
            | UnsupportedCurrency { .. }
            | BeneficiaryNotAllowed { .. }
            | NotWhitelisted { .. }
            | BelowMinimum { .. }
            | ZeroAllocation { .. }
            | SlippageExceeded { .. }
            | DuplicatePurchase { .. }
            | UnknownPurchase { .. }
            | InvalidConfig { .. }
            | Overflow { .. } => ErrorClass::InputValidation,
            CapExceeded { .. } | SoldOut | CapacityExceeded(_) => ErrorClass::Capacity,
            RateUnavailable(_) | Collaborator(_) => ErrorClass::Infrastructure,
            NotConfigured
            | SaleNotOpen { .. }
            | SalePaused
            | ConfigLocked { .. }
            | SaleNotClosed { .. }
            | AlreadyFinalized => ErrorClass::Lifecycle,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorClass::Infrastructure
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        use SaleError::*;
        match self {
            InvalidAmount => "INVALID_AMOUNT",
            UnsupportedCurrency { .. } => "UNSUPPORTED_CURRENCY",
            BeneficiaryNotAllowed { .. } => "BENEFICIARY_NOT_ALLOWED",
            NotWhitelisted { .. } => "NOT_WHITELISTED",
            BelowMinimum { .. } => "BELOW_MINIMUM",
            ZeroAllocation { .. } => "ZERO_ALLOCATION",
            SlippageExceeded { .. } => "SLIPPAGE_EXCEEDED",
            DuplicatePurchase { .. } => "DUPLICATE_PURCHASE",
            UnknownPurchase { .. } => "UNKNOWN_PURCHASE",
            InvalidConfig { .. } => "INVALID_CONFIG",
            Overflow { .. } => "OVERFLOW",
            CapExceeded { .. } => "CAP_EXCEEDED",
            SoldOut => "SOLD_OUT",
            CapacityExceeded(_) => "CAPACITY_EXCEEDED",
            RateUnavailable(_) => "RATE_UNAVAILABLE",
            Collaborator(_) => "COLLABORATOR_UNAVAILABLE",
            NotConfigured => "NOT_CONFIGURED",
            SaleNotOpen { .. } => "SALE_NOT_OPEN",
            SalePaused => "SALE_PAUSED",
            ConfigLocked { .. } => "CONFIG_LOCKED",
            SaleNotClosed { .. } => "SALE_NOT_CLOSED",
            AlreadyFinalized => "ALREADY_FINALIZED",
        }
    }
}

impl fmt::Display for SaleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use SaleError::*;
        let code = self.code();
        match self {
            InvalidAmount => write!(f, "{code}: amount must be > 0"),
            UnsupportedCurrency { currency } => write!(f, "{code}: {currency} is not accepted"),
            BeneficiaryNotAllowed { buyer, beneficiary } => write!(
                f,
                "{code}: {buyer} may not buy on behalf of {beneficiary}"
            ),
            NotWhitelisted { investor } => write!(f, "{code}: {investor}"),
            BelowMinimum { requested, minimum } => {
                write!(f, "{code}: {requested} units < minimum {minimum}")
            }
            ZeroAllocation { available } => {
                write!(f, "{code}: {available} units buy no tokens")
            }
            SlippageExceeded { min_tokens, tokens } => {
                write!(f, "{code}: {tokens} tokens < requested minimum {min_tokens}")
            }
            DuplicatePurchase { purchase_id } => write!(f, "{code}: {purchase_id}"),
            UnknownPurchase { purchase_id } => write!(f, "{code}: {purchase_id}"),
            InvalidConfig { reason } => write!(f, "{code}: {reason}"),
            Overflow { stage } => write!(f, "{code}: arithmetic overflow at {stage}"),
            CapExceeded {
                investor,
                limit,
                invested,
            } => write!(f, "{code}: {investor} invested {invested} of limit {limit}"),
            SoldOut => write!(f, "{code}: no tier has capacity left"),
            CapacityExceeded(e) => write!(f, "{code}: {e}"),
            RateUnavailable(e) => write!(f, "{code}: {e}"),
            Collaborator(e) => write!(f, "{code}: {e}"),
            NotConfigured => write!(f, "{code}: sale has no configuration"),
            SaleNotOpen { state } => write!(f, "{code}: sale is {state}"),
            SalePaused => write!(f, "{code}: purchases are paused"),
            ConfigLocked { state } => write!(f, "{code}: sale is {state}"),
            SaleNotClosed { state } => write!(f, "{code}: sale is {state}"),
            AlreadyFinalized => write!(f, "{code}: sale was already finalized"),
        }
    }
}

impl std::error::Error for SaleError {}

impl From<AllocationError> for SaleError {
    fn from(e: AllocationError) -> Self {
        match e {
            AllocationError::InvalidAmount => SaleError::InvalidAmount,
            AllocationError::RateUnavailable { currency } => {
                SaleError::RateUnavailable(RateError::Invalid {
                    currency,
                    reason: "rate has a zero side".to_string(),
                })
            }
            AllocationError::BelowMinimum { requested, minimum } => {
                SaleError::BelowMinimum { requested, minimum }
            }
            AllocationError::SoldOut => SaleError::SoldOut,
            AllocationError::CapExceeded {
                investor,
                limit,
                invested,
            } => SaleError::CapExceeded {
                investor,
                limit,
                invested,
            },
            AllocationError::ZeroAllocation { available } => SaleError::ZeroAllocation { available },
            AllocationError::SlippageExceeded { min_tokens, tokens } => {
                SaleError::SlippageExceeded { min_tokens, tokens }
            }
            AllocationError::Overflow { stage } => SaleError::Overflow { stage },
            AllocationError::CapacityExceeded(e) => SaleError::CapacityExceeded(e),
            AllocationError::CapCommit(CapError::CapExceeded {
                investor,
                limit,
                invested,
                ..
            }) => SaleError::CapExceeded {
                investor,
                limit,
                invested,
            },
            AllocationError::CapCommit(CapError::Overflow { .. }) => {
                SaleError::Overflow { stage: "cap commit" }
            }
        }
    }
}
