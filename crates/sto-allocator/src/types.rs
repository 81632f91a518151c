use serde::{Deserialize, Serialize};
use sto_caps::CapError;
use sto_rates::Rate;
use sto_schemas::{CurrencyAmount, CurrencyKind, InvestorClass, InvestorId, Price, TokenAmount, Units};
use sto_tiers::TierLedgerError;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Sale-level knobs the walk needs. Owned by the sale configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPolicy {
    /// First purchase by an investor must be worth at least this much.
    pub minimum_investment: Units,
    /// The single currency allowed to draw from discounted sub-allocations.
    pub discount_currency: Option<CurrencyKind>,
}

impl AllocationPolicy {
    pub fn is_discount_eligible(&self, currency: &CurrencyKind) -> bool {
        self.discount_currency.as_ref() == Some(currency)
    }
}

/// One purchase, with its rate already pinned by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationInput {
    pub investor: InvestorId,
    /// Trusted as given; compliance ran before the allocator.
    pub class: InvestorClass,
    pub currency: CurrencyKind,
    pub amount: CurrencyAmount,
    pub rate: Rate,
    /// Reject instead of returning fewer tokens than this.
    pub min_tokens: Option<TokenAmount>,
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// What the investor gets back.
///
/// `currency_amount_consumed + currency_amount_refunded` always equals the
/// submitted amount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseResult {
    pub tokens_allocated: TokenAmount,
    pub unit_of_account_consumed: Units,
    pub currency_amount_consumed: CurrencyAmount,
    pub currency_amount_refunded: CurrencyAmount,
}

/// Consumption from one sub-allocation (discounted or regular) of one tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierFill {
    pub tier_index: usize,
    pub is_discount: bool,
    pub tokens: TokenAmount,
    pub units: Units,
    pub price: Price,
}

/// The full outcome of a walk; nothing is mutated until it is committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub investor: InvestorId,
    pub class: InvestorClass,
    pub currency: CurrencyKind,
    pub amount: CurrencyAmount,
    pub rate: Rate,
    /// `amount` converted at `rate`, truncated.
    pub requested_units: Units,
    /// `requested_units` after the investor's cap headroom.
    pub available_units: Units,
    /// In walk order. Never contains a zero-token fill.
    pub fills: Vec<TierFill>,
    pub result: PurchaseResult,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Every variant leaves tier and cap state untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// Submitted amount is zero.
    InvalidAmount,
    /// The pinned rate cannot convert in both directions.
    RateUnavailable { currency: CurrencyKind },
    /// First purchase below the sale minimum.
    BelowMinimum { requested: Units, minimum: Units },
    /// No tier has capacity left.
    SoldOut,
    /// NonAccredited investor is at or over their limit.
    CapExceeded {
        investor: InvestorId,
        limit: Units,
        invested: Units,
    },
    /// The spendable units do not buy a single token base unit.
    ZeroAllocation { available: Units },
    /// Fewer tokens than the caller's floor.
    SlippageExceeded {
        min_tokens: TokenAmount,
        tokens: TokenAmount,
    },
    /// A checked multiply/add failed.
    Overflow { stage: &'static str },
    /// A tier commit was refused (plan built against a different snapshot).
    CapacityExceeded(TierLedgerError),
    /// A cap commit was refused (plan built against a different snapshot).
    CapCommit(CapError),
}

impl std::fmt::Display for AllocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAmount => write!(f, "purchase amount must be > 0"),
            Self::RateUnavailable { currency } => write!(f, "no usable rate for {currency}"),
            Self::BelowMinimum { requested, minimum } => write!(
                f,
                "first investment of {requested} units is below the minimum of {minimum}"
            ),
            Self::SoldOut => write!(f, "sale sold out"),
            Self::CapExceeded {
                investor,
                limit,
                invested,
            } => write!(
                f,
                "investor {investor} has invested {invested} of a {limit} unit limit"
            ),
            Self::ZeroAllocation { available } => {
                write!(f, "{available} units buy zero tokens at the current tier price")
            }
            Self::SlippageExceeded { min_tokens, tokens } => {
                write!(f, "allocation of {tokens} tokens is below requested minimum {min_tokens}")
            }
            Self::Overflow { stage } => write!(f, "arithmetic overflow during {stage}"),
            Self::CapacityExceeded(e) => write!(f, "tier commit refused: {e}"),
            Self::CapCommit(e) => write!(f, "cap commit refused: {e}"),
        }
    }
}

impl std::error::Error for AllocationError {}
