use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable investor identity (wallet address, account id, ...).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvestorId(pub String);

impl InvestorId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvestorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A payment currency accepted by a sale (e.g. `ETH`, `POLY`, `USDC`).
///
/// Normalised to upper case on construction so config and request input
/// compare equal regardless of spelling.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CurrencyKind(String);

impl CurrencyKind {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CurrencyKind {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<CurrencyKind> for String {
    fn from(c: CurrencyKind) -> Self {
        c.0
    }
}

impl fmt::Display for CurrencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Regulatory investor class, as reported by the compliance oracle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestorClass {
    /// No per-investor unit-of-account ceiling.
    Accredited,
    /// Bounded by the sale's non-accredited limit (or a per-investor override).
    NonAccredited,
}

impl InvestorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestorClass::Accredited => "ACCREDITED",
            InvestorClass::NonAccredited => "NON_ACCREDITED",
        }
    }
}
