//! Request and response types for all sto-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests. No business logic lives here.

use serde::{Deserialize, Serialize};
use sto_sale::SaleStats;
use sto_schemas::{InvestorClass, InvestorId, Units};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// /v1/sale/status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub config_hash: String,
    pub stats: SaleStats,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code, e.g. `CAP_EXCEEDED`.
    pub error: String,
    pub message: String,
    pub retryable: bool,
}

// ---------------------------------------------------------------------------
// /v1/admin/*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistRequest {
    pub investor: InvestorId,
    pub class: InvestorClass,
    /// `false` revokes.
    #[serde(default = "default_true")]
    pub allowed: bool,
}

fn default_true() -> bool {
    true
}

/// Push a fresh quote; it is stamped with the daemon clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateUpdateRequest {
    pub currency: sto_schemas::CurrencyKind,
    #[serde(with = "sto_schemas::dec")]
    pub numerator: u128,
    #[serde(with = "sto_schemas::dec")]
    pub denominator: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitOverrideRequest {
    pub investor: InvestorId,
    pub limit: Units,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminAck {
    pub ok: bool,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeResponse {
    pub ok: bool,
    pub unsold_tokens: sto_schemas::TokenAmount,
    pub version: u64,
}
