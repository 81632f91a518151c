//! Runtime secret resolution.
//!
//! Config stores env var NAMES only (`/daemon/admin_token_env`). The value is
//! read once at startup and handed to the daemon; `Debug` never prints it.

use anyhow::{bail, Result};
use serde_json::Value;

/// Bearer token guarding the daemon's administrative routes.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminToken(String);

impl AdminToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn matches(&self, presented: &str) -> bool {
        self.0 == presented
    }
}

impl std::fmt::Debug for AdminToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminToken(<REDACTED>)")
    }
}

/// Resolve the admin token named by `/daemon/admin_token_env`.
///
/// - pointer absent: `Ok(None)`, admin routes stay closed;
/// - pointer present but the variable is unset or blank: error naming the
///   variable, never its value.
pub fn resolve_admin_token(config_json: &Value) -> Result<Option<AdminToken>> {
    let Some(var) = config_json
        .pointer("/daemon/admin_token_env")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        return Ok(None);
    };

    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(Some(AdminToken(v))),
        _ => bail!("SECRETS_MISSING: env var '{var}' (daemon admin token) is not set or empty"),
    }
}
