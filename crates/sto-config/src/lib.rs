//! sto-config
//!
//! Layered YAML configuration for a sale.
//!
//! - Documents merge in order; later documents override earlier ones.
//! - Literal secrets are refused (`CONFIG_SECRET_DETECTED`).
//! - The merged document is rendered as canonical JSON and hashed, so two
//!   operators can compare `config_hash` values before opening a sale.
//! - Leaves nothing reads are reported per surface (`CONFIG_UNUSED_KEYS`).

mod sale;
mod secrets;

pub use sale::{parse_price, RateQuote, SaleConfig, SaleSetup};
pub use secrets::{resolve_admin_token, AdminToken};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Leaf strings starting with one of these are treated as pasted credentials.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",
    "sk_live",
    "sk_test",
    "AKIA",
    "-----BEGIN",
    "ghp_",
    "glpat-",
    "xoxb-",
    "xoxp-",
    "0x", // raw private keys
];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    pub fn sale_setup(&self) -> Result<SaleSetup> {
        SaleSetup::from_config_json(&self.config_json)
    }
}

pub fn load_layered_yaml<P: AsRef<Path>>(paths: &[P]) -> Result<LoadedConfig> {
    let mut docs = Vec::with_capacity(paths.len());
    for p in paths {
        let p = p.as_ref();
        docs.push(fs::read_to_string(p).with_context(|| format!("read config {:?}", p))?);
    }
    let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());
    for (i, raw) in yaml_docs.iter().enumerate() {
        let doc: serde_yaml::Value =
            serde_yaml::from_str(raw).with_context(|| format!("invalid yaml in layer {i}"))?;
        let doc = serde_json::to_value(doc).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, doc);
    }

    enforce_no_secret_literals(&merged)?;

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = hex::encode(Sha256::digest(canonical_json.as_bytes()));
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

/// Objects merge key by key; anything else in `b` replaces `a`.
fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b) => b,
    }
}

/// Compact JSON with keys sorted at every depth.
pub fn canonicalize_json(v: &Value) -> Result<String> {
    fn sorted(v: &Value) -> Value {
        match v {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                Value::Object(keys.into_iter().map(|k| (k.clone(), sorted(&map[k]))).collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    serde_json::to_string(&sorted(v)).context("canonical json serialize failed")
}

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);
    for ptr in leaves {
        if let Some(s) = v.pointer(&ptr).and_then(Value::as_str) {
            if looks_like_secret(s) {
                bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
            }
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    if let Some(hex_part) = t.strip_prefix("0x") {
        // 32-byte hex blobs; 20-byte addresses are fine.
        return hex_part.len() >= 64 && hex_part.chars().all(|c| c.is_ascii_hexdigit());
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

// ---------------------------------------------------------------------------
// Unused keys
// ---------------------------------------------------------------------------

/// Which binary is reading the config. Each reads a different subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSurface {
    Simulate,
    Daemon,
}

impl ConfigSurface {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigSurface::Simulate => "SIMULATE",
            ConfigSurface::Daemon => "DAEMON",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    pub surface: String,
    pub consumed_prefixes: Vec<String>,
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// JSON-pointer prefixes each surface actually reads.
///
/// Keep in sync with `SaleSetup::from_config_json` and `resolve_admin_token`.
pub fn consumed_pointers(surface: ConfigSurface) -> &'static [&'static str] {
    match surface {
        ConfigSurface::Simulate => &["/sale", "/tiers", "/rates"],
        ConfigSurface::Daemon => &[
            "/sale",
            "/tiers",
            "/rates",
            "/daemon/admin_token_env",
            "/daemon/journal_path",
        ],
    }
}

pub fn report_unused_keys(
    surface: ConfigSurface,
    config_json: &Value,
    policy: UnusedKeyPolicy,
) -> Result<UnusedKeyReport> {
    let consumed: BTreeSet<String> = consumed_pointers(surface)
        .iter()
        .map(|p| normalize_pointer(p))
        .collect();
    let consumed_prefixes: Vec<String> = consumed.into_iter().collect();

    let mut leaves = Vec::new();
    collect_leaf_pointers(config_json, "", &mut leaves);

    let mut unused: Vec<String> = leaves
        .into_iter()
        .filter(|leaf| !consumed_prefixes.iter().any(|p| is_prefix_pointer(p, leaf)))
        .collect();
    unused.sort();
    unused.dedup();

    let report = UnusedKeyReport {
        surface: surface.as_str().to_string(),
        consumed_prefixes,
        unused_leaf_pointers: unused,
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        let first: Vec<&String> = report.unused_leaf_pointers.iter().take(12).collect();
        bail!(
            "CONFIG_UNUSED_KEYS (surface={}): {} unused leaf key(s): {:?}",
            report.surface,
            report.unused_leaf_pointers.len(),
            first
        );
    }

    Ok(report)
}

fn normalize_pointer(p: &str) -> String {
    let mut s = p.trim().to_string();
    if !s.starts_with('/') {
        s.insert(0, '/');
    }
    while s.len() > 1 && s.ends_with('/') {
        s.pop();
    }
    s
}

/// "/a/b" covers "/a/b" and "/a/b/c", not "/a/bc".
fn is_prefix_pointer(prefix: &str, leaf: &str) -> bool {
    prefix == "/"
        || leaf == prefix
        || (leaf.starts_with(prefix) && leaf[prefix.len()..].starts_with('/'))
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map {
                let token = k.replace('~', "~0").replace('/', "~1");
                collect_leaf_pointers(vv, &format!("{prefix}/{token}"), out);
            }
        }
        Value::Array(items) => {
            for (i, vv) in items.iter().enumerate() {
                collect_leaf_pointers(vv, &format!("{prefix}/{i}"), out);
            }
        }
        _ => out.push(if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }),
    }
}
