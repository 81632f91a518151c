//! Serde helpers for `u128` quantities.
//!
//! JSON numbers above 2^53 are not portable, so quantities are written as
//! decimal strings. Reading accepts either a decimal string or a JSON integer
//! so hand-written configs and fixtures can use plain numbers.
//!
//! Use as `#[serde(with = "sto_schemas::dec")]`.

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::fmt;

pub fn serialize<S>(v: &u128, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_str(&v.to_string())
}

pub fn deserialize<'de, D>(d: D) -> Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    d.deserialize_any(U128Visitor)
}

/// Parse a non-negative decimal integer string (underscores allowed as
/// digit separators, e.g. `"1_000_000"`).
pub fn parse_u128(s: &str) -> Option<u128> {
    let cleaned: String = s.trim().chars().filter(|c| *c != '_').collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    cleaned.parse::<u128>().ok()
}

struct U128Visitor;

impl<'de> Visitor<'de> for U128Visitor {
    type Value = u128;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative integer or decimal integer string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
        Ok(u128::from(v))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
        u128::try_from(v).map_err(|_| E::custom(format!("negative quantity: {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
        parse_u128(v).ok_or_else(|| E::custom(format!("invalid quantity string: {v:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_separators() {
        assert_eq!(parse_u128("1_000_000"), Some(1_000_000));
        assert_eq!(parse_u128(" 42 "), Some(42));
    }

    #[test]
    fn parse_rejects_signs_and_fractions() {
        assert_eq!(parse_u128("-1"), None);
        assert_eq!(parse_u128("1.5"), None);
        assert_eq!(parse_u128(""), None);
    }
}
