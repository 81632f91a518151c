//! Fixed-point quantities.
//!
//! Three unrelated scales flow through a purchase:
//!
//! - [`Units`]: unit-of-account base units (e.g. USD at 1e-18).
//! - [`TokenAmount`]: sale-token base units.
//! - [`CurrencyAmount`]: base units of whatever currency the investor paid in.
//!
//! Each is a distinct `u128` newtype so the compiler rejects mixing them.
//! There is intentionally no `From<u128>`; use `::new` and `::raw` at the
//! boundaries. Arithmetic is `checked_*` only; callers decide what overflow
//! means for them.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! quantity {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(#[serde(with = "crate::dec")] u128);

        impl $name {
            pub const ZERO: $name = $name(0);
            pub const MAX: $name = $name(u128::MAX);

            #[inline]
            pub const fn new(raw: u128) -> Self {
                $name(raw)
            }

            #[inline]
            pub const fn raw(self) -> u128 {
                self.0
            }

            #[inline]
            pub const fn is_zero(self) -> bool {
                self.0 == 0
            }

            #[inline]
            pub fn checked_add(self, rhs: $name) -> Option<$name> {
                self.0.checked_add(rhs.0).map($name)
            }

            #[inline]
            pub fn checked_sub(self, rhs: $name) -> Option<$name> {
                self.0.checked_sub(rhs.0).map($name)
            }

            /// Clamps at zero.
            #[inline]
            pub fn saturating_sub(self, rhs: $name) -> $name {
                $name(self.0.saturating_sub(rhs.0))
            }

            /// Clamps at `MAX`. Reporting totals only; accounting paths use
            /// `checked_add`.
            #[inline]
            pub fn saturating_add(self, rhs: $name) -> $name {
                $name(self.0.saturating_add(rhs.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

quantity!(
    /// Unit-of-account base units.
    Units
);

quantity!(
    /// Sale-token base units.
    TokenAmount
);

quantity!(
    /// Payment-currency base units (scale depends on the currency).
    CurrencyAmount
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_sub_underflow_is_none() {
        assert_eq!(Units::new(1).checked_sub(Units::new(2)), None);
        assert_eq!(Units::new(5).checked_sub(Units::new(2)), Some(Units::new(3)));
    }

    #[test]
    fn checked_add_overflow_is_none() {
        assert_eq!(TokenAmount::MAX.checked_add(TokenAmount::new(1)), None);
    }

    #[test]
    fn saturating_sub_clamps_at_zero() {
        assert_eq!(
            CurrencyAmount::new(3).saturating_sub(CurrencyAmount::new(10)),
            CurrencyAmount::ZERO
        );
    }

    #[test]
    fn serializes_as_decimal_string() {
        let v = serde_json::to_string(&Units::new(u128::MAX)).unwrap();
        assert_eq!(v, format!("\"{}\"", u128::MAX));
    }

    #[test]
    fn deserializes_from_string_or_number() {
        let a: TokenAmount = serde_json::from_str("\"1_000\"").unwrap();
        let b: TokenAmount = serde_json::from_str("1000").unwrap();
        assert_eq!(a, b);
        assert!(serde_json::from_str::<TokenAmount>("-5").is_err());
    }
}
