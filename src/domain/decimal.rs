//! Lossless decimal numeric type backed by rust_decimal.
//!
//! All quantity, price and score arithmetic in the engine goes through this
//! wrapper; compounding over long histories makes binary floating point
//! unacceptable.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal as RustDecimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lossless decimal numeric type for financial calculations.
///
/// Serializes to a JSON number (not a string) by default.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::float")] RustDecimal);

impl Decimal {
    pub fn new(value: RustDecimal) -> Self {
        Decimal(value)
    }

    /// Parse a Decimal from a string losslessly.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s).map(Decimal)
    }

    /// Format as a canonical string: no exponent notation, no trailing zeros.
    pub fn to_canonical_string(&self) -> String {
        format!("{}", self.0.normalize())
    }

    pub fn inner(&self) -> RustDecimal {
        self.0
    }

    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    pub fn one() -> Self {
        Decimal(RustDecimal::ONE)
    }

    pub fn hundred() -> Self {
        Decimal(RustDecimal::ONE_HUNDRED)
    }

    pub fn from_i64(value: i64) -> Self {
        Decimal(RustDecimal::from(value))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    pub fn abs(&self) -> Self {
        Decimal(self.0.abs())
    }

    pub fn max(self, other: Self) -> Self {
        if self >= other {
            self
        } else {
            other
        }
    }

    /// Compound this value by a percentage delta: `self * (1 + delta/100)`.
    pub fn compound(&self, delta_pct: Decimal) -> Self {
        Decimal(self.0 * (RustDecimal::ONE + delta_pct.0 / RustDecimal::ONE_HUNDRED))
    }

    /// The multiplicative ratio `self / base`, or None when `base` is zero.
    pub fn ratio_to(&self, base: Decimal) -> Option<Self> {
        if base.is_zero() {
            None
        } else {
            Some(Decimal(self.0 / base.0))
        }
    }

    /// Base-2 logarithm; None for values <= 0 or on internal overflow.
    pub fn log2(&self) -> Option<Self> {
        if !self.is_positive() {
            return None;
        }
        let two_ln = RustDecimal::TWO.checked_ln()?;
        Some(Decimal(self.0.checked_ln()? / two_ln))
    }

    /// Square root; None for negative values.
    pub fn sqrt(&self) -> Option<Self> {
        self.0.sqrt().map(Decimal)
    }

    /// Lossy conversion for display-adjacent uses only; never used in bookkeeping.
    pub fn to_f64_lossy(&self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}

impl From<Decimal> for RustDecimal {
    fn from(value: Decimal) -> Self {
        value.0
    }
}

impl std::ops::Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Decimal {
    type Output = Decimal;

    fn mul(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 * rhs.0)
    }
}

impl std::ops::Div for Decimal {
    type Output = Decimal;

    fn div(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 / rhs.0)
    }
}

impl std::ops::Neg for Decimal {
    type Output = Decimal;

    fn neg(self) -> Decimal {
        Decimal(-self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_parse_roundtrip() {
        for s in ["123.456", "0.0001", "1000000", "-123.456", "0"] {
            let d = dec(s);
            assert_eq!(dec(&d.to_canonical_string()), d, "roundtrip failed for {}", s);
        }
    }

    #[test]
    fn test_canonical_no_exponent_no_trailing_zeros() {
        assert_eq!(dec("123.4500").to_canonical_string(), "123.45");
        assert!(!dec("123").to_canonical_string().contains('e'));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!((dec("10.5") + dec("2.5")).to_canonical_string(), "13");
        assert_eq!((dec("10.5") - dec("2.5")).to_canonical_string(), "8");
        assert_eq!((dec("10.5") * dec("2.5")).to_canonical_string(), "26.25");
        assert_eq!((dec("10") / dec("4")).to_canonical_string(), "2.5");
    }

    #[test]
    fn test_compound() {
        // 50 * (1 + 25/100) = 62.5
        assert_eq!(dec("50").compound(dec("25")), dec("62.5"));
        // compounding by zero is the identity
        assert_eq!(dec("50").compound(dec("0")), dec("50"));
        // negative deltas shrink the score
        assert_eq!(dec("100").compound(dec("-50")), dec("50"));
    }

    #[test]
    fn test_ratio_to() {
        assert_eq!(dec("81").ratio_to(dec("50")), Some(dec("1.62")));
        assert_eq!(dec("81").ratio_to(Decimal::zero()), None);
    }

    #[test]
    fn test_log2() {
        let eight = dec("8").log2().unwrap();
        let err = (eight - dec("3")).abs();
        assert!(err < dec("0.0000001"), "log2(8) ~= 3, got {}", eight);
        assert_eq!(Decimal::zero().log2(), None);
        assert_eq!(dec("-1").log2(), None);
    }

    #[test]
    fn test_sqrt() {
        assert_eq!(dec("9").sqrt(), Some(dec("3")));
        assert_eq!(dec("-9").sqrt(), None);
    }

    #[test]
    fn test_json_number_serialization() {
        let json = serde_json::to_value(dec("123.456")).unwrap();
        assert!(json.is_number());
    }
}
