//! Naira amounts backed by rust_decimal.
//!
//! Amounts are persisted as canonical strings and summed in Rust; SQLite's
//! `SUM` would go through REAL and lose precision.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Non-negative money amount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(Decimal);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("invalid amount {0:?}")]
    Invalid(String),
    #[error("amount must not be negative: {0}")]
    Negative(String),
    #[error("amount overflow")]
    Overflow,
}

impl Money {
    pub fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    /// Parse an amount, rejecting negative values.
    pub fn parse(s: &str) -> Result<Self, MoneyError> {
        let value = Decimal::from_str(s.trim()).map_err(|_| MoneyError::Invalid(s.to_string()))?;
        Self::try_from_decimal(value)
    }

    pub fn try_from_decimal(value: Decimal) -> Result<Self, MoneyError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MoneyError::Negative(value.to_string()));
        }
        Ok(Money(value))
    }

    /// Whole naira.
    pub fn naira(amount: u32) -> Self {
        Money(Decimal::from(amount))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(self, rhs: Money) -> Result<Money, MoneyError> {
        self.0.checked_add(rhs.0).map(Money).ok_or(MoneyError::Overflow)
    }

    /// Sum of `amounts`; an overflow is an error rather than a panic.
    pub fn total<I: IntoIterator<Item = Money>>(amounts: I) -> Result<Money, MoneyError> {
        amounts.into_iter().try_fold(Money::zero(), Money::checked_add)
    }

    /// Canonical text form (no exponent, no trailing zeros).
    pub fn to_canonical_string(&self) -> String {
        format!("{}", self.0.normalize())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::parse(s)
    }
}

// Serialized as a string so clients never see float rounding.
impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_canonical_string())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Money::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonicalizes() {
        let m = Money::parse("25.00").unwrap();
        assert_eq!(m.to_canonical_string(), "25");
        assert_eq!(Money::parse("12.50").unwrap().to_string(), "12.5");
    }

    #[test]
    fn test_negative_rejected() {
        assert!(matches!(Money::parse("-1"), Err(MoneyError::Negative(_))));
        assert!(matches!(Money::parse("abc"), Err(MoneyError::Invalid(_))));
        assert_eq!(Money::parse("-0").unwrap(), Money::zero());
    }

    #[test]
    fn test_sum_is_exact() {
        let parts = vec![
            Money::parse("0.1").unwrap(),
            Money::parse("0.2").unwrap(),
            Money::parse("0.3").unwrap(),
        ];
        let total = Money::total(parts).unwrap();
        assert_eq!(total.to_canonical_string(), "0.6");
    }

    #[test]
    fn test_overflow_is_an_error() {
        let max = Money::try_from_decimal(Decimal::MAX).unwrap();
        assert_eq!(max.checked_add(Money::naira(1)), Err(MoneyError::Overflow));
        assert_eq!(Money::total([max, Money::naira(1)]), Err(MoneyError::Overflow));
        assert_eq!(max.checked_add(Money::zero()), Ok(max));
    }

    #[test]
    fn test_json_is_string() {
        let json = serde_json::to_value(Money::naira(25)).unwrap();
        assert_eq!(json, serde_json::json!("25"));
        let back: Money = serde_json::from_value(json).unwrap();
        assert_eq!(back, Money::naira(25));
    }
}
