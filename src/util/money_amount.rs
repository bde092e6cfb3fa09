use alloy_primitives::U256;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

/// A human-readable currency amount, such as a route price of `"$0.01"`.
///
/// Accepts strings like `"$0.01"`, `"1,000"`, `"20 USDC"` or raw numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MoneyAmount(pub Decimal);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MoneyAmountParseError {
    #[error("Invalid number format")]
    InvalidFormat,
    #[error(
        "Amount must be between {} and {}",
        money_amount::MIN_STR,
        money_amount::MAX_STR
    )]
    OutOfRange,
    #[error("Negative value is not allowed")]
    Negative,
    #[error("Amount {money} is below the smallest unit of a {decimals}-decimal token")]
    BelowSmallestUnit { money: Decimal, decimals: u32 },
}

mod money_amount {
    use super::*;
    use once_cell::sync::Lazy;

    pub const MIN_STR: &str = "0.000000001";
    pub const MAX_STR: &str = "999999999";

    pub static MIN: Lazy<Decimal> = Lazy::new(|| Decimal::new(1, 9));
    pub static MAX: Lazy<Decimal> = Lazy::new(|| Decimal::from(999_999_999u64));

    // Everything that is not a digit, dot or minus sign: currency symbols, separators, units.
    pub static NOISE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[^\d\.\-]+").ok());
}

impl MoneyAmount {
    pub fn parse(input: &str) -> Result<Self, MoneyAmountParseError> {
        let cleaned = match money_amount::NOISE.as_ref() {
            Some(noise) => noise.replace_all(input, "").into_owned(),
            None => input.trim().to_string(),
        };

        let parsed =
            Decimal::from_str(&cleaned).map_err(|_| MoneyAmountParseError::InvalidFormat)?;
        Self::checked(parsed)
    }

    fn checked(value: Decimal) -> Result<Self, MoneyAmountParseError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MoneyAmountParseError::Negative);
        }
        if value < *money_amount::MIN || value > *money_amount::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }
        Ok(MoneyAmount(value))
    }

    /// Number of digits after the decimal point in the original input.
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// Converts to the token's smallest unit: multiply by `10^decimals`, truncate.
    ///
    /// Amounts that truncate to zero units are rejected rather than priced at zero.
    pub fn to_token_units(&self, decimals: u32) -> Result<U256, MoneyAmountParseError> {
        let below = || MoneyAmountParseError::BelowSmallestUnit {
            money: self.0,
            decimals,
        };
        let scale = self.0.scale();
        let mantissa = U256::from(self.0.mantissa().unsigned_abs());
        let units = if scale <= decimals {
            mantissa * U256::from(10u64).pow(U256::from(decimals - scale))
        } else {
            mantissa / U256::from(10u64).pow(U256::from(scale - decimals))
        };
        if units.is_zero() {
            return Err(below());
        }
        Ok(units)
    }

    /// Inverse of [`MoneyAmount::to_token_units`], for display and record keeping.
    pub fn from_token_units(units: U256, decimals: u32) -> Option<Self> {
        let units = i128::try_from(units).ok()?;
        let value = Decimal::try_from_i128_with_scale(units, decimals).ok()?;
        Some(MoneyAmount(value.normalize()))
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl TryFrom<&str> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        MoneyAmount::from_str(value)
    }
}

impl TryFrom<f64> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        let decimal = Decimal::from_f64(value).ok_or(MoneyAmountParseError::OutOfRange)?;
        Self::checked(decimal)
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl<'de> serde::Deserialize<'de> for MoneyAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Text(String),
            Number(f64),
        }
        match Wire::deserialize(deserializer)? {
            Wire::Text(s) => MoneyAmount::parse(&s).map_err(serde::de::Error::custom),
            Wire::Number(n) => MoneyAmount::try_from(n).map_err(serde::de::Error::custom),
        }
    }
}

impl serde::Serialize for MoneyAmount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
