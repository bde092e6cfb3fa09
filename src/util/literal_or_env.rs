//! Configuration values that may point at an environment variable.
//!
//! ```json
//! {
//!   "http": "https://sepolia.base.org",
//!   "signers": ["$EVM_PRIVATE_KEY"],
//!   "pay_to": "${MERCHANT_ADDRESS}"
//! }
//! ```
//!
//! Secrets stay out of the config file and are resolved once, while it is parsed.

use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::str::FromStr;

/// A value given either literally or as `$VAR` / `${VAR}`, resolved during deserialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn from_literal(value: T) -> Self {
        Self(value)
    }

    pub fn inner(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }

    /// Returns the variable name when `s` is `$VAR` or `${VAR}`.
    fn env_var_name(s: &str) -> Option<&str> {
        if let Some(braced) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
            return Some(braced);
        }
        let bare = s.strip_prefix('$')?;
        let valid = !bare.is_empty() && bare.chars().all(|c| c.is_alphanumeric() || c == '_');
        valid.then_some(bare)
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        let value = match Self::env_var_name(&s) {
            Some(var_name) => std::env::var(var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Environment variable '{var_name}' not found (referenced as '{s}')"
                ))
            })?,
            None => s,
        };

        value
            .parse::<T>()
            .map(LiteralOrEnv)
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse value: {e}")))
    }
}

impl<T: Serialize> Serialize for LiteralOrEnv<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_values_parse_directly() {
        let port: LiteralOrEnv<u16> = serde_json::from_str("\"8080\"").unwrap();
        assert_eq!(*port, 8080);
    }

    #[test]
    fn env_var_syntax() {
        assert_eq!(LiteralOrEnv::<String>::env_var_name("$RPC_URL"), Some("RPC_URL"));
        assert_eq!(LiteralOrEnv::<String>::env_var_name("${RPC_URL}"), Some("RPC_URL"));
        assert_eq!(LiteralOrEnv::<String>::env_var_name("$"), None);
        assert_eq!(LiteralOrEnv::<String>::env_var_name("$not a var"), None);
        assert_eq!(LiteralOrEnv::<String>::env_var_name("plain"), None);
    }

    #[test]
    fn missing_env_var_is_an_error() {
        let result: Result<LiteralOrEnv<String>, _> =
            serde_json::from_str("\"$X402_PAYGATE_SURELY_UNSET_VAR\"");
        assert!(result.is_err());
    }
}
