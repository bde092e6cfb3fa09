//! Configuration for the payment gateway server.
//!
//! Loaded from a JSON file whose path comes from `--config` (or `$CONFIG`). Fields missing
//! from the file fall back to environment variables, then to constants. String values that
//! hold secrets or deployment-specific data may be written as `$VAR` / `${VAR}`.
//!
//! ```json
//! {
//!   "environment": "production",
//!   "database": "payments.db",
//!   "pay_to": "$MERCHANT_ADDRESS",
//!   "networks": {
//!     "base-sepolia": {
//!       "rpc": [{ "http": "https://sepolia.base.org", "rate_limit": 20 }],
//!       "signers": ["$EVM_PRIVATE_KEY"]
//!     }
//!   },
//!   "routes": [{ "path": "/report", "price": "$0.01", "network": "base-sepolia" }]
//! }
//! ```

use alloy_primitives::{Address, B256};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::network::Network;
use crate::policy::ThresholdPolicy;
use crate::util::{LiteralOrEnv, MoneyAmount};

/// CLI arguments for the payment gateway server.
#[derive(Parser, Debug)]
#[command(name = "x402-paygate")]
#[command(about = "x402 payment gateway HTTP server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Deployment environment.
///
/// Only `development` may settle on networks without a configured chain client, through the
/// simulated route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => f.write_str("development"),
            Environment::Production => f.write_str("production"),
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("Unknown environment: {other}")),
        }
    }
}

/// Configuration of an RPC provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// HTTP URL for the RPC endpoint.
    pub http: Url,
    /// Requests per second (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
}

/// A validated 32-byte EVM private key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EvmPrivateKey(B256);

impl EvmPrivateKey {
    pub fn as_b256(&self) -> &B256 {
        &self.0
    }
}

impl Debug for EvmPrivateKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("EvmPrivateKey(..)")
    }
}

impl FromStr for EvmPrivateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        B256::from_str(s)
            .map(Self)
            .map_err(|e| format!("Invalid evm private key: {}", e))
    }
}

/// Settlement client configuration for one EVM network.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// RPC providers, used with fallback between them.
    pub rpc: Vec<RpcConfig>,
    /// Private keys of the facilitator wallets, used round-robin.
    pub signers: Vec<LiteralOrEnv<EvmPrivateKey>>,
    #[serde(default = "config_defaults::default_eip1559")]
    pub eip1559: bool,
    /// How long to wait for a transaction receipt.
    #[serde(default = "config_defaults::default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    #[serde(default = "config_defaults::default_confirmations")]
    pub confirmations: u64,
}

/// Policy consulted before settlement.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyConfig {
    /// Organization the gateway charges on behalf of, passed to the policy check.
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(flatten)]
    pub thresholds: ThresholdPolicy,
}

/// A resource gated behind a payment.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    pub path: String,
    pub price: MoneyAmount,
    pub network: Network,
    #[serde(default)]
    pub description: Option<String>,
    /// Recipient for this route; the top-level `pay_to` when absent.
    #[serde(default)]
    pub pay_to: Option<LiteralOrEnv<Address>>,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    #[serde(default = "config_defaults::default_environment")]
    environment: Environment,
    #[serde(default = "config_defaults::default_database")]
    database: String,
    #[serde(default = "config_defaults::default_settlement_timeout_secs")]
    settlement_timeout_secs: u64,
    #[serde(default = "config_defaults::default_requirement_ttl_secs")]
    requirement_ttl_secs: u64,
    #[serde(default)]
    pay_to: Option<LiteralOrEnv<Address>>,
    #[serde(default)]
    policy: PolicyConfig,
    #[serde(default)]
    networks: BTreeMap<Network, NetworkConfig>,
    #[serde(default)]
    routes: Vec<RouteConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: config_defaults::default_port(),
            host: config_defaults::default_host(),
            environment: config_defaults::default_environment(),
            database: config_defaults::default_database(),
            settlement_timeout_secs: config_defaults::default_settlement_timeout_secs(),
            requirement_ttl_secs: config_defaults::default_requirement_ttl_secs(),
            pay_to: None,
            policy: PolicyConfig::default(),
            networks: BTreeMap::new(),
            routes: Vec::new(),
        }
    }
}

pub mod config_defaults {
    use std::env;
    use std::net::{IpAddr, Ipv4Addr};

    use super::Environment;

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    pub const DEFAULT_DATABASE: &str = "payments.db";
    pub const DEFAULT_SETTLEMENT_TIMEOUT_SECS: u64 = 60;
    pub const DEFAULT_REQUIREMENT_TTL_SECS: u64 = 300;

    /// Returns the default port value with fallback: $PORT env var -> 8080
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Returns the default host value with fallback: $HOST env var -> "0.0.0.0"
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HOST)
    }

    /// $APP_ENV -> development
    pub fn default_environment() -> Environment {
        env::var("APP_ENV")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(Environment::Development)
    }

    /// $DATABASE_PATH -> payments.db
    pub fn default_database() -> String {
        env::var("DATABASE_PATH").unwrap_or_else(|_| DEFAULT_DATABASE.to_string())
    }

    pub fn default_settlement_timeout_secs() -> u64 {
        DEFAULT_SETTLEMENT_TIMEOUT_SECS
    }

    pub fn default_requirement_ttl_secs() -> u64 {
        DEFAULT_REQUIREMENT_TTL_SECS
    }

    pub fn default_eip1559() -> bool {
        true
    }

    pub fn default_receipt_timeout_secs() -> u64 {
        30
    }

    pub fn default_confirmations() -> u64 {
        1
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Route {0} has no pay_to and no top-level pay_to is set")]
    MissingPayTo(String),
    #[error("Network {0} must list at least one rpc endpoint and one signer")]
    IncompleteNetwork(Network),
    #[error("Route path {0:?} must start with '/' and appear once")]
    InvalidRoutePath(String),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// SQLite path, or `":memory:"`.
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn settlement_timeout(&self) -> Duration {
        Duration::from_secs(self.settlement_timeout_secs)
    }

    pub fn requirement_ttl(&self) -> Duration {
        Duration::from_secs(self.requirement_ttl_secs)
    }

    pub fn pay_to(&self) -> Option<Address> {
        self.pay_to.as_ref().map(|a| *a.inner())
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn networks(&self) -> &BTreeMap<Network, NetworkConfig> {
        &self.networks
    }

    pub fn routes(&self) -> &[RouteConfig] {
        &self.routes
    }

    /// Recipient of payments for `route`.
    pub fn route_pay_to(&self, route: &RouteConfig) -> Option<Address> {
        route
            .pay_to
            .as_ref()
            .map(|a| *a.inner())
            .or_else(|| self.pay_to())
    }

    /// Load configuration from CLI arguments and JSON file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut paths = std::collections::HashSet::new();
        for route in &self.routes {
            if !route.path.starts_with('/') || !paths.insert(route.path.as_str()) {
                return Err(ConfigError::InvalidRoutePath(route.path.clone()));
            }
            if self.route_pay_to(route).is_none() {
                return Err(ConfigError::MissingPayTo(route.path.clone()));
            }
        }
        for (network, network_config) in &self.networks {
            if network_config.rpc.is_empty() || network_config.signers.is_empty() {
                return Err(ConfigError::IncompleteNetwork(*network));
            }
        }
        Ok(())
    }
}
