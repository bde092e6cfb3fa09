//! Supported networks and their USDC deployments.
//!
//! Every network the engine can price or settle on is a variant of [`Network`], and every
//! variant carries its chain metadata through [`Network::info`]: chain id, the USDC contract,
//! the token's EIP-712 domain name and version, and its decimal scale. Network names coming
//! from configuration or from the wire are resolved into a variant once, at parse time, so
//! downstream code never matches on strings.
//!
//! The one non-EVM-style entry is the home chain (`arc-testnet`), where USDC is the native
//! asset and settlement is a direct transfer rather than an EIP-3009 redemption.

use alloy_primitives::{Address, address};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Static description of a network and the USDC token deployed on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    /// Wire name, as used in `network` fields.
    pub name: &'static str,
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// USDC contract (the EIP-712 `verifyingContract`).
    pub usdc: Address,
    /// EIP-712 domain `name` of the token.
    pub eip712_name: &'static str,
    /// EIP-712 domain `version` of the token.
    pub eip712_version: &'static str,
    /// Token decimals.
    pub decimals: u32,
    /// Real funds move on this network.
    pub mainnet: bool,
    /// The system's home chain, settled with a native transfer.
    pub home: bool,
}

/// Networks known to the engine.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Network {
    /// Arc testnet (chain ID 5042002), the home chain.
    #[serde(rename = "arc-testnet")]
    ArcTestnet,
    /// Base mainnet (chain ID 8453).
    #[serde(rename = "base")]
    Base,
    /// Base Sepolia testnet (chain ID 84532).
    #[serde(rename = "base-sepolia")]
    BaseSepolia,
    /// Polygon mainnet (chain ID 137).
    #[serde(rename = "polygon")]
    Polygon,
    /// Polygon Amoy testnet (chain ID 80002).
    #[serde(rename = "polygon-amoy")]
    PolygonAmoy,
    /// Avalanche C-Chain (chain ID 43114).
    #[serde(rename = "avalanche")]
    Avalanche,
    /// Avalanche Fuji testnet (chain ID 43113).
    #[serde(rename = "avalanche-fuji")]
    AvalancheFuji,
    /// Sei mainnet (chain ID 1329).
    #[serde(rename = "sei")]
    Sei,
    /// Sei testnet (chain ID 1328).
    #[serde(rename = "sei-testnet")]
    SeiTestnet,
    /// XDC mainnet (chain ID 50).
    #[serde(rename = "xdc")]
    Xdc,
}

static ARC_TESTNET: NetworkInfo = NetworkInfo {
    name: "arc-testnet",
    chain_id: 5042002,
    usdc: address!("0x3600000000000000000000000000000000000000"),
    eip712_name: "USDC",
    eip712_version: "2",
    decimals: 6,
    mainnet: false,
    home: true,
};

static BASE: NetworkInfo = NetworkInfo {
    name: "base",
    chain_id: 8453,
    usdc: address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
    eip712_name: "USD Coin",
    eip712_version: "2",
    decimals: 6,
    mainnet: true,
    home: false,
};

static BASE_SEPOLIA: NetworkInfo = NetworkInfo {
    name: "base-sepolia",
    chain_id: 84532,
    usdc: address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
    eip712_name: "USDC",
    eip712_version: "2",
    decimals: 6,
    mainnet: false,
    home: false,
};

static POLYGON: NetworkInfo = NetworkInfo {
    name: "polygon",
    chain_id: 137,
    usdc: address!("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"),
    eip712_name: "USDC",
    eip712_version: "2",
    decimals: 6,
    mainnet: true,
    home: false,
};

static POLYGON_AMOY: NetworkInfo = NetworkInfo {
    name: "polygon-amoy",
    chain_id: 80002,
    usdc: address!("0x41E94Eb019C0762f9Bfcf9Fb1E58725BfB0e7582"),
    eip712_name: "USDC",
    eip712_version: "2",
    decimals: 6,
    mainnet: false,
    home: false,
};

static AVALANCHE: NetworkInfo = NetworkInfo {
    name: "avalanche",
    chain_id: 43114,
    usdc: address!("0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E"),
    eip712_name: "USD Coin",
    eip712_version: "2",
    decimals: 6,
    mainnet: true,
    home: false,
};

static AVALANCHE_FUJI: NetworkInfo = NetworkInfo {
    name: "avalanche-fuji",
    chain_id: 43113,
    usdc: address!("0x5425890298aed601595a70AB815c96711a31Bc65"),
    eip712_name: "USD Coin",
    eip712_version: "2",
    decimals: 6,
    mainnet: false,
    home: false,
};

static SEI: NetworkInfo = NetworkInfo {
    name: "sei",
    chain_id: 1329,
    usdc: address!("0xe15fC38F6D8c56aF07bbCBe3BAf5708A2Bf42392"),
    eip712_name: "USDC",
    eip712_version: "2",
    decimals: 6,
    mainnet: true,
    home: false,
};

static SEI_TESTNET: NetworkInfo = NetworkInfo {
    name: "sei-testnet",
    chain_id: 1328,
    usdc: address!("0x4fCF1784B31630811181f670Aea7A7bEF803eaED"),
    eip712_name: "USDC",
    eip712_version: "2",
    decimals: 6,
    mainnet: false,
    home: false,
};

static XDC: NetworkInfo = NetworkInfo {
    name: "xdc",
    chain_id: 50,
    usdc: address!("0xfA2958CB79b0491CC627c1557F441eF849Ca8eb1"),
    eip712_name: "USDC",
    eip712_version: "2",
    decimals: 6,
    mainnet: true,
    home: false,
};

impl Network {
    /// Default network used when a name cannot be resolved outside of a settlement path.
    pub const FALLBACK: Network = Network::BaseSepolia;

    /// Return all known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[
            Network::ArcTestnet,
            Network::Base,
            Network::BaseSepolia,
            Network::Polygon,
            Network::PolygonAmoy,
            Network::Avalanche,
            Network::AvalancheFuji,
            Network::Sei,
            Network::SeiTestnet,
            Network::Xdc,
        ]
    }

    pub fn info(&self) -> &'static NetworkInfo {
        match self {
            Network::ArcTestnet => &ARC_TESTNET,
            Network::Base => &BASE,
            Network::BaseSepolia => &BASE_SEPOLIA,
            Network::Polygon => &POLYGON,
            Network::PolygonAmoy => &POLYGON_AMOY,
            Network::Avalanche => &AVALANCHE,
            Network::AvalancheFuji => &AVALANCHE_FUJI,
            Network::Sei => &SEI,
            Network::SeiTestnet => &SEI_TESTNET,
            Network::Xdc => &XDC,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.info().chain_id
    }

    pub fn usdc(&self) -> Address {
        self.info().usdc
    }

    pub fn decimals(&self) -> u32 {
        self.info().decimals
    }

    /// Whether real value moves on this network.
    pub fn is_mainnet(&self) -> bool {
        self.info().mainnet
    }

    pub fn is_home(&self) -> bool {
        self.info().home
    }

    pub fn by_chain_id(chain_id: u64) -> Option<Network> {
        Self::variants()
            .iter()
            .copied()
            .find(|n| n.chain_id() == chain_id)
    }

    /// Resolves a network name, substituting [`Network::FALLBACK`] for unknown names.
    ///
    /// The substitution is logged as a configuration gap. Settlement paths must use
    /// [`FromStr`] instead and reject unknown names.
    pub fn resolve_or_fallback(name: &str) -> Network {
        match name.parse::<Network>() {
            Ok(network) => network,
            Err(_) => {
                tracing::warn!(
                    network = name,
                    fallback = %Self::FALLBACK,
                    "Unknown network, using fallback token domain; configuration gap"
                );
                Self::FALLBACK
            }
        }
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.info().name)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown network: {0}")]
pub struct UnknownNetwork(pub String);

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::variants()
            .iter()
            .copied()
            .find(|n| n.info().name == s)
            .ok_or_else(|| UnknownNetwork(s.to_string()))
    }
}

impl From<Network> for String {
    fn from(value: Network) -> Self {
        value.to_string()
    }
}
