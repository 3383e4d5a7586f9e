//! Deployment network allow-list
//!
//! The set of networks the pipeline may deploy to is fixed at compile time.
//! A [`Network`] value can only be obtained for an allow-listed name, so any
//! code that takes a `Network` (the deployer in particular) cannot be handed
//! a disallowed target.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// An allow-listed deployment target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    /// Local anvil node
    Anvil,
    /// Ethereum Sepolia testnet
    Sepolia,
    /// Base Sepolia testnet
    BaseSepolia,
    /// Arbitrum Sepolia testnet
    ArbitrumSepolia,
}

impl Network {
    /// Every allow-listed network, in display order.
    pub const ALL: [Network; 4] = [
        Network::Anvil,
        Network::Sepolia,
        Network::BaseSepolia,
        Network::ArbitrumSepolia,
    ];

    /// Canonical lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Anvil => "anvil",
            Self::Sepolia => "sepolia",
            Self::BaseSepolia => "base-sepolia",
            Self::ArbitrumSepolia => "arbitrum-sepolia",
        }
    }

    /// EVM chain id
    pub fn chain_id(&self) -> u64 {
        match self {
            Self::Anvil => 31337,
            Self::Sepolia => 11_155_111,
            Self::BaseSepolia => 84532,
            Self::ArbitrumSepolia => 421_614,
        }
    }

    /// Whether an explorer verification API exists for this network.
    pub fn supports_verification(&self) -> bool {
        !matches!(self, Self::Anvil)
    }

    /// Comma-separated allow-list, for error messages.
    pub fn allow_list() -> String {
        Self::ALL
            .iter()
            .map(|n| n.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Returned when a requested network is not on the allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("unsupported network '{requested}' (allowed: {allowed})")]
pub struct UnsupportedNetwork {
    pub requested: String,
    pub allowed: String,
}

impl FromStr for Network {
    type Err = UnsupportedNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "anvil" | "local" | "localhost" => Ok(Self::Anvil),
            "sepolia" => Ok(Self::Sepolia),
            "base-sepolia" => Ok(Self::BaseSepolia),
            "arbitrum-sepolia" => Ok(Self::ArbitrumSepolia),
            _ => Err(UnsupportedNetwork {
                requested: s.to_string(),
                allowed: Self::allow_list(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_allowed_networks() {
        assert_eq!("sepolia".parse::<Network>().unwrap(), Network::Sepolia);
        assert_eq!("Base_Sepolia".parse::<Network>().unwrap(), Network::BaseSepolia);
        assert_eq!("localhost".parse::<Network>().unwrap(), Network::Anvil);
    }

    #[test]
    fn test_mainnet_rejected() {
        let err = "mainnet".parse::<Network>().unwrap_err();
        assert_eq!(err.requested, "mainnet");
        assert!(err.to_string().contains("sepolia"));
    }

    #[test]
    fn test_names_round_trip() {
        for network in Network::ALL {
            assert_eq!(network.name().parse::<Network>().unwrap(), network);
        }
    }
}
