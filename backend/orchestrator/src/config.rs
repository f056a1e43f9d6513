//! Application configuration loaded from environment variables.
//!
//! Built once in `main` and shared read-only behind an `Arc` afterwards.

use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::Address;

use crate::errors::{OrchestratorError, Result};

const DEFAULT_IDRX_TOKEN: &str = "0x4a49f09fAfA1c493E5FC12dA89Ae8E0193E7e8AE";

/// An ERC-20 the orchestrator can donate with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenConfig {
    pub address: Address,
    pub decimals: u8,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// EVM JSON-RPC endpoint (e.g. https://sepolia.base.org)
    pub rpc_url: String,
    /// Chain the contracts are deployed on (84532 = Base Sepolia)
    pub chain_id: u64,
    /// Campaign contract; also the spender approved for token transfers
    pub campaign_contract: Address,
    /// IDRX token (2 decimals)
    pub idrx: TokenConfig,
    /// Optional USDC token
    pub usdc: Option<TokenConfig>,
    /// Account that signs writes; `None` means no wallet is connected
    pub wallet_address: Option<Address>,
    /// Crowdfunding backend REST API (campaigns, QRIS gateway)
    pub backend_url: String,
    /// Path to the SQLite transaction journal
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// How often the QRIS flow polls the payment status
    pub qr_poll_interval: Duration,
    /// How long a generated QR code stays pollable
    pub qr_expiry: Duration,
    /// Upper bound on any receipt wait
    pub confirmation_timeout: Duration,
    /// Delay between `eth_getTransactionReceipt` polls
    pub receipt_poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let campaign_contract = lookup("CAMPAIGN_CONTRACT").ok_or_else(|| {
            OrchestratorError::Config("CAMPAIGN_CONTRACT environment variable is required".to_string())
        })?;

        let usdc = match lookup("USDC_TOKEN") {
            Some(address) => Some(TokenConfig {
                address: parse_address("USDC_TOKEN", &address)?,
                decimals: parse("USDC_DECIMALS", &var("USDC_DECIMALS", "6"))?,
            }),
            None => None,
        };

        let wallet_address = lookup("WALLET_ADDRESS")
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_address("WALLET_ADDRESS", &s))
            .transpose()?;

        Ok(Config {
            rpc_url: var("RPC_URL", "https://sepolia.base.org"),
            chain_id: parse("CHAIN_ID", &var("CHAIN_ID", "84532"))?,
            campaign_contract: parse_address("CAMPAIGN_CONTRACT", &campaign_contract)?,
            idrx: TokenConfig {
                address: parse_address("IDRX_TOKEN", &var("IDRX_TOKEN", DEFAULT_IDRX_TOKEN))?,
                decimals: parse("IDRX_DECIMALS", &var("IDRX_DECIMALS", "2"))?,
            },
            usdc,
            wallet_address,
            backend_url: var("BACKEND_URL", "http://localhost:3300")
                .trim_end_matches('/')
                .to_string(),
            database_url: var("DATABASE_URL", "sqlite:./orchestrator.db"),
            api_port: parse("API_PORT", &var("API_PORT", "3001"))?,
            qr_poll_interval: Duration::from_secs(parse(
                "QR_POLL_INTERVAL_SECS",
                &var("QR_POLL_INTERVAL_SECS", "5"),
            )?),
            qr_expiry: Duration::from_secs(parse("QR_EXPIRY_SECS", &var("QR_EXPIRY_SECS", "900"))?),
            confirmation_timeout: Duration::from_secs(parse(
                "CONFIRMATION_TIMEOUT_SECS",
                &var("CONFIRMATION_TIMEOUT_SECS", "180"),
            )?),
            receipt_poll_interval: Duration::from_millis(parse(
                "RECEIPT_POLL_INTERVAL_MILLIS",
                &var("RECEIPT_POLL_INTERVAL_MILLIS", "2000"),
            )?),
        })
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| OrchestratorError::Config(format!("Invalid {key}")))
}

fn parse_address(key: &str, raw: &str) -> Result<Address> {
    Address::from_str(raw.trim())
        .map_err(|_| OrchestratorError::Config(format!("Invalid {key}: not an address")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const CAMPAIGN: &str = "0x1111111111111111111111111111111111111111";

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&[("CAMPAIGN_CONTRACT", CAMPAIGN)])).unwrap();
        assert_eq!(config.chain_id, 84532);
        assert_eq!(config.idrx.decimals, 2);
        assert_eq!(
            config.idrx.address,
            Address::from_str(DEFAULT_IDRX_TOKEN).unwrap()
        );
        assert!(config.usdc.is_none());
        assert!(config.wallet_address.is_none());
        assert_eq!(config.qr_poll_interval, Duration::from_secs(5));
        assert_eq!(config.api_port, 3001);
    }

    #[test]
    fn campaign_contract_is_required() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[test]
    fn rejects_bad_numbers_and_addresses() {
        let err = Config::from_lookup(lookup(&[
            ("CAMPAIGN_CONTRACT", CAMPAIGN),
            ("API_PORT", "not-a-port"),
        ]))
        .unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: Invalid API_PORT");

        let err = Config::from_lookup(lookup(&[("CAMPAIGN_CONTRACT", "0x12")])).unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[test]
    fn optional_tokens_and_wallet() {
        let config = Config::from_lookup(lookup(&[
            ("CAMPAIGN_CONTRACT", CAMPAIGN),
            ("USDC_TOKEN", "0x2222222222222222222222222222222222222222"),
            ("WALLET_ADDRESS", "0x3333333333333333333333333333333333333333"),
            ("BACKEND_URL", "http://api.local/"),
        ]))
        .unwrap();
        assert_eq!(config.usdc.map(|t| t.decimals), Some(6));
        assert!(config.wallet_address.is_some());
        assert_eq!(config.backend_url, "http://api.local");
    }
}
