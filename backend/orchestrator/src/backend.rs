//! Read client for the crowdfunding backend REST API.
//!
//! Every endpoint answers with `{success, data, message?}`. The indexer behind
//! it has emitted both camelCase and snake_case field names over time, so the
//! record types accept either.

use std::str::FromStr;

use alloy_primitives::U256;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::amount::from_smallest_unit;
use crate::errors::{OrchestratorError, Result};

/// IDRX carries two decimals on-chain.
const IDRX_DECIMALS: u8 = 2;

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: u64,
    pub name: String,
    #[serde(alias = "creator_name", default)]
    pub creator_name: String,
    #[serde(default)]
    pub owner: String,
    /// Smallest units, as a decimal string.
    #[serde(deserialize_with = "amount_string", default)]
    pub balance: String,
    #[serde(alias = "target_amount", deserialize_with = "amount_string", default)]
    pub target_amount: String,
    #[serde(alias = "creation_time", default)]
    pub creation_time: i64,
    pub description: Option<String>,
    #[serde(alias = "last_synced_at")]
    pub last_synced_at: Option<String>,
}

impl Campaign {
    pub fn progress(&self) -> u8 {
        calculate_progress(&self.balance, &self.target_amount)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vault {
    #[serde(alias = "vault_id")]
    pub vault_id: String,
    #[serde(alias = "campaign_id")]
    pub campaign_id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "target_amount", deserialize_with = "amount_string", default)]
    pub target_amount: String,
    #[serde(alias = "current_amount", deserialize_with = "amount_string", default)]
    pub current_amount: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub status: String,
    #[serde(alias = "end_date")]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignDetail {
    pub campaign: Campaign,
    pub vault: Option<Vault>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultListing {
    pub vault: Vault,
    pub blockchain: Option<Campaign>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Donation {
    pub id: String,
    #[serde(alias = "campaign_id")]
    pub campaign_id: u64,
    pub donor: String,
    #[serde(deserialize_with = "amount_string")]
    pub amount: String,
    pub timestamp: i64,
    #[serde(alias = "transaction_hash")]
    pub transaction_hash: String,
    #[serde(alias = "block_number")]
    pub block_number: Option<u64>,
    #[serde(alias = "campaign_name")]
    pub campaign_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    pub id: String,
    #[serde(alias = "token_id")]
    pub token_id: u64,
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
    pub timestamp: i64,
}

/// Amounts arrive as strings or bare numbers depending on the endpoint.
fn amount_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

// ─────────────────────────────────────────────────────────
// Display helpers
// ─────────────────────────────────────────────────────────

/// Smallest IDRX units to rupiah. Unparsable input reads as zero.
pub fn format_idrx(amount: &str) -> Decimal {
    U256::from_str(amount.trim())
        .ok()
        .and_then(|units| from_smallest_unit(units, IDRX_DECIMALS))
        .unwrap_or(Decimal::ZERO)
}

/// Percentage raised, rounded and clamped to 100; `0` for a zero target.
pub fn calculate_progress(balance: &str, target: &str) -> u8 {
    let raised = format_idrx(balance);
    let target = format_idrx(target);
    if target.is_zero() {
        return 0;
    }
    (raised / target * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .min(Decimal::ONE_HUNDRED)
        .to_u8()
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct CrowdfundingApi {
    client: Client,
    base_url: String,
}

impl CrowdfundingApi {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        CrowdfundingApi {
            client,
            base_url: base_url.into(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<Option<T>> {
        let url = format!("{}{path}", self.base_url);
        debug!("GET {url}");
        let resp = self.client.get(&url).query(query).send().await?;
        let body: ApiResponse<T> = resp.error_for_status()?.json().await?;
        if !body.success {
            return Err(OrchestratorError::Backend(
                body.message.unwrap_or_else(|| format!("{path} reported failure")),
            ));
        }
        Ok(body.data)
    }

    pub async fn campaigns(&self) -> Result<Vec<Campaign>> {
        Ok(self.get("/crowdfunding/campaigns", &[]).await?.unwrap_or_default())
    }

    pub async fn campaign(&self, id: u64) -> Result<Option<CampaignDetail>> {
        self.get(&format!("/crowdfunding/campaigns/{id}"), &[]).await
    }

    pub async fn vaults(&self, status: &str, limit: u32, offset: u32) -> Result<Vec<VaultListing>> {
        let query = [
            ("status", status.to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];
        Ok(self.get("/crowdfunding/vaults", &query).await?.unwrap_or_default())
    }

    pub async fn donations_by_user(&self, wallet: &str) -> Result<Vec<Donation>> {
        let path = format!("/crowdfunding/donations/user/{wallet}");
        Ok(self.get(&path, &[]).await?.unwrap_or_default())
    }

    pub async fn badges_by_user(&self, wallet: &str) -> Result<Vec<Badge>> {
        let path = format!("/crowdfunding/badges/user/{wallet}");
        Ok(self.get(&path, &[]).await?.unwrap_or_default())
    }
}
