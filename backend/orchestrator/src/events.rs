//! Status-change notifications published by every transaction flow.
//!
//! Flows publish a [`FlowUpdate`] on a shared broadcast channel each time their
//! status changes. The journal persists the ones that carry a transaction
//! hash; API clients and tests can subscribe to the same stream.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::chain::TxHash;
use crate::errors::ErrorInfo;

/// Capacity of the shared update channel.
pub const UPDATE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    /// Token donation (approve + donate).
    Donation,
    /// Fiat QRIS donation.
    Qris,
    Withdrawal,
    CreateCampaign,
}

impl FlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Donation => "donation",
            Self::Qris => "qris",
            Self::Withdrawal => "withdrawal",
            Self::CreateCampaign => "create_campaign",
        }
    }
}

/// Which write a transaction hash belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStage {
    Approval,
    Donation,
    Withdrawal,
    CreateCampaign,
}

impl TxStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approval => "approval",
            Self::Donation => "donation",
            Self::Withdrawal => "withdrawal",
            Self::CreateCampaign => "create_campaign",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountUnit {
    /// Token smallest units (display amount scaled by the token decimals).
    Base,
    /// Rupiah, as entered for a QRIS payment.
    Rupiah,
}

impl AmountUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Rupiah => "rupiah",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowAmount {
    pub value: String,
    pub unit: AmountUnit,
}

impl FlowAmount {
    pub fn new(value: impl ToString, unit: AmountUnit) -> Self {
        FlowAmount {
            value: value.to_string(),
            unit,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowUpdate {
    pub flow: FlowKind,
    /// Flow-specific status name (`approving`, `checking`, ...).
    pub status: &'static str,
    pub campaign_id: Option<u64>,
    /// The transaction the status refers to, if any, with its stage.
    pub tx: Option<(TxStage, TxHash)>,
    pub amount: Option<FlowAmount>,
    pub error: Option<ErrorInfo>,
    /// Unix seconds.
    pub timestamp: i64,
}

impl FlowUpdate {
    pub fn new(flow: FlowKind, status: &'static str) -> Self {
        FlowUpdate {
            flow,
            status,
            campaign_id: None,
            tx: None,
            amount: None,
            error: None,
            timestamp: Utc::now().timestamp(),
        }
    }
}

pub type UpdateSender = broadcast::Sender<FlowUpdate>;

pub fn channel() -> (UpdateSender, broadcast::Receiver<FlowUpdate>) {
    broadcast::channel(UPDATE_CHANNEL_CAPACITY)
}

/// Publish without caring whether anyone is listening.
pub fn publish(sender: &UpdateSender, update: FlowUpdate) {
    let _ = sender.send(update);
}
