//! On-chain campaign creation.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::abi;
use crate::amount::to_smallest_unit;
use crate::cache::QueryCache;
use crate::chain::ChainClient;
use crate::errors::{OrchestratorError, Result};
use crate::events::{FlowKind, TxStage, UpdateSender};
use crate::write_flow::WriteFlow;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignParams {
    pub name: String,
    pub creator_name: String,
    /// Target in display units of the campaign's storage token.
    pub target_amount: Decimal,
}

#[derive(Clone)]
pub struct CampaignCreator {
    flow: WriteFlow,
    campaign_contract: Address,
    decimals: u8,
}

impl CampaignCreator {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        cache: Arc<dyn QueryCache>,
        campaign_contract: Address,
        decimals: u8,
        confirmation_timeout: Duration,
        updates: UpdateSender,
    ) -> Self {
        CampaignCreator {
            flow: WriteFlow::new(
                FlowKind::CreateCampaign,
                TxStage::CreateCampaign,
                chain,
                cache,
                confirmation_timeout,
                updates,
            ),
            campaign_contract,
            decimals,
        }
    }

    pub fn flow(&self) -> &WriteFlow {
        &self.flow
    }

    pub fn create(&self, params: CreateCampaignParams) -> Result<()> {
        let contract = self.campaign_contract;
        let decimals = self.decimals;

        self.flow.start(None, move || async move {
            let name = params.name.trim().to_string();
            let creator_name = params.creator_name.trim().to_string();
            if name.is_empty() || creator_name.is_empty() {
                return Err(OrchestratorError::InvalidInput(
                    "campaign name and creator name are required".to_string(),
                ));
            }
            let target = to_smallest_unit(params.target_amount, decimals)?;
            Ok(abi::create_campaign(contract, name, creator_name, target))
        })
    }
}
