//! Owner withdrawals from a campaign balance.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use rust_decimal::Decimal;
use tracing::debug;

use crate::abi;
use crate::amount::{from_smallest_unit, to_smallest_unit};
use crate::cache::QueryCache;
use crate::chain::{self, ChainClient};
use crate::config::TokenConfig;
use crate::errors::{OrchestratorError, Result};
use crate::events::{FlowKind, TxStage, UpdateSender};
use crate::write_flow::WriteFlow;

#[derive(Clone)]
pub struct Withdrawals {
    flow: WriteFlow,
    campaign_contract: Address,
    token: TokenConfig,
}

impl Withdrawals {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        cache: Arc<dyn QueryCache>,
        campaign_contract: Address,
        token: TokenConfig,
        confirmation_timeout: Duration,
        updates: UpdateSender,
    ) -> Self {
        Withdrawals {
            flow: WriteFlow::new(
                FlowKind::Withdrawal,
                TxStage::Withdrawal,
                chain,
                cache,
                confirmation_timeout,
                updates,
            ),
            campaign_contract,
            token,
        }
    }

    pub fn flow(&self) -> &WriteFlow {
        &self.flow
    }

    /// Withdraw `amount` (display units) from `campaign_id` to its owner.
    ///
    /// Ownership and the campaign balance are checked up front so an
    /// obviously failing withdrawal never costs gas.
    pub fn withdraw(&self, campaign_id: u64, amount: Decimal) -> Result<()> {
        let chain = Arc::clone(self.flow.chain());
        let contract = self.campaign_contract;
        let decimals = self.token.decimals;

        self.flow.start(Some(campaign_id), move || async move {
            let amount_on_chain = to_smallest_unit(amount, decimals)?;
            let info = chain::read_campaign(chain.as_ref(), contract, campaign_id).await?;
            debug!(
                "Campaign {campaign_id} '{}' by {}: balance {} of {}",
                info.name, info.creator_name, info.balance, info.target_amount
            );
            if chain.account() != Some(info.owner) {
                return Err(OrchestratorError::InvalidInput(format!(
                    "OnlyOwnerCanWithdraw: campaign {campaign_id} belongs to {}",
                    info.owner
                )));
            }
            if amount_on_chain > info.balance {
                let available = from_smallest_unit(info.balance, decimals)
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| format!("{} units", info.balance));
                return Err(OrchestratorError::CampaignBalanceTooLow {
                    campaign_id,
                    requested: amount,
                    available,
                });
            }
            Ok(abi::withdraw(contract, campaign_id, amount_on_chain))
        })
    }
}
