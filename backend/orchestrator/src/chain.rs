//! The chain-client capability the transaction flows are written against.
//!
//! [`crate::rpc::RpcChainClient`] implements it over JSON-RPC; tests use an
//! in-memory mock.

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;

use crate::abi::{self, CampaignInfo, ContractCall};
use crate::errors::Result;

pub type TxHash = B256;

/// Outcome of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub success: bool,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// The connected account, or `None` when no wallet is connected.
    fn account(&self) -> Option<Address>;

    /// Sign and broadcast a state-changing call.
    async fn submit_write(&self, call: ContractCall) -> Result<TxHash>;

    /// Resolve once the transaction is mined. Callers bound this with a timeout.
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt>;

    /// Execute a read-only call against the latest block.
    async fn read_contract(&self, call: ContractCall) -> Result<Bytes>;
}

pub async fn read_allowance(
    chain: &dyn ChainClient,
    token: Address,
    owner: Address,
    spender: Address,
) -> Result<U256> {
    let raw = chain.read_contract(abi::allowance(token, owner, spender)).await?;
    abi::decode_uint(&raw)
}

pub async fn read_balance(chain: &dyn ChainClient, token: Address, owner: Address) -> Result<U256> {
    let raw = chain.read_contract(abi::balance_of(token, owner)).await?;
    abi::decode_uint(&raw)
}

pub async fn read_decimals(chain: &dyn ChainClient, token: Address) -> Result<u8> {
    let raw = chain.read_contract(abi::decimals(token)).await?;
    abi::decode_decimals(&raw)
}

pub async fn read_campaign(
    chain: &dyn ChainClient,
    campaign: Address,
    campaign_id: u64,
) -> Result<CampaignInfo> {
    let raw = chain.read_contract(abi::campaign_info(campaign, campaign_id)).await?;
    abi::decode_campaign_info(&raw)
}
