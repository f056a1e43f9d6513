//! In-memory collaborators shared by the flow tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use alloy_primitives::{address, Address, Bytes, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::watch;

use crate::abi::{self, ContractCall};
use crate::cache::{CacheKey, QueryCache};
use crate::chain::{ChainClient, TxHash, TxReceipt};
use crate::errors::{OrchestratorError, Result};
use crate::gateway::{CustomerDetails, FiatGateway, PaymentStatusResponse, QrPayment};

pub const TOKEN: Address = address!("4a49f09fafa1c493e5fc12da89ae8e0193e7e8ae");
pub const CAMPAIGN: Address = address!("c0ffee0000000000000000000000000000000001");
pub const WALLET: Address = address!("d0d0000000000000000000000000000000000002");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptBehavior {
    Succeed,
    Revert,
    /// Never resolves.
    Never,
    /// Resolves successfully once `release_receipts` is called.
    Gated,
}

struct ChainState {
    allowance: U256,
    balance: U256,
    campaign_balance: U256,
    campaign_owner: Address,
    rejected: Vec<&'static str>,
    writes: Vec<ContractCall>,
}

pub struct MockChain {
    account: Option<Address>,
    receipts: ReceiptBehavior,
    state: Mutex<ChainState>,
    gate: watch::Sender<bool>,
}

impl MockChain {
    pub fn connected() -> Self {
        Self::with_account(Some(WALLET))
    }

    pub fn disconnected() -> Self {
        Self::with_account(None)
    }

    fn with_account(account: Option<Address>) -> Self {
        MockChain {
            account,
            receipts: ReceiptBehavior::Succeed,
            state: Mutex::new(ChainState {
                allowance: U256::ZERO,
                balance: U256::from(1_000_000_000u64),
                campaign_balance: U256::from(1_000_000u64),
                campaign_owner: WALLET,
                rejected: Vec::new(),
                writes: Vec::new(),
            }),
            gate: watch::channel(false).0,
        }
    }

    pub fn with_allowance(self, allowance: U256) -> Self {
        self.set_allowance(allowance);
        self
    }

    pub fn with_balance(self, balance: U256) -> Self {
        self.state.lock().unwrap().balance = balance;
        self
    }

    pub fn with_campaign_balance(self, balance: U256) -> Self {
        self.state.lock().unwrap().campaign_balance = balance;
        self
    }

    pub fn with_campaign_owner(self, owner: Address) -> Self {
        self.state.lock().unwrap().campaign_owner = owner;
        self
    }

    pub fn with_receipts(mut self, behavior: ReceiptBehavior) -> Self {
        self.receipts = behavior;
        self
    }

    /// Make every write to `function` fail as if the user declined to sign.
    pub fn reject_write(self, function: &'static str) -> Self {
        self.state.lock().unwrap().rejected.push(function);
        self
    }

    pub fn accept_all_writes(&self) {
        self.state.lock().unwrap().rejected.clear();
    }

    pub fn set_allowance(&self, allowance: U256) {
        self.state.lock().unwrap().allowance = allowance;
    }

    pub fn release_receipts(&self) {
        self.gate.send_replace(true);
    }

    /// Successfully broadcast writes, in order.
    pub fn writes(&self) -> Vec<ContractCall> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Hash handed out for the `index`-th accepted write.
    pub fn hash_of(&self, index: usize) -> TxHash {
        TxHash::with_last_byte(index as u8 + 1)
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn account(&self) -> Option<Address> {
        self.account
    }

    async fn submit_write(&self, call: ContractCall) -> Result<TxHash> {
        let mut state = self.state.lock().unwrap();
        if state.rejected.contains(&call.name()) {
            return Err(OrchestratorError::SubmissionRejected(
                "User rejected the request.".to_string(),
            ));
        }
        let hash = self.hash_of(state.writes.len());
        state.writes.push(call);
        Ok(hash)
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt> {
        let success = match self.receipts {
            ReceiptBehavior::Succeed => true,
            ReceiptBehavior::Revert => false,
            ReceiptBehavior::Never => std::future::pending().await,
            ReceiptBehavior::Gated => {
                let mut rx = self.gate.subscribe();
                let _ = rx.wait_for(|open| *open).await;
                true
            }
        };
        Ok(TxReceipt {
            tx_hash,
            block_number: Some(1),
            success,
        })
    }

    async fn read_contract(&self, call: ContractCall) -> Result<Bytes> {
        let state = self.state.lock().unwrap();
        let encoded = match call.name() {
            "allowance" => abi::IERC20::allowanceCall::abi_encode_returns(&(state.allowance,)),
            "balanceOf" => abi::IERC20::balanceOfCall::abi_encode_returns(&(state.balance,)),
            "decimals" => abi::IERC20::decimalsCall::abi_encode_returns(&(2u8,)),
            "getCampaignInfo" => abi::ICampaign::getCampaignInfoCall::abi_encode_returns(&(
                "Clean Water".to_string(),
                "Ayu".to_string(),
                state.campaign_balance,
                U256::from(10_000_000u64),
                U256::from(1_700_000_000u64),
                state.campaign_owner,
            )),
            other => {
                return Err(OrchestratorError::Network(format!(
                    "mock has no read for {other}"
                )))
            }
        };
        Ok(Bytes::from(encoded))
    }
}

/// Counts invalidations per key.
#[derive(Default)]
pub struct RecordingCache {
    hits: Mutex<HashMap<CacheKey, usize>>,
}

impl RecordingCache {
    pub fn count(&self, key: &CacheKey) -> usize {
        self.hits.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.hits.lock().unwrap().values().sum()
    }
}

impl QueryCache for RecordingCache {
    fn invalidate(&self, key: &CacheKey) {
        *self.hits.lock().unwrap().entry(key.clone()).or_default() += 1;
    }
}

/// Fiat gateway that replays scripted status reports, then reports `pending`.
#[derive(Default)]
pub struct MockGateway {
    statuses: Mutex<VecDeque<Result<PaymentStatusResponse>>>,
    created: Mutex<Vec<(u64, Decimal, CustomerDetails)>>,
    checks: AtomicUsize,
}

impl MockGateway {
    pub fn with_statuses(statuses: &[&str]) -> Self {
        let gateway = Self::default();
        for status in statuses {
            gateway.push_status(status);
        }
        gateway
    }

    pub fn push_status(&self, status: &str) {
        self.statuses.lock().unwrap().push_back(Ok(PaymentStatusResponse {
            success: false,
            status: status.to_string(),
            donation: None,
        }));
    }

    /// Report `success: true` with the donation record the backend stored.
    pub fn push_settlement(&self, donation: serde_json::Value) {
        self.statuses.lock().unwrap().push_back(Ok(PaymentStatusResponse {
            success: true,
            status: "settlement".to_string(),
            donation: Some(donation),
        }));
    }

    pub fn push_transport_error(&self) {
        self.statuses
            .lock()
            .unwrap()
            .push_back(Err(OrchestratorError::Gateway("HTTP 502 Bad Gateway".to_string())));
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<(u64, Decimal, CustomerDetails)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl FiatGateway for MockGateway {
    async fn create_qr_payment(
        &self,
        campaign_id: u64,
        amount: Decimal,
        customer: &CustomerDetails,
    ) -> Result<QrPayment> {
        let mut created = self.created.lock().unwrap();
        created.push((campaign_id, amount, customer.clone()));
        Ok(QrPayment {
            order_id: format!("ORDER-{campaign_id}-{}", created.len()),
            redirect_url: format!("https://pay.example/qr/{}", created.len()),
        })
    }

    async fn check_payment_status(&self, _order_id: &str) -> Result<PaymentStatusResponse> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(PaymentStatusResponse {
                    success: false,
                    status: "pending".to_string(),
                    donation: None,
                })
            })
    }
}

pub fn customer() -> CustomerDetails {
    CustomerDetails {
        name: "Budi".to_string(),
        email: "budi@example.com".to_string(),
    }
}
