//! Single-write transaction flow shared by withdraw and create-campaign.
//!
//! ```text
//! Idle ──► Pending ──► Confirming ──► Success
//!             └────────────┴────────► Error
//! ```
//!
//! Same guard and reset rules as the donation orchestrator: only an idle flow
//! starts, `reset()` forgets local state, and receipts are time-bounded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::abi::ContractCall;
use crate::cache::{CacheKey, QueryCache};
use crate::chain::{ChainClient, TxHash};
use crate::errors::{ErrorInfo, OrchestratorError, Result};
use crate::events::{self, FlowKind, FlowUpdate, TxStage, UpdateSender};
use crate::runs::RunSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStatus {
    Idle,
    Pending,
    Confirming,
    Success,
    Error,
}

impl WriteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Confirming => "confirming",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Idle | Self::Success | Self::Error)
    }
}

#[derive(Debug, Clone)]
pub struct WriteState {
    pub status: WriteStatus,
    pub campaign_id: Option<u64>,
    pub tx_hash: Option<TxHash>,
    pub error: Option<ErrorInfo>,
    epoch: u64,
}

impl WriteState {
    fn idle(epoch: u64) -> Self {
        WriteState {
            status: WriteStatus::Idle,
            campaign_id: None,
            tx_hash: None,
            error: None,
            epoch,
        }
    }
}

struct Inner {
    kind: FlowKind,
    stage: TxStage,
    chain: Arc<dyn ChainClient>,
    cache: Arc<dyn QueryCache>,
    confirmation_timeout: Duration,
    state: watch::Sender<WriteState>,
    updates: UpdateSender,
    task: RunSlot,
}

#[derive(Clone)]
pub struct WriteFlow {
    inner: Arc<Inner>,
}

impl WriteFlow {
    pub fn new(
        kind: FlowKind,
        stage: TxStage,
        chain: Arc<dyn ChainClient>,
        cache: Arc<dyn QueryCache>,
        confirmation_timeout: Duration,
        updates: UpdateSender,
    ) -> Self {
        let (state, _) = watch::channel(WriteState::idle(0));
        WriteFlow {
            inner: Arc::new(Inner {
                kind,
                stage,
                chain,
                cache,
                confirmation_timeout,
                state,
                updates,
                task: RunSlot::default(),
            }),
        }
    }

    pub fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.inner.chain
    }

    /// Claim the idle flow and run `prepare` → submit → confirm in the background.
    ///
    /// `prepare` performs validation and reads, and yields the call to submit.
    pub fn start<F, Fut>(&self, campaign_id: Option<u64>, prepare: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<ContractCall>> + Send + 'static,
    {
        let inner = &self.inner;
        let mut epoch = None;
        inner.state.send_if_modified(|state| {
            if state.status != WriteStatus::Idle {
                return false;
            }
            let next = state.epoch + 1;
            *state = WriteState {
                status: WriteStatus::Pending,
                campaign_id,
                ..WriteState::idle(next)
            };
            epoch = Some(next);
            true
        });
        let epoch = epoch.ok_or(OrchestratorError::Busy)?;
        inner.publish();

        if inner.chain.account().is_none() {
            inner.fail(epoch, &OrchestratorError::NotConnected);
            return Ok(());
        }

        let run = Arc::clone(inner);
        let handle = tokio::spawn(async move {
            let result = match prepare().await {
                Ok(call) => run.submit_and_confirm(epoch, call).await,
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                warn!("{} failed: {err}", run.kind.as_str());
                run.fail(epoch, &err);
            }
        });
        inner.task.install(epoch, || inner.state.borrow().epoch, handle);
        Ok(())
    }

    pub fn reset(&self) {
        let inner = &self.inner;
        let mut superseded = None;
        inner.state.send_if_modified(|state| {
            if state.status == WriteStatus::Idle {
                return false;
            }
            superseded = Some(state.epoch);
            *state = WriteState::idle(state.epoch + 1);
            true
        });
        let Some(superseded) = superseded else {
            return;
        };
        inner.task.abort_through(superseded);
        inner.publish();
    }

    pub fn snapshot(&self) -> WriteState {
        self.inner.state.borrow().clone()
    }

    #[cfg(test)]
    pub fn status(&self) -> WriteStatus {
        self.inner.state.borrow().status
    }

    pub fn is_connected(&self) -> bool {
        self.inner.chain.account().is_some()
    }

    #[cfg(test)]
    pub async fn settled(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| state.status.is_settled()).await;
    }
}

impl Inner {
    /// Mutate the state if `epoch` is still current; publish when it changed.
    fn update<F>(&self, epoch: u64, f: F) -> bool
    where
        F: FnOnce(&mut WriteState) -> bool,
    {
        let changed = self.state.send_if_modified(|state| state.epoch == epoch && f(state));
        if changed {
            self.publish();
        } else {
            debug!("Dropping {} update from run {epoch}", self.kind.as_str());
        }
        changed
    }

    fn publish(&self) {
        let state = self.state.borrow().clone();
        let mut update = FlowUpdate::new(self.kind, state.status.as_str());
        update.campaign_id = state.campaign_id;
        update.tx = state.tx_hash.map(|h| (self.stage, h));
        update.error = state.error;
        events::publish(&self.updates, update);
    }

    fn fail(&self, epoch: u64, err: &OrchestratorError) {
        self.update(epoch, |state| {
            if state.status.is_settled() {
                return false;
            }
            state.status = WriteStatus::Error;
            state.error = Some(ErrorInfo::from(err));
            true
        });
    }

    async fn submit_and_confirm(&self, epoch: u64, call: ContractCall) -> Result<()> {
        let name = call.name();
        let hash = self.chain.submit_write(call).await?;
        if !self.update(epoch, |state| {
            state.status = WriteStatus::Confirming;
            state.tx_hash = Some(hash);
            true
        }) {
            return Ok(());
        }

        let receipt = tokio::time::timeout(self.confirmation_timeout, self.chain.wait_for_receipt(hash))
            .await
            .map_err(|_| OrchestratorError::Timeout(self.confirmation_timeout))??;
        if !receipt.success {
            return Err(OrchestratorError::ConfirmationFailed(format!(
                "{name} transaction {hash} reverted"
            )));
        }

        if self.update(epoch, |state| {
            state.status = WriteStatus::Success;
            true
        }) {
            info!("{name} confirmed in {} (block {:?})", receipt.tx_hash, receipt.block_number);
            self.cache.invalidate(&CacheKey::Campaigns);
        }
        Ok(())
    }
}
