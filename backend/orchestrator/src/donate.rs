//! Token donation orchestrator.
//!
//! Drives [`Phase`] through approval and donation against a [`ChainClient`].
//! Each run is a spawned task; the phase lives in a `watch` channel and every
//! transition goes through [`Inner::step`], which also drops events from runs
//! that were reset.
//!
//! `reset()` only forgets local state. A transaction broadcast before the
//! reset can still be mined; its hash remains in the journal.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::abi;
use crate::amount::to_smallest_unit;
use crate::cache::{CacheKey, QueryCache};
use crate::chain::{self, ChainClient, TxHash};
use crate::config::TokenConfig;
use crate::errors::{ErrorInfo, OrchestratorError, Result};
use crate::events::{self, AmountUnit, FlowAmount, FlowKind, FlowUpdate, UpdateSender};
use crate::machine::{Effect, Event, PendingDonation, Phase, TransactionStatus};
use crate::runs::RunSlot;

/// Current phase plus the run it belongs to.
#[derive(Debug, Clone)]
pub struct DonationState {
    pub phase: Phase,
    epoch: u64,
}

impl DonationState {
    pub fn status(&self) -> TransactionStatus {
        self.phase.status()
    }
}

enum Step {
    Moved(Option<Effect>),
    Ignored,
}

struct Inner {
    chain: Arc<dyn ChainClient>,
    cache: Arc<dyn QueryCache>,
    token: TokenConfig,
    campaign_contract: Address,
    confirmation_timeout: Duration,
    state: watch::Sender<DonationState>,
    updates: UpdateSender,
    task: RunSlot,
}

/// One orchestrator per donation token.
#[derive(Clone)]
pub struct DonationOrchestrator {
    inner: Arc<Inner>,
}

impl DonationOrchestrator {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        cache: Arc<dyn QueryCache>,
        token: TokenConfig,
        campaign_contract: Address,
        confirmation_timeout: Duration,
        updates: UpdateSender,
    ) -> Self {
        let (state, _) = watch::channel(DonationState {
            phase: Phase::Idle,
            epoch: 0,
        });
        DonationOrchestrator {
            inner: Arc::new(Inner {
                chain,
                cache,
                token,
                campaign_contract,
                confirmation_timeout,
                state,
                updates,
                task: RunSlot::default(),
            }),
        }
    }

    /// Start a donation and return immediately; observe progress via
    /// [`status`](Self::status) or [`subscribe`](Self::subscribe).
    ///
    /// Only an idle orchestrator accepts a run. Anything else, including a
    /// terminal state awaiting `reset()`, yields [`OrchestratorError::Busy`]
    /// and leaves the current run untouched.
    pub fn donate(&self, campaign_id: u64, amount: Decimal) -> Result<()> {
        let inner = &self.inner;

        let mut epoch = None;
        inner.state.send_if_modified(|state| {
            if !matches!(state.phase, Phase::Idle) {
                return false;
            }
            state.epoch += 1;
            epoch = Some(state.epoch);
            state.phase.apply(Event::Begin { campaign_id }).is_ok()
        });
        let epoch = epoch.ok_or(OrchestratorError::Busy)?;

        // Synchronous preconditions: no chain access, no task.
        let precheck = match inner.chain.account() {
            None => Err(OrchestratorError::NotConnected),
            Some(_) => to_smallest_unit(amount, inner.token.decimals),
        };
        let amount_on_chain = match precheck {
            Ok(units) => units,
            Err(err) => {
                warn!("Donation to campaign {campaign_id} rejected: {err}");
                inner.step(epoch, Event::Failed(ErrorInfo::from(&err)));
                return Ok(());
            }
        };

        info!("Donation started: campaign {campaign_id}, {amount} ({amount_on_chain} units)");
        let run = Arc::clone(inner);
        let handle = tokio::spawn(async move {
            run.run(epoch, campaign_id, amount_on_chain).await;
        });
        inner.task.install(epoch, || inner.state.borrow().epoch, handle);
        Ok(())
    }

    /// Re-read the allowance and report whether `amount` still needs an approval.
    pub async fn check_allowance(&self, amount: Decimal) -> Result<bool> {
        let inner = &self.inner;
        let owner = inner.chain.account().ok_or(OrchestratorError::NotConnected)?;
        let required = to_smallest_unit(amount, inner.token.decimals)?;
        let allowance = chain::read_allowance(
            inner.chain.as_ref(),
            inner.token.address,
            owner,
            inner.campaign_contract,
        )
        .await?;
        Ok(allowance < required)
    }

    /// Return to idle, clearing error and pending donation. No effect when idle.
    pub fn reset(&self) {
        let inner = &self.inner;
        let mut superseded = None;
        inner.state.send_if_modified(|state| {
            if state.phase.apply(Event::Reset).is_err() {
                return false;
            }
            superseded = Some(state.epoch);
            state.epoch += 1;
            true
        });
        let Some(superseded) = superseded else {
            return;
        };

        inner.task.abort_through(superseded);
        debug!("Donation orchestrator for {} reset", inner.token.address);
        events::publish(&inner.updates, FlowUpdate::new(FlowKind::Donation, "idle"));
    }

    pub fn status(&self) -> TransactionStatus {
        self.inner.state.borrow().status()
    }

    pub fn tx_hash(&self) -> Option<TxHash> {
        self.inner.state.borrow().phase.tx_hash()
    }

    pub fn error(&self) -> Option<ErrorInfo> {
        self.inner.state.borrow().phase.error().cloned()
    }

    pub fn pending(&self) -> Option<PendingDonation> {
        self.inner.state.borrow().phase.pending()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.chain.account().is_some()
    }

    pub fn token(&self) -> TokenConfig {
        self.inner.token
    }

    pub fn subscribe(&self) -> watch::Receiver<DonationState> {
        self.inner.state.subscribe()
    }

    /// Resolve once no run is in flight.
    #[cfg(test)]
    pub async fn settled(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|state| state.phase.is_settled()).await;
    }
}

impl Inner {
    /// Apply `event` if it belongs to the current run; publish on status change.
    fn step(&self, epoch: u64, event: Event) -> Step {
        let mut step = Step::Ignored;
        let mut update = None;

        self.state.send_if_modified(|state| {
            if state.epoch != epoch {
                debug!("Dropping event from stale run {epoch}");
                return false;
            }
            let before = state.phase.status();
            match state.phase.apply(event) {
                Ok(effect) => {
                    if state.phase.status() != before {
                        update = Some(flow_update(&state.phase));
                    }
                    step = Step::Moved(effect);
                    true
                }
                Err(rejected) => {
                    debug!(
                        "Ignoring {} while {}",
                        rejected.event,
                        rejected.status.as_str()
                    );
                    false
                }
            }
        });

        if let Some(update) = update {
            events::publish(&self.updates, update);
        }
        step
    }

    async fn run(&self, epoch: u64, campaign_id: u64, amount_on_chain: U256) {
        if let Err(err) = self.drive(epoch, campaign_id, amount_on_chain).await {
            warn!("Donation to campaign {campaign_id} failed: {err}");
            self.step(epoch, Event::Failed(ErrorInfo::from(&err)));
        }
    }

    async fn drive(&self, epoch: u64, campaign_id: u64, amount_on_chain: U256) -> Result<()> {
        let owner = self.chain.account().ok_or(OrchestratorError::NotConnected)?;

        let balance = chain::read_balance(self.chain.as_ref(), self.token.address, owner).await?;
        if balance < amount_on_chain {
            return Err(OrchestratorError::InsufficientBalance {
                requested: amount_on_chain,
                available: balance,
            });
        }

        // Read fresh right before branching; never from cache.
        let allowance = chain::read_allowance(
            self.chain.as_ref(),
            self.token.address,
            owner,
            self.campaign_contract,
        )
        .await?;
        debug!("Allowance {allowance}, required {amount_on_chain}");

        let pending = PendingDonation {
            campaign_id,
            amount_on_chain,
        };
        let mut effect = match self.step(
            epoch,
            Event::AllowanceChecked {
                pending,
                sufficient: allowance >= amount_on_chain,
            },
        ) {
            Step::Moved(effect) => effect,
            Step::Ignored => return Ok(()),
        };

        while let Some(current) = effect.take() {
            let event = match current {
                Effect::SubmitApproval => {
                    // Unlimited approval so later donations skip this step.
                    let call = abi::approve(self.token.address, self.campaign_contract, U256::MAX);
                    Event::Submitted(self.chain.submit_write(call).await?)
                }
                Effect::SubmitDonation(p) => {
                    let call = abi::donate(
                        self.campaign_contract,
                        p.campaign_id,
                        p.amount_on_chain,
                        self.token.address,
                    );
                    Event::Submitted(self.chain.submit_write(call).await?)
                }
                Effect::AwaitReceipt(hash) => {
                    self.await_success(hash).await?;
                    Event::Confirmed(hash)
                }
                Effect::InvalidateCampaigns => {
                    info!("Donation to campaign {campaign_id} confirmed");
                    self.cache.invalidate(&CacheKey::Campaigns);
                    break;
                }
            };

            effect = match self.step(epoch, event) {
                Step::Moved(next) => next,
                Step::Ignored => None,
            };
        }
        Ok(())
    }

    async fn await_success(&self, hash: TxHash) -> Result<()> {
        let receipt = tokio::time::timeout(self.confirmation_timeout, self.chain.wait_for_receipt(hash))
            .await
            .map_err(|_| OrchestratorError::Timeout(self.confirmation_timeout))??;
        if !receipt.success {
            return Err(OrchestratorError::ConfirmationFailed(format!(
                "transaction {hash} reverted"
            )));
        }
        debug!("{} mined in block {:?}", receipt.tx_hash, receipt.block_number);
        Ok(())
    }
}

fn flow_update(phase: &Phase) -> FlowUpdate {
    let mut update = FlowUpdate::new(FlowKind::Donation, phase.status().as_str());
    update.campaign_id = phase.campaign_id();
    update.tx = phase.tx();
    update.amount = phase
        .amount_on_chain()
        .map(|a| FlowAmount::new(a, AmountUnit::Base));
    update.error = phase.error().cloned();
    update
}
