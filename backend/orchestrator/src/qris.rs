//! Fiat donation via QRIS.
//!
//! ```text
//! Idle ──► Pending ◄──► Checking ──► Success
//!             │            └───────► Error   (expired / cancelled / denied)
//!             └────────────────────► Error   (QR expiry elapsed)
//! ```
//!
//! `start` creates the payment and hands the QR back to the caller. A
//! background task then polls the gateway until the payment settles, fails,
//! or the QR expires. Gateway transport errors during polling count as
//! "still pending".

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, QueryCache};
use crate::errors::{ErrorInfo, OrchestratorError, Result};
use crate::events::{self, AmountUnit, FlowAmount, FlowKind, FlowUpdate, UpdateSender};
use crate::gateway::{
    classify, CustomerDetails, FiatGateway, PaymentOutcome, PaymentStatusResponse, QrPayment,
};

/// Smallest QRIS donation the gateway accepts, in rupiah.
pub const MIN_QR_AMOUNT: Decimal = Decimal::from_parts(1000, 0, 0, false, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QrStatus {
    Idle,
    Pending,
    Checking,
    Success,
    Error,
}

impl QrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Checking => "checking",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Idle | Self::Success | Self::Error)
    }
}

#[derive(Debug, Clone)]
pub struct QrState {
    pub status: QrStatus,
    pub campaign_id: Option<u64>,
    pub amount: Option<Decimal>,
    pub payment: Option<QrPayment>,
    /// Donation record the gateway returned with the settlement.
    pub donation: Option<Value>,
    pub error: Option<ErrorInfo>,
    epoch: u64,
}

impl QrState {
    fn idle(epoch: u64) -> Self {
        QrState {
            status: QrStatus::Idle,
            campaign_id: None,
            amount: None,
            payment: None,
            donation: None,
            error: None,
            epoch,
        }
    }
}

struct Inner {
    gateway: Arc<dyn FiatGateway>,
    cache: Arc<dyn QueryCache>,
    poll_interval: Duration,
    expiry: Duration,
    state: watch::Sender<QrState>,
    updates: UpdateSender,
    cancel: Mutex<Option<CancellationToken>>,
}

#[derive(Clone)]
pub struct QrDonationFlow {
    inner: Arc<Inner>,
}

impl QrDonationFlow {
    pub fn new(
        gateway: Arc<dyn FiatGateway>,
        cache: Arc<dyn QueryCache>,
        poll_interval: Duration,
        expiry: Duration,
        updates: UpdateSender,
    ) -> Self {
        let (state, _) = watch::channel(QrState::idle(0));
        QrDonationFlow {
            inner: Arc::new(Inner {
                gateway,
                cache,
                poll_interval,
                expiry,
                state,
                updates,
                cancel: Mutex::new(None),
            }),
        }
    }

    /// Create a QR payment and start polling it.
    ///
    /// Returns the payment so the caller can render the QR. Fails with
    /// [`OrchestratorError::Busy`] unless the flow is idle; any other failure
    /// also leaves the flow in `Error` until `reset()`.
    pub async fn start(
        &self,
        campaign_id: u64,
        amount: Decimal,
        customer: CustomerDetails,
    ) -> Result<QrPayment> {
        let inner = &self.inner;
        let mut epoch = None;
        inner.state.send_if_modified(|state| {
            if state.status != QrStatus::Idle {
                return false;
            }
            let next = state.epoch + 1;
            *state = QrState {
                status: QrStatus::Pending,
                campaign_id: Some(campaign_id),
                amount: Some(amount),
                ..QrState::idle(next)
            };
            epoch = Some(next);
            true
        });
        let epoch = epoch.ok_or(OrchestratorError::Busy)?;

        match self.create(epoch, campaign_id, amount, &customer).await {
            Ok(payment) => Ok(payment),
            Err(err) => {
                warn!("QR donation to campaign {campaign_id} failed: {err}");
                inner.fail(epoch, &err);
                Err(err)
            }
        }
    }

    async fn create(
        &self,
        epoch: u64,
        campaign_id: u64,
        amount: Decimal,
        customer: &CustomerDetails,
    ) -> Result<QrPayment> {
        if amount < MIN_QR_AMOUNT {
            return Err(OrchestratorError::InvalidAmount(format!(
                "minimum QRIS donation is {MIN_QR_AMOUNT}"
            )));
        }
        if customer.name.trim().is_empty() || customer.email.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "customer name and email are required".to_string(),
            ));
        }

        let inner = &self.inner;
        let payment = inner.gateway.create_qr_payment(campaign_id, amount, customer).await?;
        let token = CancellationToken::new();
        let stored = payment.clone();
        let attached = inner.update(epoch, |state| {
            state.payment = Some(stored);
            true
        });
        if !attached {
            // Reset while the payment was being created.
            return Ok(payment);
        }

        if let Some(previous) = inner
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone())
        {
            previous.cancel();
        }
        info!(
            "QR payment {} created for campaign {campaign_id} ({amount})",
            payment.order_id
        );
        tokio::spawn(Arc::clone(inner).poll(epoch, payment.order_id.clone(), token));
        Ok(payment)
    }

    /// Stop polling and return to idle. The gateway order is left as is.
    pub fn reset(&self) {
        let inner = &self.inner;
        let changed = inner.state.send_if_modified(|state| {
            if state.status == QrStatus::Idle {
                return false;
            }
            *state = QrState::idle(state.epoch + 1);
            true
        });
        if !changed {
            return;
        }
        if let Some(token) = inner.cancel.lock().unwrap_or_else(PoisonError::into_inner).take() {
            token.cancel();
        }
        inner.publish();
    }

    pub fn snapshot(&self) -> QrState {
        self.inner.state.borrow().clone()
    }

    #[cfg(test)]
    pub fn status(&self) -> QrStatus {
        self.inner.state.borrow().status
    }

    #[cfg(test)]
    pub async fn settled(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| state.status.is_settled()).await;
    }
}

impl Inner {
    fn update<F>(&self, epoch: u64, f: F) -> bool
    where
        F: FnOnce(&mut QrState) -> bool,
    {
        let changed = self.state.send_if_modified(|state| state.epoch == epoch && f(state));
        if changed {
            self.publish();
        }
        changed
    }

    fn publish(&self) {
        let state = self.state.borrow().clone();
        let mut update = FlowUpdate::new(FlowKind::Qris, state.status.as_str());
        update.campaign_id = state.campaign_id;
        update.amount = state.amount.map(|a| FlowAmount::new(a, AmountUnit::Rupiah));
        update.error = state.error;
        events::publish(&self.updates, update);
    }

    /// Move between non-terminal statuses; `false` once the run is gone or settled.
    fn set_status(&self, epoch: u64, status: QrStatus) -> bool {
        self.update(epoch, |state| {
            if state.status.is_settled() {
                return false;
            }
            state.status = status;
            true
        })
    }

    fn fail(&self, epoch: u64, err: &OrchestratorError) {
        self.update(epoch, |state| {
            if state.status.is_settled() {
                return false;
            }
            state.status = QrStatus::Error;
            state.error = Some(ErrorInfo::from(err));
            true
        });
    }

    async fn poll(self: Arc<Self>, epoch: u64, order_id: String, token: CancellationToken) {
        let expiry = time::sleep(self.expiry);
        tokio::pin!(expiry);
        let mut ticker = time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Polling for {order_id} cancelled");
                    return;
                }
                _ = &mut expiry => {
                    warn!("QR payment {order_id} expired after {:?}", self.expiry);
                    self.fail(epoch, &OrchestratorError::Timeout(self.expiry));
                    return;
                }
                _ = ticker.tick() => {}
            }

            if !self.set_status(epoch, QrStatus::Checking) {
                return;
            }

            let report = tokio::select! {
                _ = token.cancelled() => return,
                report = self.gateway.check_payment_status(&order_id) => report,
            };
            let (outcome, resp) = match report {
                Ok(resp) => (classify(&resp), resp),
                Err(err) => {
                    debug!("Status check for {order_id} failed, still pending: {err}");
                    (PaymentOutcome::Pending, PaymentStatusResponse::default())
                }
            };

            match outcome {
                PaymentOutcome::Pending => {
                    if !self.set_status(epoch, QrStatus::Pending) {
                        return;
                    }
                }
                PaymentOutcome::Paid => {
                    let settled = self.update(epoch, |state| {
                        if state.status.is_settled() {
                            return false;
                        }
                        state.status = QrStatus::Success;
                        state.donation = resp.donation;
                        true
                    });
                    if settled {
                        info!("QR payment {order_id} settled");
                        self.cache.invalidate(&CacheKey::Campaigns);
                    }
                    return;
                }
                PaymentOutcome::Failed => {
                    warn!("QR payment {order_id} ended as {}", resp.status);
                    self.fail(
                        epoch,
                        &OrchestratorError::ConfirmationFailed(format!(
                            "QR payment {order_id} ended as {}",
                            resp.status
                        )),
                    );
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast;

    use super::*;
    use crate::errors::ErrorKind;
    use crate::testutil::{customer, MockGateway, RecordingCache};

    struct Harness {
        flow: QrDonationFlow,
        gateway: Arc<MockGateway>,
        cache: Arc<RecordingCache>,
        rx: broadcast::Receiver<FlowUpdate>,
    }

    fn harness(gateway: MockGateway, expiry_secs: u64) -> Harness {
        let gateway = Arc::new(gateway);
        let cache = Arc::new(RecordingCache::default());
        let (updates, rx) = events::channel();
        let flow = QrDonationFlow::new(
            gateway.clone(),
            cache.clone(),
            Duration::from_secs(5),
            Duration::from_secs(expiry_secs),
            updates,
        );
        Harness {
            flow,
            gateway,
            cache,
            rx,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<FlowUpdate>) -> Vec<&'static str> {
        let mut statuses = Vec::new();
        while let Ok(update) = rx.try_recv() {
            statuses.push(update.status);
        }
        statuses
    }

    #[tokio::test(start_paused = true)]
    async fn three_pending_polls_then_success() {
        let mut h = harness(
            MockGateway::with_statuses(&["pending", "pending", "pending", "settlement"]),
            900,
        );
        let started = Instant::now();

        let payment = h.flow.start(42, Decimal::from(50_000), customer()).await.unwrap();
        assert_eq!(h.flow.snapshot().payment, Some(payment));
        assert_eq!(h.flow.status(), QrStatus::Pending);

        h.flow.settled().await;

        assert_eq!(h.flow.status(), QrStatus::Success);
        assert_eq!(started.elapsed(), Duration::from_secs(20));
        assert_eq!(h.gateway.checks(), 4);
        assert_eq!(h.cache.count(&CacheKey::Campaigns), 1);
        assert_eq!(
            drain(&mut h.rx),
            vec![
                "pending", "checking", "pending", "checking", "pending", "checking", "pending",
                "checking", "success"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_invalidation_while_pending() {
        let h = harness(MockGateway::with_statuses(&["pending", "pending"]), 900);
        h.flow.start(1, Decimal::from(10_000), customer()).await.unwrap();

        time::sleep(Duration::from_secs(11)).await;
        assert_eq!(h.gateway.checks(), 2);
        assert_eq!(h.flow.status(), QrStatus::Pending);
        assert_eq!(h.cache.total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_payment_is_an_error() {
        let h = harness(MockGateway::with_statuses(&["pending", "expire"]), 900);
        h.flow.start(3, Decimal::from(5_000), customer()).await.unwrap();
        h.flow.settled().await;

        let snapshot = h.flow.snapshot();
        assert_eq!(snapshot.status, QrStatus::Error);
        assert_eq!(snapshot.error.map(|e| e.kind), Some(ErrorKind::ConfirmationFailed));
        assert_eq!(h.cache.total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_keep_polling() {
        let gateway = MockGateway::default();
        gateway.push_transport_error();
        gateway.push_status("capture");
        let h = harness(gateway, 900);

        h.flow.start(3, Decimal::from(5_000), customer()).await.unwrap();
        h.flow.settled().await;

        assert_eq!(h.flow.status(), QrStatus::Success);
        assert_eq!(h.gateway.checks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_stops_at_qr_expiry() {
        let h = harness(MockGateway::default(), 12);
        let started = Instant::now();

        h.flow.start(3, Decimal::from(5_000), customer()).await.unwrap();
        h.flow.settled().await;

        assert_eq!(started.elapsed(), Duration::from_secs(12));
        assert_eq!(h.gateway.checks(), 2);
        assert_eq!(h.flow.snapshot().error.map(|e| e.kind), Some(ErrorKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_stops_polling() {
        let h = harness(MockGateway::default(), 900);
        h.flow.start(3, Decimal::from(5_000), customer()).await.unwrap();

        h.flow.reset();
        assert_eq!(h.flow.status(), QrStatus::Idle);
        assert!(h.flow.snapshot().payment.is_none());

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.gateway.checks(), 0);

        h.flow.start(3, Decimal::from(5_000), customer()).await.unwrap();
        assert_eq!(h.gateway.created().len(), 2);
    }

    #[tokio::test]
    async fn below_minimum_is_rejected_before_the_gateway() {
        let h = harness(MockGateway::default(), 900);

        let err = h.flow.start(3, Decimal::from(500), customer()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAmount);
        assert_eq!(h.flow.status(), QrStatus::Error);
        assert!(h.gateway.created().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn settlement_keeps_the_donation_record() {
        let gateway = MockGateway::default();
        gateway.push_settlement(serde_json::json!({ "id": "don-7", "amount": "25000" }));
        let h = harness(gateway, 900);

        h.flow.start(7, Decimal::from(25_000), customer()).await.unwrap();
        h.flow.settled().await;

        let snapshot = h.flow.snapshot();
        assert_eq!(snapshot.status, QrStatus::Success);
        assert_eq!(snapshot.donation.unwrap()["id"], "don-7");
    }

    #[tokio::test]
    async fn blank_customer_details_are_rejected() {
        for blank in [
            CustomerDetails {
                name: "  ".to_string(),
                ..customer()
            },
            CustomerDetails {
                email: String::new(),
                ..customer()
            },
        ] {
            let h = harness(MockGateway::default(), 900);
            let err = h.flow.start(3, Decimal::from(5_000), blank).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
            assert_eq!(h.flow.status(), QrStatus::Error);
            assert!(h.gateway.created().is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn busy_while_polling() {
        let h = harness(MockGateway::default(), 900);
        h.flow.start(3, Decimal::from(5_000), customer()).await.unwrap();

        let second = h.flow.start(4, Decimal::from(5_000), customer()).await;
        assert!(matches!(second, Err(OrchestratorError::Busy)));
        assert_eq!(h.flow.snapshot().campaign_id, Some(3));
    }
}
