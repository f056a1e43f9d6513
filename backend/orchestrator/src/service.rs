//! Routes a donation intent to the flow that handles its currency.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::donate::DonationOrchestrator;
use crate::errors::{OrchestratorError, Result};
use crate::gateway::{CustomerDetails, QrPayment};
use crate::qris::QrDonationFlow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Idrx,
    Usdc,
    Qris,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idrx => "idrx",
            Self::Usdc => "usdc",
            Self::Qris => "qris",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "idrx" => Ok(Self::Idrx),
            "usdc" => Ok(Self::Usdc),
            "qris" => Ok(Self::Qris),
            other => Err(OrchestratorError::InvalidInput(format!(
                "unknown currency {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationIntent {
    pub campaign_id: u64,
    pub amount: Decimal,
    pub currency: Currency,
    pub customer: Option<CustomerDetails>,
}

/// What a caller gets back once a donation has been accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DonationStarted {
    /// Token flow spawned; follow its status endpoint.
    OnChain { currency: Currency },
    /// QR created; the payer scans it while the flow polls.
    Qr { payment: QrPayment },
}

#[derive(Clone)]
pub struct DonationService {
    idrx: DonationOrchestrator,
    usdc: Option<DonationOrchestrator>,
    qris: QrDonationFlow,
}

impl DonationService {
    pub fn new(idrx: DonationOrchestrator, usdc: Option<DonationOrchestrator>, qris: QrDonationFlow) -> Self {
        DonationService { idrx, usdc, qris }
    }

    /// Orchestrator for a token currency. `Qris` and unconfigured tokens have none.
    pub fn orchestrator(&self, currency: Currency) -> Option<&DonationOrchestrator> {
        match currency {
            Currency::Idrx => Some(&self.idrx),
            Currency::Usdc => self.usdc.as_ref(),
            Currency::Qris => None,
        }
    }

    pub fn qris(&self) -> &QrDonationFlow {
        &self.qris
    }

    pub async fn donate(&self, intent: DonationIntent) -> Result<DonationStarted> {
        let DonationIntent {
            campaign_id,
            amount,
            currency,
            customer,
        } = intent;
        info!("Donation intent: campaign {campaign_id}, {amount} {currency}");

        if currency == Currency::Qris {
            let customer = customer.ok_or_else(|| {
                OrchestratorError::InvalidInput("QRIS donations need customer details".to_string())
            })?;
            let payment = self.qris.start(campaign_id, amount, customer).await?;
            return Ok(DonationStarted::Qr { payment });
        }

        let orchestrator = self.orchestrator(currency).ok_or_else(|| {
            OrchestratorError::InvalidInput(format!("{currency} is not configured"))
        })?;
        orchestrator.donate(campaign_id, amount)?;
        Ok(DonationStarted::OnChain { currency })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use alloy_primitives::U256;

    use super::*;
    use crate::config::TokenConfig;
    use crate::errors::ErrorKind;
    use crate::events::{self, UpdateSender};
    use crate::machine::TransactionStatus;
    use crate::testutil::{customer, MockChain, MockGateway, RecordingCache, CAMPAIGN, TOKEN};

    fn service(chain: MockChain, updates: UpdateSender) -> (DonationService, Arc<MockChain>, Arc<MockGateway>) {
        let chain = Arc::new(chain);
        let gateway = Arc::new(MockGateway::with_statuses(&["settlement"]));
        let cache = Arc::new(RecordingCache::default());
        let idrx = DonationOrchestrator::new(
            chain.clone(),
            cache.clone(),
            TokenConfig {
                address: TOKEN,
                decimals: 2,
            },
            CAMPAIGN,
            Duration::from_secs(30),
            updates.clone(),
        );
        let qris = QrDonationFlow::new(
            gateway.clone(),
            cache,
            Duration::from_secs(5),
            Duration::from_secs(900),
            updates,
        );
        (DonationService::new(idrx, None, qris), chain, gateway)
    }

    fn intent(currency: Currency, customer: Option<CustomerDetails>) -> DonationIntent {
        DonationIntent {
            campaign_id: 9,
            amount: Decimal::from(25_000),
            currency,
            customer,
        }
    }

    #[test]
    fn parses_currencies() {
        assert_eq!("IDRX".parse::<Currency>().unwrap(), Currency::Idrx);
        assert_eq!("qris".parse::<Currency>().unwrap(), Currency::Qris);
        assert!("eur".parse::<Currency>().is_err());
    }

    #[test]
    fn intent_deserializes_from_camel_case() {
        let intent: DonationIntent = serde_json::from_value(serde_json::json!({
            "campaignId": 4,
            "amount": "12.5",
            "currency": "usdc"
        }))
        .unwrap();
        assert_eq!(intent.campaign_id, 4);
        assert_eq!(intent.currency, Currency::Usdc);
        assert!(intent.customer.is_none());
    }

    #[tokio::test]
    async fn token_intent_goes_to_its_orchestrator() {
        let (updates, _) = events::channel();
        let (svc, chain, gateway) = service(MockChain::connected().with_allowance(U256::MAX), updates);

        let started = svc.donate(intent(Currency::Idrx, None)).await.unwrap();
        assert_eq!(started, DonationStarted::OnChain { currency: Currency::Idrx });

        let idrx = svc.orchestrator(Currency::Idrx).unwrap();
        idrx.settled().await;
        assert_eq!(idrx.status(), TransactionStatus::Success);
        assert_eq!(chain.writes().len(), 1);
        assert!(gateway.created().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn qris_intent_creates_a_payment() {
        let (updates, _) = events::channel();
        let (svc, chain, gateway) = service(MockChain::connected(), updates);

        let started = svc.donate(intent(Currency::Qris, Some(customer()))).await.unwrap();
        assert!(matches!(started, DonationStarted::Qr { .. }));
        assert_eq!(gateway.created()[0].0, 9);
        assert!(chain.writes().is_empty());
    }

    #[tokio::test]
    async fn qris_without_customer_is_rejected() {
        let (updates, _) = events::channel();
        let (svc, _, gateway) = service(MockChain::connected(), updates);

        let err = svc.donate(intent(Currency::Qris, None)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(gateway.created().is_empty());
    }

    #[tokio::test]
    async fn unconfigured_token_is_rejected() {
        let (updates, _) = events::channel();
        let (svc, _, _) = service(MockChain::connected(), updates);

        let err = svc.donate(intent(Currency::Usdc, None)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
