//! Fiat (QRIS) payment gateway.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::{OrchestratorError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub name: String,
    pub email: String,
}

/// A created QR payment: the gateway order and where the QR is rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPayment {
    #[serde(alias = "order_id")]
    pub order_id: String,
    #[serde(alias = "redirect_url")]
    pub redirect_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentStatusResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub status: String,
    pub donation: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Paid,
    Failed,
    Pending,
}

const PAID_STATUSES: &[&str] = &["settlement", "capture", "paid", "success"];
const FAILED_STATUSES: &[&str] = &[
    "expire",
    "expired",
    "cancel",
    "cancelled",
    "deny",
    "failure",
    "failed",
];

/// Collapse a gateway status report into the three outcomes polling cares about.
pub fn classify(resp: &PaymentStatusResponse) -> PaymentOutcome {
    let status = resp.status.trim().to_lowercase();
    if resp.success || PAID_STATUSES.contains(&status.as_str()) {
        PaymentOutcome::Paid
    } else if FAILED_STATUSES.contains(&status.as_str()) {
        PaymentOutcome::Failed
    } else {
        PaymentOutcome::Pending
    }
}

#[async_trait]
pub trait FiatGateway: Send + Sync {
    async fn create_qr_payment(
        &self,
        campaign_id: u64,
        amount: Decimal,
        customer: &CustomerDetails,
    ) -> Result<QrPayment>;

    async fn check_payment_status(&self, order_id: &str) -> Result<PaymentStatusResponse>;
}

// ─────────────────────────────────────────────────────────
// HTTP implementation
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePaymentBody<'a> {
    campaign_id: u64,
    amount: Decimal,
    customer: &'a CustomerDetails,
}

/// Some gateway deployments wrap payloads in `{success, data}`; others do not.
#[derive(Deserialize)]
#[serde(untagged)]
enum MaybeWrapped<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> MaybeWrapped<T> {
    fn into_inner(self) -> T {
        match self {
            Self::Wrapped { data } => data,
            Self::Bare(inner) => inner,
        }
    }
}

pub struct HttpFiatGateway {
    client: Client,
    base_url: String,
}

impl HttpFiatGateway {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        HttpFiatGateway {
            client,
            base_url: base_url.into(),
        }
    }

    async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(OrchestratorError::Gateway(format!("HTTP {status}: {body}")))
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let body: MaybeWrapped<T> = Self::ensure_success(resp).await?.json().await?;
        Ok(body.into_inner())
    }
}

#[async_trait]
impl FiatGateway for HttpFiatGateway {
    async fn create_qr_payment(
        &self,
        campaign_id: u64,
        amount: Decimal,
        customer: &CustomerDetails,
    ) -> Result<QrPayment> {
        let url = format!("{}/payment/qris", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&CreatePaymentBody {
                campaign_id,
                amount,
                customer,
            })
            .send()
            .await?;
        let payment: QrPayment = Self::decode(resp).await?;
        debug!("Created QR order {} for campaign {campaign_id}", payment.order_id);
        Ok(payment)
    }

    async fn check_payment_status(&self, order_id: &str) -> Result<PaymentStatusResponse> {
        let url = format!("{}/payment/qris/{order_id}/status", self.base_url);
        let resp = self.client.get(&url).send().await?;
        // `success` here is the payment result, not an envelope flag.
        Ok(Self::ensure_success(resp).await?.json().await?)
    }
}
