//! Axum REST API handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::debug;

use crate::backend::{
    format_idrx, Badge, Campaign, CampaignDetail, CrowdfundingApi, Donation, Vault, VaultListing,
};
use crate::cache::{CacheKey, QueryCache, QueryStore};
use crate::create_campaign::{CampaignCreator, CreateCampaignParams};
use crate::db::{self, TransactionRecord};
use crate::donate::DonationOrchestrator;
use crate::errors::{ErrorInfo, ErrorKind, OrchestratorError};
use crate::gateway::QrPayment;
use crate::qris::QrStatus;
use crate::service::{Currency, DonationIntent, DonationService, DonationStarted};
use crate::withdraw::Withdrawals;
use crate::write_flow::{WriteFlow, WriteStatus};

const DEFAULT_TRANSACTION_LIMIT: i64 = 50;
/// Upper bound for a long-poll on a donation flow.
const MAX_WATCH_SECS: u64 = 60;

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
    pub donations: DonationService,
    pub withdrawals: Withdrawals,
    pub creator: CampaignCreator,
    pub store: Arc<QueryStore>,
    pub backend: CrowdfundingApi,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/donations", post(donate))
        .route("/donations/:currency/status", get(donation_status))
        .route("/donations/:currency/watch", get(watch_donation))
        .route("/donations/:currency/reset", post(reset_donation))
        .route("/donations/:currency/allowance", post(check_allowance))
        .route("/qris/status", get(qris_status))
        .route("/qris/reset", post(reset_qris))
        .route("/withdrawals", post(withdraw))
        .route("/withdrawals/status", get(withdrawal_status))
        .route("/withdrawals/reset", post(reset_withdrawal))
        .route("/campaigns", get(list_campaigns).post(create_campaign))
        .route("/campaigns/create/status", get(create_status))
        .route("/campaigns/create/reset", post(reset_create))
        .route("/campaigns/:id", get(get_campaign))
        .route("/campaigns/:id/transactions", get(campaign_transactions))
        .route("/vaults", get(list_vaults))
        .route("/users/:address/donations", get(user_donations))
        .route("/users/:address/badges", get(user_badges))
        .route("/transactions", get(list_transactions))
        .route("/cache/invalidate", post(invalidate_cache))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────

pub struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError(err)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Busy => StatusCode::CONFLICT,
        ErrorKind::NotConnected
        | ErrorKind::InvalidAmount
        | ErrorKind::InvalidInput
        | ErrorKind::InsufficientBalance => StatusCode::BAD_REQUEST,
        ErrorKind::NetworkError => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::SubmissionRejected | ErrorKind::ConfirmationFailed | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let info = ErrorInfo::from(&self.0);
        (status_for(info.kind), Json(ErrorResponse { error: info })).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn token_flow(state: &ApiState, currency: &str) -> ApiResult<DonationOrchestrator> {
    let currency: Currency = currency.parse()?;
    state
        .donations
        .orchestrator(currency)
        .cloned()
        .ok_or_else(|| {
            OrchestratorError::InvalidInput(format!("{currency} has no on-chain donation flow")).into()
        })
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationStatusResponse {
    pub token: String,
    pub status: &'static str,
    pub tx_hash: Option<String>,
    pub error: Option<ErrorInfo>,
    pub is_connected: bool,
    pub pending_campaign_id: Option<u64>,
}

impl From<&DonationOrchestrator> for DonationStatusResponse {
    fn from(flow: &DonationOrchestrator) -> Self {
        DonationStatusResponse {
            token: flow.token().address.to_checksum(None),
            status: flow.status().as_str(),
            tx_hash: flow.tx_hash().map(|h| format!("{h:#x}")),
            error: flow.error(),
            is_connected: flow.is_connected(),
            pending_campaign_id: flow.pending().map(|p| p.campaign_id),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchQuery {
    /// Status the caller last saw; the request returns once it differs.
    pub since: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Deserialize)]
pub struct AllowanceRequest {
    pub amount: Decimal,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowanceResponse {
    pub needs_approval: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrStatusResponse {
    pub status: QrStatus,
    pub campaign_id: Option<u64>,
    pub payment: Option<QrPayment>,
    pub donation: Option<Value>,
    pub error: Option<ErrorInfo>,
}

/// A campaign with its IDRX amounts in rupiah and the percentage raised.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignView {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub balance_idrx: Decimal,
    pub target_idrx: Decimal,
    pub progress: u8,
}

impl From<Campaign> for CampaignView {
    fn from(campaign: Campaign) -> Self {
        CampaignView {
            balance_idrx: format_idrx(&campaign.balance),
            target_idrx: format_idrx(&campaign.target_amount),
            progress: campaign.progress(),
            campaign,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CampaignDetailView {
    pub campaign: CampaignView,
    pub vault: Option<Vault>,
}

impl From<CampaignDetail> for CampaignDetailView {
    fn from(detail: CampaignDetail) -> Self {
        CampaignDetailView {
            campaign: detail.campaign.into(),
            vault: detail.vault,
        }
    }
}

#[derive(Deserialize)]
pub struct InvalidateQuery {
    pub scope: Option<String>,
}

/// Map an invalidation scope to the key that covers it.
fn scope_key(scope: &str) -> ApiResult<CacheKey> {
    Ok(match scope {
        "all" => CacheKey::All,
        "campaigns" => CacheKey::Campaigns,
        "vaults" => CacheKey::Vaults,
        "donations" => CacheKey::Donations,
        "badges" => CacheKey::Badges,
        other => match other.strip_prefix("campaign:").map(str::parse::<u64>) {
            Some(Ok(id)) => CacheKey::Campaign(id),
            _ => {
                return Err(
                    OrchestratorError::InvalidInput(format!("unknown cache scope {other}")).into(),
                )
            }
        },
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequest {
    pub campaign_id: u64,
    pub amount: Decimal,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteStatusResponse {
    pub status: WriteStatus,
    pub campaign_id: Option<u64>,
    pub tx_hash: Option<String>,
    pub error: Option<ErrorInfo>,
    pub is_connected: bool,
}

impl From<&WriteFlow> for WriteStatusResponse {
    fn from(flow: &WriteFlow) -> Self {
        let snapshot = flow.snapshot();
        WriteStatusResponse {
            status: snapshot.status,
            campaign_id: snapshot.campaign_id,
            tx_hash: snapshot.tx_hash.map(|h| format!("{h:#x}")),
            error: snapshot.error,
            is_connected: flow.is_connected(),
        }
    }
}

#[derive(Deserialize)]
pub struct VaultsQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Deserialize)]
pub struct TransactionsQuery {
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct TransactionsResponse {
    pub count: usize,
    pub transactions: Vec<TransactionRecord>,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /donations`
///
/// Starts the flow for the intent's currency; `409` while that flow is busy.
pub async fn donate(
    State(state): State<Arc<ApiState>>,
    Json(intent): Json<DonationIntent>,
) -> ApiResult<(StatusCode, Json<DonationStarted>)> {
    let started = state.donations.donate(intent).await?;
    Ok((StatusCode::ACCEPTED, Json(started)))
}

/// `GET /donations/:currency/status`
pub async fn donation_status(
    State(state): State<Arc<ApiState>>,
    Path(currency): Path<String>,
) -> ApiResult<Json<DonationStatusResponse>> {
    let flow = token_flow(&state, &currency)?;
    Ok(Json(DonationStatusResponse::from(&flow)))
}

/// `GET /donations/:currency/watch?since=<status>&timeoutSecs=<n>`
///
/// Long-poll: answers as soon as the flow's status differs from `since`, or
/// with the unchanged status once the timeout elapses.
pub async fn watch_donation(
    State(state): State<Arc<ApiState>>,
    Path(currency): Path<String>,
    Query(query): Query<WatchQuery>,
) -> ApiResult<Json<DonationStatusResponse>> {
    let flow = token_flow(&state, &currency)?;
    if let Some(since) = query.since {
        let wait = Duration::from_secs(query.timeout_secs.unwrap_or(30).min(MAX_WATCH_SECS));
        let mut rx = flow.subscribe();
        let changed = tokio::time::timeout(wait, async move {
            rx.wait_for(|current| current.status().as_str() != since).await.is_ok()
        })
        .await
        .unwrap_or(false);
        if !changed {
            debug!("Watch on {currency} elapsed without a status change");
        }
    }
    Ok(Json(DonationStatusResponse::from(&flow)))
}

/// `POST /donations/:currency/reset`
pub async fn reset_donation(
    State(state): State<Arc<ApiState>>,
    Path(currency): Path<String>,
) -> ApiResult<StatusCode> {
    token_flow(&state, &currency)?.reset();
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /donations/:currency/allowance`
pub async fn check_allowance(
    State(state): State<Arc<ApiState>>,
    Path(currency): Path<String>,
    Json(req): Json<AllowanceRequest>,
) -> ApiResult<Json<AllowanceResponse>> {
    let needs_approval = token_flow(&state, &currency)?.check_allowance(req.amount).await?;
    Ok(Json(AllowanceResponse { needs_approval }))
}

/// `GET /qris/status`
pub async fn qris_status(State(state): State<Arc<ApiState>>) -> Json<QrStatusResponse> {
    let snapshot = state.donations.qris().snapshot();
    Json(QrStatusResponse {
        status: snapshot.status,
        campaign_id: snapshot.campaign_id,
        payment: snapshot.payment,
        donation: snapshot.donation,
        error: snapshot.error,
    })
}

/// `POST /qris/reset`
pub async fn reset_qris(State(state): State<Arc<ApiState>>) -> StatusCode {
    state.donations.qris().reset();
    StatusCode::NO_CONTENT
}

/// `POST /withdrawals`
pub async fn withdraw(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<WithdrawRequest>,
) -> ApiResult<StatusCode> {
    state.withdrawals.withdraw(req.campaign_id, req.amount)?;
    Ok(StatusCode::ACCEPTED)
}

/// `GET /withdrawals/status`
pub async fn withdrawal_status(State(state): State<Arc<ApiState>>) -> Json<WriteStatusResponse> {
    Json(WriteStatusResponse::from(state.withdrawals.flow()))
}

/// `POST /withdrawals/reset`
pub async fn reset_withdrawal(State(state): State<Arc<ApiState>>) -> StatusCode {
    state.withdrawals.flow().reset();
    StatusCode::NO_CONTENT
}

/// `POST /campaigns`
pub async fn create_campaign(
    State(state): State<Arc<ApiState>>,
    Json(params): Json<CreateCampaignParams>,
) -> ApiResult<StatusCode> {
    state.creator.create(params)?;
    Ok(StatusCode::ACCEPTED)
}

/// `GET /campaigns/create/status`
pub async fn create_status(State(state): State<Arc<ApiState>>) -> Json<WriteStatusResponse> {
    Json(WriteStatusResponse::from(state.creator.flow()))
}

/// `POST /campaigns/create/reset`
pub async fn reset_create(State(state): State<Arc<ApiState>>) -> StatusCode {
    state.creator.flow().reset();
    StatusCode::NO_CONTENT
}

/// `GET /campaigns`
///
/// Served from the query store; refetched after any flow invalidates campaigns.
pub async fn list_campaigns(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<Json<Vec<CampaignView>>> {
    let backend = state.backend.clone();
    let campaigns: Vec<Campaign> = state
        .store
        .get_or_fetch(CacheKey::Campaigns, || async move { backend.campaigns().await })
        .await?;
    Ok(Json(campaigns.into_iter().map(CampaignView::from).collect()))
}

/// `GET /campaigns/:id`
pub async fn get_campaign(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
) -> ApiResult<Response> {
    let backend = state.backend.clone();
    let detail: Option<CampaignDetail> = state
        .store
        .get_or_fetch(CacheKey::Campaign(id), || async move { backend.campaign(id).await })
        .await?;
    Ok(match detail {
        Some(detail) => Json(CampaignDetailView::from(detail)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    })
}

/// `GET /vaults`
///
/// Only the default listing (active, first page) is cached.
pub async fn list_vaults(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<VaultsQuery>,
) -> ApiResult<Json<Vec<VaultListing>>> {
    let status = query.status.unwrap_or_else(|| "active".to_string());
    let limit = query.limit.unwrap_or(20);
    let offset = query.offset.unwrap_or(0);
    let backend = state.backend.clone();

    let vaults = if status == "active" && limit == 20 && offset == 0 {
        state
            .store
            .get_or_fetch(CacheKey::Vaults, || async move {
                backend.vaults(&status, limit, offset).await
            })
            .await?
    } else {
        backend.vaults(&status, limit, offset).await?
    };
    Ok(Json(vaults))
}

/// `GET /users/:address/donations`
pub async fn user_donations(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> ApiResult<Json<Vec<Donation>>> {
    let backend = state.backend.clone();
    let key = CacheKey::DonationsByUser(address.clone());
    let donations = state
        .store
        .get_or_fetch(key, || async move { backend.donations_by_user(&address).await })
        .await?;
    Ok(Json(donations))
}

/// `GET /users/:address/badges`
pub async fn user_badges(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> ApiResult<Json<Vec<Badge>>> {
    let backend = state.backend.clone();
    let key = CacheKey::BadgesByUser(address.clone());
    let badges = state
        .store
        .get_or_fetch(key, || async move { backend.badges_by_user(&address).await })
        .await?;
    Ok(Json(badges))
}

/// `GET /campaigns/:id/transactions`
///
/// Journal rows for one campaign, oldest first.
pub async fn campaign_transactions(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
) -> ApiResult<Json<TransactionsResponse>> {
    let transactions = db::transactions_for_campaign(&state.pool, id).await?;
    Ok(Json(TransactionsResponse {
        count: transactions.len(),
        transactions,
    }))
}

/// `GET /transactions`
pub async fn list_transactions(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<TransactionsQuery>,
) -> ApiResult<Json<TransactionsResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_TRANSACTION_LIMIT).clamp(1, 500);
    let transactions = db::list_transactions(&state.pool, limit).await?;
    Ok(Json(TransactionsResponse {
        count: transactions.len(),
        transactions,
    }))
}

/// `POST /cache/invalidate?scope=<all|campaigns|campaign:ID|vaults|donations|badges>`
///
/// Forces the next read under `scope` to refetch. Defaults to `all`.
pub async fn invalidate_cache(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<InvalidateQuery>,
) -> ApiResult<StatusCode> {
    let key = scope_key(query.scope.as_deref().unwrap_or("all"))?;
    state.store.invalidate(&key);
    Ok(StatusCode::NO_CONTENT)
}
