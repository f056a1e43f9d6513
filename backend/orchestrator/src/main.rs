//! Crowdfunding transaction orchestrator — entry point.
//!
//! Wires the on-chain donation, withdrawal and campaign-creation flows plus
//! the QRIS fiat flow to a JSON-RPC node and the crowdfunding backend, starts
//! the transaction journal, and serves the flows over a small Axum REST API.

mod abi;
mod amount;
mod api;
mod backend;
mod cache;
mod chain;
mod config;
mod create_campaign;
mod db;
mod donate;
mod errors;
mod events;
mod gateway;
mod machine;
mod qris;
mod recorder;
mod rpc;
mod runs;
mod service;
mod withdraw;
mod write_flow;

#[cfg(test)]
mod testutil;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use backend::CrowdfundingApi;
use cache::{QueryCache, QueryStore};
use chain::ChainClient;
use config::{Config, TokenConfig};
use create_campaign::CampaignCreator;
use donate::DonationOrchestrator;
use events::UpdateSender;
use gateway::HttpFiatGateway;
use qris::QrDonationFlow;
use rpc::RpcChainClient;
use service::DonationService;
use withdraw::Withdrawals;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let pool = db::init_pool(&config.database_url).await?;

    // HTTP client shared by the RPC, gateway and backend clients.
    let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

    let chain: Arc<dyn ChainClient> = Arc::new(RpcChainClient::new(
        client.clone(),
        config.rpc_url.clone(),
        config.wallet_address,
        config.receipt_poll_interval,
    ));
    match config.wallet_address {
        Some(wallet) => info!("Signing as {wallet} on chain {}", config.chain_id),
        None => warn!("WALLET_ADDRESS not set; write flows will report NotConnected"),
    }

    let store = Arc::new(QueryStore::default());
    let cache: Arc<dyn QueryCache> = store.clone();
    let (updates, journal_rx) = events::channel();

    // ─── Transaction journal ──────────────────────────────
    let shutdown = CancellationToken::new();
    let recorder = tokio::spawn(recorder::run(pool.clone(), journal_rx, shutdown.clone()));

    // ─── Flows ────────────────────────────────────────────
    check_decimals(chain.as_ref(), "IDRX", config.idrx).await;
    if let Some(usdc) = config.usdc {
        check_decimals(chain.as_ref(), "USDC", usdc).await;
    }

    let token_flow = |token: TokenConfig, updates: &UpdateSender| {
        DonationOrchestrator::new(
            chain.clone(),
            cache.clone(),
            token,
            config.campaign_contract,
            config.confirmation_timeout,
            updates.clone(),
        )
    };
    let idrx = token_flow(config.idrx, &updates);
    let usdc = config.usdc.map(|token| token_flow(token, &updates));

    let qris = QrDonationFlow::new(
        Arc::new(HttpFiatGateway::new(client.clone(), config.backend_url.clone())),
        cache.clone(),
        config.qr_poll_interval,
        config.qr_expiry,
        updates.clone(),
    );
    let withdrawals = Withdrawals::new(
        chain.clone(),
        cache.clone(),
        config.campaign_contract,
        config.idrx,
        config.confirmation_timeout,
        updates.clone(),
    );
    let creator = CampaignCreator::new(
        chain.clone(),
        cache.clone(),
        config.campaign_contract,
        config.idrx.decimals,
        config.confirmation_timeout,
        updates.clone(),
    );

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState {
        pool,
        donations: DonationService::new(idrx, usdc, qris),
        withdrawals,
        creator,
        store,
        backend: CrowdfundingApi::new(client, config.backend_url.clone()),
    });

    let app = api::router(api_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    let _ = recorder.await;
    Ok(())
}

/// Warn when a configured token's on-chain decimals disagree with the config.
async fn check_decimals(client: &dyn ChainClient, label: &str, token: TokenConfig) {
    match chain::read_decimals(client, token.address).await {
        Ok(onchain) if onchain != token.decimals => warn!(
            "{label} at {} reports {onchain} decimals, configured {}; amounts will be mis-scaled",
            token.address, token.decimals
        ),
        Ok(_) => {}
        Err(e) => warn!("Could not read {label} decimals: {e}"),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
