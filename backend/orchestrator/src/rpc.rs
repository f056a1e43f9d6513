//! EVM JSON-RPC chain client.
//!
//! ## Resilience
//!
//! * Reads back off exponentially on transport errors, HTTP 429 and soft RPC
//!   errors, up to [`MAX_BACKOFF_SECS`] seconds and [`MAX_READ_ATTEMPTS`] tries.
//! * Writes are sent exactly once. A failed `eth_sendTransaction` is reported,
//!   never retried, so a payment cannot be broadcast twice.
//! * Receipt polling treats transport errors as transient; the caller bounds
//!   the overall wait.

use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::abi::ContractCall;
use crate::chain::{ChainClient, TxHash, TxReceipt};
use crate::errors::{OrchestratorError, Result};

const MAX_BACKOFF_SECS: u64 = 60;
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_READ_ATTEMPTS: u32 = 5;

/// EIP-1193 "user rejected request".
const USER_REJECTED_CODE: i64 = 4001;

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RawReceipt {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
    /// `0x1` on success, `0x0` on revert.
    pub status: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

pub struct RpcChainClient {
    client: Client,
    rpc_url: String,
    from: Option<Address>,
    receipt_poll_interval: Duration,
}

impl RpcChainClient {
    pub fn new(
        client: Client,
        rpc_url: impl Into<String>,
        from: Option<Address>,
        receipt_poll_interval: Duration,
    ) -> Self {
        RpcChainClient {
            client,
            rpc_url: rpc_url.into(),
            from,
            receipt_poll_interval,
        }
    }

    /// Send one request; the outer `Result` carries transport failures, the
    /// inner one the node's JSON-RPC error object.
    async fn send(&self, method: &str, params: Value) -> Result<std::result::Result<Value, RpcError>> {
        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(OrchestratorError::Network("rate-limited by RPC".to_string()));
        }

        let body: RpcResponse = resp.error_for_status()?.json().await?;
        match body.error {
            Some(err) => Ok(Err(err)),
            None => Ok(Ok(body.result.unwrap_or(Value::Null))),
        }
    }

    async fn read_with_backoff(&self, method: &str, params: Value) -> Result<Value> {
        let mut backoff = INITIAL_BACKOFF_SECS;
        let mut attempt = 1;

        loop {
            let failure = match self.send(method, params.clone()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if is_hard_error(&err) => {
                    return Err(OrchestratorError::Network(format!(
                        "RPC hard error {}: {}",
                        err.code, err.message
                    )));
                }
                Ok(Err(err)) => format!("RPC soft error {} {}", err.code, err.message),
                Err(e) => e.to_string(),
            };

            if attempt >= MAX_READ_ATTEMPTS {
                return Err(OrchestratorError::Network(format!(
                    "{method} failed after {attempt} attempts: {failure}"
                )));
            }
            warn!("{method} failed (will retry in {backoff}s): {failure}");
            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
            attempt += 1;
        }
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    fn account(&self) -> Option<Address> {
        self.from
    }

    async fn submit_write(&self, call: ContractCall) -> Result<TxHash> {
        let from = self.from.ok_or(OrchestratorError::NotConnected)?;
        info!("Submitting {} to {}", call.function, call.to);

        let result = self
            .send("eth_sendTransaction", build_write_params(from, &call))
            .await
            .map_err(|e| match e {
                OrchestratorError::Http(e) => OrchestratorError::Network(e.to_string()),
                other => other,
            })?;

        match result {
            Ok(value) => {
                let hash = parse_tx_hash(&value)?;
                info!("{} broadcast as {hash}", call.name());
                Ok(hash)
            }
            Err(err) => Err(classify_write_error(&err)),
        }
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt> {
        loop {
            match self
                .send("eth_getTransactionReceipt", json!([tx_hash.to_string()]))
                .await
            {
                Ok(Ok(Value::Null)) => debug!("{tx_hash} not mined yet"),
                Ok(Ok(value)) => {
                    let raw: RawReceipt = serde_json::from_value(value)?;
                    return parse_receipt(&raw);
                }
                Ok(Err(err)) => warn!("Receipt poll for {tx_hash} errored: {} {}", err.code, err.message),
                Err(e) => warn!("Receipt poll for {tx_hash} failed: {e}"),
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }

    async fn read_contract(&self, call: ContractCall) -> Result<Bytes> {
        let value = self
            .read_with_backoff("eth_call", build_call_params(&call))
            .await?;
        let hex_str = value.as_str().ok_or_else(|| {
            OrchestratorError::Network(format!("eth_call {} returned non-string result", call.name()))
        })?;
        decode_hex(hex_str).map(Bytes::from)
    }
}

// ─────────────────────────────────────────────────────────
// Request / response helpers
// ─────────────────────────────────────────────────────────

fn build_write_params(from: Address, call: &ContractCall) -> Value {
    json!([{
        "from": from.to_string(),
        "to": call.to.to_string(),
        "data": format!("0x{}", hex::encode(&call.data)),
    }])
}

fn build_call_params(call: &ContractCall) -> Value {
    json!([
        {
            "to": call.to.to_string(),
            "data": format!("0x{}", hex::encode(&call.data)),
        },
        "latest"
    ])
}

// Invalid request / method not found will not fix themselves.
fn is_hard_error(err: &RpcError) -> bool {
    err.code == -32600 || err.code == -32601 || err.message.contains("execution reverted")
}

fn classify_write_error(err: &RpcError) -> OrchestratorError {
    let lowered = err.message.to_lowercase();
    if err.code == USER_REJECTED_CODE
        || lowered.contains("user rejected")
        || lowered.contains("user denied")
    {
        return OrchestratorError::SubmissionRejected(err.message.clone());
    }
    // Anything the node refuses before broadcast (gas estimation revert,
    // nonce issues, locked account) never reached the chain.
    OrchestratorError::SubmissionRejected(format!("{} (code {})", err.message, err.code))
}

fn parse_tx_hash(value: &Value) -> Result<TxHash> {
    let s = value
        .as_str()
        .ok_or_else(|| OrchestratorError::Network("eth_sendTransaction returned no hash".to_string()))?;
    TxHash::from_str(s).map_err(|_| OrchestratorError::Network(format!("malformed tx hash {s}")))
}

fn parse_receipt(raw: &RawReceipt) -> Result<TxReceipt> {
    Ok(TxReceipt {
        tx_hash: TxHash::from_str(&raw.transaction_hash).map_err(|_| {
            OrchestratorError::Network(format!("malformed tx hash {}", raw.transaction_hash))
        })?,
        block_number: raw.block_number.as_deref().and_then(parse_quantity),
        success: raw.status.as_deref().and_then(parse_quantity) == Some(1),
    })
}

fn parse_quantity(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| OrchestratorError::Network(format!("invalid hex from RPC: {e}")))
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use alloy_primitives::U256;

    use super::*;
    use crate::abi;

    #[test]
    fn call_params_use_latest_block() {
        let call = abi::decimals(Address::repeat_byte(0x11));
        let params = build_call_params(&call);
        assert_eq!(params[1], "latest");
        assert_eq!(params[0]["data"], "0x313ce567");
        assert_eq!(
            params[0]["to"].as_str().unwrap().to_lowercase(),
            format!("0x{}", "11".repeat(20))
        );
    }

    #[test]
    fn write_params_carry_sender() {
        let from = Address::repeat_byte(0x22);
        let call = abi::approve(Address::repeat_byte(0x11), Address::repeat_byte(0x33), U256::MAX);
        let params = build_write_params(from, &call);
        assert_eq!(
            params[0]["from"].as_str().unwrap().to_lowercase(),
            format!("0x{}", "22".repeat(20))
        );
        assert!(params[0]["data"].as_str().unwrap().starts_with("0x095ea7b3"));
    }

    #[test]
    fn user_rejection_is_classified() {
        let err = RpcError {
            code: 4001,
            message: "User rejected the request.".to_string(),
        };
        assert!(matches!(
            classify_write_error(&err),
            OrchestratorError::SubmissionRejected(_)
        ));
    }

    #[test]
    fn parses_successful_and_reverted_receipts() {
        let hash = format!("0x{}", "ab".repeat(32));
        let ok: RawReceipt = serde_json::from_value(json!({
            "transactionHash": hash,
            "blockNumber": "0x10",
            "status": "0x1",
        }))
        .unwrap();
        let receipt = parse_receipt(&ok).unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.block_number, Some(16));

        let reverted: RawReceipt = serde_json::from_value(json!({
            "transactionHash": hash,
            "blockNumber": "0x11",
            "status": "0x0",
        }))
        .unwrap();
        assert!(!parse_receipt(&reverted).unwrap().success);
    }

    #[test]
    fn hard_errors_are_not_retried() {
        assert!(is_hard_error(&RpcError {
            code: -32601,
            message: "method not found".to_string(),
        }));
        assert!(!is_hard_error(&RpcError {
            code: -32005,
            message: "limit exceeded".to_string(),
        }));
    }

    #[test]
    fn decodes_hex_results() {
        assert_eq!(decode_hex("0x0102").unwrap(), vec![1, 2]);
        assert!(decode_hex("0xzz").is_err());
    }
}
