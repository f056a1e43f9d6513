//! Application-wide error types and the user-facing error surface.

use std::time::Duration;

use alloy_primitives::U256;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Wallet not connected")]
    NotConnected,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: U256, available: U256 },

    /// Named after the Campaign contract's `InsufficientBalance` revert.
    #[error("InsufficientBalance: campaign {campaign_id} holds {available}, withdrawal needs {requested}")]
    CampaignBalanceTooLow {
        campaign_id: u64,
        requested: Decimal,
        available: String,
    },

    #[error("Transaction rejected: {0}")]
    SubmissionRejected(String),

    #[error("Transaction failed on-chain: {0}")]
    ConfirmationFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("No confirmation after {0:?}")]
    Timeout(Duration),

    #[error("Another transaction flow is already active")]
    Busy,

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Backend API error: {0}")]
    Backend(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ABI error: {0}")]
    Abi(#[from] alloy_sol_types::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Coarse error categories the front end renders messages for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotConnected,
    InvalidAmount,
    InvalidInput,
    InsufficientBalance,
    SubmissionRejected,
    ConfirmationFailed,
    NetworkError,
    Timeout,
    Busy,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::InvalidAmount => "invalid_amount",
            Self::InvalidInput => "invalid_input",
            Self::InsufficientBalance => "insufficient_balance",
            Self::SubmissionRejected => "submission_rejected",
            Self::ConfirmationFailed => "confirmation_failed",
            Self::NetworkError => "network_error",
            Self::Timeout => "timeout",
            Self::Busy => "busy",
            Self::Internal => "internal",
        }
    }
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConnected => ErrorKind::NotConnected,
            Self::InvalidAmount(_) => ErrorKind::InvalidAmount,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::InsufficientBalance { .. } | Self::CampaignBalanceTooLow { .. } => {
                ErrorKind::InsufficientBalance
            }
            Self::SubmissionRejected(_) => ErrorKind::SubmissionRejected,
            Self::ConfirmationFailed(_) => ErrorKind::ConfirmationFailed,
            Self::Network(_) | Self::Gateway(_) | Self::Backend(_) | Self::Http(_) => {
                ErrorKind::NetworkError
            }
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Busy => ErrorKind::Busy,
            Self::Json(_) | Self::Abi(_) => ErrorKind::NetworkError,
            Self::Database(_) | Self::Migrate(_) | Self::Config(_) => ErrorKind::Internal,
        }
    }
}

/// Clonable snapshot of an error as surfaced to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    /// Raw message, including any node / contract text.
    pub message: String,
    /// Human-readable message for display.
    pub friendly: String,
}

impl From<&OrchestratorError> for ErrorInfo {
    fn from(err: &OrchestratorError) -> Self {
        let message = err.to_string();
        let kind = err.kind();
        ErrorInfo {
            kind,
            friendly: friendly_message(kind, &message),
            message,
        }
    }
}

impl From<OrchestratorError> for ErrorInfo {
    fn from(err: OrchestratorError) -> Self {
        ErrorInfo::from(&err)
    }
}

// Known substrings from wallets, nodes and the Campaign contract's custom errors.
const KNOWN_FAILURES: &[(&str, &str)] = &[
    ("user rejected", "You rejected the transaction in your wallet."),
    ("user denied", "You rejected the transaction in your wallet."),
    ("insufficient funds", "Your wallet does not have enough funds to pay for gas."),
    ("campaignnotfound", "This campaign does not exist."),
    ("onlyownercanwithdraw", "Only the campaign owner can withdraw funds."),
    ("amountmustbegreaterthanzero", "Amount must be greater than zero."),
    ("campaignalreadyexists", "A campaign with this name already exists."),
    ("insufficientbalance", "The campaign balance is too low for this withdrawal."),
    ("execution reverted", "The transaction was reverted by the contract."),
];

/// Map an error to a message the user can act on.
///
/// Known substrings win over the kind-level default, so a reverted
/// `OnlyOwnerCanWithdraw` reads differently from a generic revert.
pub fn friendly_message(kind: ErrorKind, raw: &str) -> String {
    let lowered = raw.to_lowercase();
    if let Some((_, msg)) = KNOWN_FAILURES.iter().find(|(needle, _)| lowered.contains(needle)) {
        return (*msg).to_string();
    }

    match kind {
        ErrorKind::NotConnected => "Connect your wallet to continue.",
        ErrorKind::InvalidAmount => "Enter an amount greater than zero.",
        ErrorKind::InvalidInput => "Some required fields are missing.",
        ErrorKind::InsufficientBalance => "Your balance is too low for this amount.",
        ErrorKind::SubmissionRejected => "The transaction was not submitted.",
        ErrorKind::ConfirmationFailed => "The transaction failed on-chain.",
        ErrorKind::NetworkError => "Network problem. Please try again.",
        ErrorKind::Timeout => {
            "The transaction is taking too long to confirm. Check the explorer before retrying."
        }
        ErrorKind::Busy => "A transaction is already in progress.",
        ErrorKind::Internal => "Something went wrong. Please try again.",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_wallet_rejection() {
        let err = OrchestratorError::SubmissionRejected(
            "MetaMask Tx Signature: User denied transaction signature.".to_string(),
        );
        let info = ErrorInfo::from(&err);
        assert_eq!(info.kind, ErrorKind::SubmissionRejected);
        assert_eq!(info.friendly, "You rejected the transaction in your wallet.");
    }

    #[test]
    fn maps_contract_custom_error() {
        let err = OrchestratorError::ConfirmationFailed(
            "execution reverted: OnlyOwnerCanWithdraw(0xabc)".to_string(),
        );
        assert_eq!(
            ErrorInfo::from(&err).friendly,
            "Only the campaign owner can withdraw funds."
        );
    }

    #[test]
    fn campaign_and_wallet_shortfalls_read_differently() {
        let campaign = ErrorInfo::from(OrchestratorError::CampaignBalanceTooLow {
            campaign_id: 4,
            requested: Decimal::from(2),
            available: "1.00".to_string(),
        });
        let wallet = ErrorInfo::from(OrchestratorError::InsufficientBalance {
            requested: U256::from(200u64),
            available: U256::from(100u64),
        });

        assert_eq!(campaign.kind, ErrorKind::InsufficientBalance);
        assert_eq!(wallet.kind, ErrorKind::InsufficientBalance);
        assert_eq!(
            campaign.friendly,
            "The campaign balance is too low for this withdrawal."
        );
        assert_eq!(wallet.friendly, "Your balance is too low for this amount.");
    }

    #[test]
    fn falls_back_to_kind_message() {
        let err = OrchestratorError::NotConnected;
        let info = ErrorInfo::from(&err);
        assert_eq!(info.kind, ErrorKind::NotConnected);
        assert_eq!(info.friendly, "Connect your wallet to continue.");
        assert_eq!(info.message, "Wallet not connected");
    }

    #[test]
    fn transport_errors_are_network_kind() {
        assert_eq!(
            OrchestratorError::Gateway("502".into()).kind(),
            ErrorKind::NetworkError
        );
        assert_eq!(
            OrchestratorError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Timeout
        );
    }
}
