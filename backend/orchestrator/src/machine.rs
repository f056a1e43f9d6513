//! # Donation state machine
//!
//! A pure transition function for the token donation flow. It performs no
//! I/O: [`Phase::apply`] consumes an [`Event`] and returns at most one
//! [`Effect`] for the driver in [`crate::donate`] to execute.
//!
//! ```text
//! Idle ──► Preparing ──┬─[allowance ok]──► Donating ──► Confirming(donation) ──► Success
//!                      └─[allowance low]─► Approving ──► Confirming(approval) ──► Donating ...
//! any active phase ──► Failed          any phase ──► Idle (reset)
//! ```
//!
//! `Preparing` covers the preflight reads and reports `Idle`. The approval
//! receipt never produces `Success`; only the donation receipt does.

use alloy_primitives::U256;
use serde::Serialize;

use crate::chain::TxHash;
use crate::errors::ErrorInfo;
use crate::events::TxStage;

/// What observers see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Idle,
    Approving,
    Donating,
    Confirming,
    Success,
    Error,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Approving => "approving",
            Self::Donating => "donating",
            Self::Confirming => "confirming",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Donation waiting on an approval to confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingDonation {
    pub campaign_id: u64,
    pub amount_on_chain: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Preparing {
        campaign_id: u64,
    },
    Approving {
        pending: PendingDonation,
    },
    ConfirmingApproval {
        pending: PendingDonation,
        approval: TxHash,
    },
    Donating {
        intent: PendingDonation,
        approval: Option<TxHash>,
    },
    ConfirmingDonation {
        intent: PendingDonation,
        approval: Option<TxHash>,
        donation: TxHash,
    },
    Success {
        intent: PendingDonation,
        approval: Option<TxHash>,
        donation: TxHash,
    },
    Failed {
        campaign_id: Option<u64>,
        error: ErrorInfo,
        approval: Option<TxHash>,
        donation: Option<TxHash>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A run claimed the idle machine.
    Begin { campaign_id: u64 },
    /// Fresh allowance read completed.
    AllowanceChecked {
        pending: PendingDonation,
        sufficient: bool,
    },
    /// The wallet broadcast the write for the current phase.
    Submitted(TxHash),
    /// A receipt reported success.
    Confirmed(TxHash),
    Failed(ErrorInfo),
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// `approve(campaignContract, MAX)`.
    SubmitApproval,
    SubmitDonation(PendingDonation),
    AwaitReceipt(TxHash),
    InvalidateCampaigns,
}

/// The event does not apply to the current phase; nothing changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    pub status: TransactionStatus,
    pub event: &'static str,
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Self::Begin { .. } => "begin",
            Self::AllowanceChecked { .. } => "allowance_checked",
            Self::Submitted(_) => "submitted",
            Self::Confirmed(_) => "confirmed",
            Self::Failed(_) => "failed",
            Self::Reset => "reset",
        }
    }
}

impl Phase {
    pub fn status(&self) -> TransactionStatus {
        match self {
            Self::Idle | Self::Preparing { .. } => TransactionStatus::Idle,
            Self::Approving { .. } => TransactionStatus::Approving,
            Self::Donating { .. } => TransactionStatus::Donating,
            Self::ConfirmingApproval { .. } | Self::ConfirmingDonation { .. } => {
                TransactionStatus::Confirming
            }
            Self::Success { .. } => TransactionStatus::Success,
            Self::Failed { .. } => TransactionStatus::Error,
        }
    }

    /// The in-flight approval while it confirms, otherwise the latest hash.
    pub fn tx_hash(&self) -> Option<TxHash> {
        self.tx().map(|(_, hash)| hash)
    }

    /// Same as [`Phase::tx_hash`], tagged with the write it belongs to.
    pub fn tx(&self) -> Option<(TxStage, TxHash)> {
        let (approval, donation) = match self {
            Self::Idle | Self::Preparing { .. } | Self::Approving { .. } => (None, None),
            Self::ConfirmingApproval { approval, .. } => return Some((TxStage::Approval, *approval)),
            Self::Donating { approval, .. } => (*approval, None),
            Self::ConfirmingDonation { approval, donation, .. }
            | Self::Success { approval, donation, .. } => (*approval, Some(*donation)),
            Self::Failed { approval, donation, .. } => (*approval, *donation),
        };
        donation
            .map(|h| (TxStage::Donation, h))
            .or(approval.map(|h| (TxStage::Approval, h)))
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// The recorded follow-up donation, present only while an approval is outstanding.
    pub fn pending(&self) -> Option<PendingDonation> {
        match self {
            Self::Approving { pending } | Self::ConfirmingApproval { pending, .. } => Some(*pending),
            _ => None,
        }
    }

    pub fn campaign_id(&self) -> Option<u64> {
        match self {
            Self::Idle => None,
            Self::Preparing { campaign_id } => Some(*campaign_id),
            Self::Approving { pending } | Self::ConfirmingApproval { pending, .. } => {
                Some(pending.campaign_id)
            }
            Self::Donating { intent, .. }
            | Self::ConfirmingDonation { intent, .. }
            | Self::Success { intent, .. } => Some(intent.campaign_id),
            Self::Failed { campaign_id, .. } => *campaign_id,
        }
    }

    pub fn amount_on_chain(&self) -> Option<U256> {
        match self {
            Self::Approving { pending } | Self::ConfirmingApproval { pending, .. } => {
                Some(pending.amount_on_chain)
            }
            Self::Donating { intent, .. }
            | Self::ConfirmingDonation { intent, .. }
            | Self::Success { intent, .. } => Some(intent.amount_on_chain),
            _ => None,
        }
    }

    /// No run is in flight: idle, or parked in a terminal phase.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Idle | Self::Success { .. } | Self::Failed { .. })
    }

    pub fn apply(&mut self, event: Event) -> Result<Option<Effect>, Rejected> {
        let rejected = Rejected {
            status: self.status(),
            event: event.name(),
        };

        let (next, effect) = match (&*self, event) {
            (Self::Idle, Event::Reset) => return Err(rejected),
            (_, Event::Reset) => (Self::Idle, None),

            (Self::Idle, Event::Begin { campaign_id }) => (Self::Preparing { campaign_id }, None),

            (Self::Preparing { .. }, Event::AllowanceChecked { pending, sufficient: false }) => {
                (Self::Approving { pending }, Some(Effect::SubmitApproval))
            }
            (Self::Preparing { .. }, Event::AllowanceChecked { pending, sufficient: true }) => (
                Self::Donating {
                    intent: pending,
                    approval: None,
                },
                Some(Effect::SubmitDonation(pending)),
            ),

            (Self::Approving { pending }, Event::Submitted(hash)) => (
                Self::ConfirmingApproval {
                    pending: *pending,
                    approval: hash,
                },
                Some(Effect::AwaitReceipt(hash)),
            ),
            (Self::Donating { intent, approval }, Event::Submitted(hash)) => (
                Self::ConfirmingDonation {
                    intent: *intent,
                    approval: *approval,
                    donation: hash,
                },
                Some(Effect::AwaitReceipt(hash)),
            ),

            // The pending donation is consumed here, so a repeated approval
            // confirmation finds no ConfirmingApproval phase and is rejected.
            (Self::ConfirmingApproval { pending, approval }, Event::Confirmed(hash))
                if *approval == hash =>
            {
                (
                    Self::Donating {
                        intent: *pending,
                        approval: Some(hash),
                    },
                    Some(Effect::SubmitDonation(*pending)),
                )
            }
            (
                Self::ConfirmingDonation {
                    intent,
                    approval,
                    donation,
                },
                Event::Confirmed(hash),
            ) if *donation == hash => (
                Self::Success {
                    intent: *intent,
                    approval: *approval,
                    donation: hash,
                },
                Some(Effect::InvalidateCampaigns),
            ),

            (current, Event::Failed(error)) if !current.is_settled() => {
                let (approval, donation) = match current {
                    Self::ConfirmingApproval { approval, .. } => (Some(*approval), None),
                    Self::Donating { approval, .. } => (*approval, None),
                    Self::ConfirmingDonation { approval, donation, .. } => {
                        (*approval, Some(*donation))
                    }
                    _ => (None, None),
                };
                (
                    Self::Failed {
                        campaign_id: current.campaign_id(),
                        error,
                        approval,
                        donation,
                    },
                    None,
                )
            }

            _ => return Err(rejected),
        };

        *self = next;
        Ok(effect)
    }
}
