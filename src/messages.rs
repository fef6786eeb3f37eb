//! Messages - saga wire contracts between services
//!
//! All coordination between the orchestrator, the ledger and the
//! notification service travels through these envelopes. No service calls
//! another directly; the correlation id on the envelope is the only join
//! key.
//!
//! # Message Flow
//!
//! ```text
//! Orchestrator ── reserve-funds-cmd ──────▶ Ledger
//! Orchestrator ── release-or-commit-cmd ──▶ Ledger
//! Ledger ──────── funds-outcome-event ────▶ Orchestrator
//! Ledger ──────── send-code-cmd ──────────▶ Notification
//! Notification ── code-sent-event ────────▶ Orchestrator
//! Orchestrator ── send-success-cmd ───────▶ Notification
//! Orchestrator ── send-failure-cmd ───────▶ Notification
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_types::{CorrelationId, PhoneKey};

// ============================================================
// CHANNELS
// ============================================================

/// Logical channel names, one FIFO queue each
pub mod channels {
    pub const RESERVE_FUNDS_CMD: &str = "reserve-funds-cmd";
    pub const RELEASE_OR_COMMIT_CMD: &str = "release-or-commit-cmd";
    pub const FUNDS_OUTCOME_EVENT: &str = "funds-outcome-event";
    pub const SEND_CODE_CMD: &str = "send-code-cmd";
    pub const CODE_SENT_EVENT: &str = "code-sent-event";
    pub const SEND_SUCCESS_CMD: &str = "send-success-cmd";
    pub const SEND_FAILURE_CMD: &str = "send-failure-cmd";

    /// Every channel the broker must provision
    pub const ALL: [&str; 7] = [
        RESERVE_FUNDS_CMD,
        RELEASE_OR_COMMIT_CMD,
        FUNDS_OUTCOME_EVENT,
        SEND_CODE_CMD,
        CODE_SENT_EVENT,
        SEND_SUCCESS_CMD,
        SEND_FAILURE_CMD,
    ];
}

// ============================================================
// MESSAGE KIND (routing discriminant)
// ============================================================

/// Message discriminant - used for handler registration and routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    ReserveFunds,
    ReleaseOrCommit,
    FundsOutcome,
    SendCode,
    CodeSent,
    SendSuccess,
    SendFailure,
}

impl MessageKind {
    /// The channel this kind of message travels on
    pub fn channel(&self) -> &'static str {
        match self {
            MessageKind::ReserveFunds => channels::RESERVE_FUNDS_CMD,
            MessageKind::ReleaseOrCommit => channels::RELEASE_OR_COMMIT_CMD,
            MessageKind::FundsOutcome => channels::FUNDS_OUTCOME_EVENT,
            MessageKind::SendCode => channels::SEND_CODE_CMD,
            MessageKind::CodeSent => channels::CODE_SENT_EVENT,
            MessageKind::SendSuccess => channels::SEND_SUCCESS_CMD,
            MessageKind::SendFailure => channels::SEND_FAILURE_CMD,
        }
    }

    /// Get human-readable kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::ReserveFunds => "RESERVE_FUNDS",
            MessageKind::ReleaseOrCommit => "RELEASE_OR_COMMIT",
            MessageKind::FundsOutcome => "FUNDS_OUTCOME",
            MessageKind::SendCode => "SEND_CODE",
            MessageKind::CodeSent => "CODE_SENT",
            MessageKind::SendSuccess => "SEND_SUCCESS",
            MessageKind::SendFailure => "SEND_FAILURE",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================
// FUNDS OUTCOME
// ============================================================

/// Result of a ledger command, published on `funds-outcome-event`
///
/// A cancellation (release acknowledged) is structurally distinct from a
/// failure; consumers must never have to parse a reason string to tell
/// them apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FundsOutcome {
    /// Reservation succeeded, funds held
    Reserved,
    /// Final debit succeeded, funds moved to the recipient
    Committed,
    /// Release acknowledged, reservation returned
    Cancelled,
    /// Command failed, balances untouched
    Failed { reason: String },
}

impl FundsOutcome {
    #[inline]
    pub fn is_reserved(&self) -> bool {
        matches!(self, FundsOutcome::Reserved)
    }

    #[inline]
    pub fn is_committed(&self) -> bool {
        matches!(self, FundsOutcome::Committed)
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FundsOutcome::Cancelled)
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, FundsOutcome::Failed { .. })
    }

    /// Get human-readable outcome label for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            FundsOutcome::Reserved => "RESERVED",
            FundsOutcome::Committed => "COMMITTED",
            FundsOutcome::Cancelled => "CANCELLED",
            FundsOutcome::Failed { .. } => "FAILED",
        }
    }
}

impl fmt::Display for FundsOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================
// MESSAGE BODY
// ============================================================

/// Message body - the payload carried inside an [`Envelope`]
///
/// Tagged serialization keeps the wire format explicit: every payload is a
/// JSON object with a `type` field matching its channel contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    /// Orchestrator → Ledger: hold funds for a pending transfer
    ReserveFunds {
        sender: PhoneKey,
        amount: Decimal,
        confirmation_code: String,
    },

    /// Orchestrator/Sweep → Ledger: settle a reservation
    ///
    /// `final_debit = true` moves the funds to the recipient;
    /// `final_debit = false` returns the reservation to the sender.
    ReleaseOrCommit {
        sender: PhoneKey,
        recipient: Option<PhoneKey>,
        amount: Decimal,
        final_debit: bool,
    },

    /// Ledger → Orchestrator: result of a reserve or settle command
    FundsOutcome {
        sender: PhoneKey,
        recipient: Option<PhoneKey>,
        amount: Decimal,
        outcome: FundsOutcome,
    },

    /// Ledger → Notification: deliver a confirmation code to the sender
    SendCode { phone: PhoneKey, code: String },

    /// Notification → Orchestrator: code delivery acknowledged
    CodeSent,

    /// Orchestrator/Sweep → Notification: tell the sender the transfer
    /// completed
    SendSuccess {
        phone: PhoneKey,
        recipient: PhoneKey,
        amount: Decimal,
        recipient_bank_name: String,
    },

    /// Orchestrator/Sweep → Notification: tell the sender the transfer
    /// failed
    SendFailure {
        phone: PhoneKey,
        amount: Decimal,
        reason: String,
    },
}

impl Message {
    /// Get the routing discriminant for this message
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::ReserveFunds { .. } => MessageKind::ReserveFunds,
            Message::ReleaseOrCommit { .. } => MessageKind::ReleaseOrCommit,
            Message::FundsOutcome { .. } => MessageKind::FundsOutcome,
            Message::SendCode { .. } => MessageKind::SendCode,
            Message::CodeSent => MessageKind::CodeSent,
            Message::SendSuccess { .. } => MessageKind::SendSuccess,
            Message::SendFailure { .. } => MessageKind::SendFailure,
        }
    }
}

// ============================================================
// ENVELOPE
// ============================================================

/// Wire envelope - correlation id + serialized payload + delivery metadata
///
/// The payload stays serialized until the consuming pump decodes it, so a
/// malformed producer shows up as a decode failure on the consumer side
/// (dead-letter path) instead of a panic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Saga join key
    pub correlation_id: CorrelationId,
    /// Routing discriminant (must match the payload `type`)
    pub kind: MessageKind,
    /// Serialized [`Message`] body
    pub payload: serde_json::Value,
    /// Enqueue timestamp (millis)
    pub enqueued_at: i64,
    /// Delivery attempts so far (incremented by the consuming pump)
    pub attempts: u32,
}

impl Envelope {
    /// Wrap a message for transport
    pub fn new(correlation_id: CorrelationId, message: &Message) -> Result<Self, serde_json::Error> {
        Ok(Self {
            correlation_id,
            kind: message.kind(),
            payload: serde_json::to_value(message)?,
            enqueued_at: chrono::Utc::now().timestamp_millis(),
            attempts: 0,
        })
    }

    /// Decode the payload back into a typed message
    pub fn decode(&self) -> Result<Message, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

// ============================================================
// TESTS
// ============================================================
