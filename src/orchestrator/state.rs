//! Transfer FSM Status Definitions
//!
//! Status IDs are stable SMALLINT-style codes so snapshots and logs stay
//! comparable across versions.

use std::fmt;

/// Transfer FSM Statuses
///
/// Forward path: PENDING (0) → PROCESSING_RESERVATION (10) →
/// AWAITING_CONFIRMATION (20) → PROCESSING_FUNDS (30) →
/// PROCESSING_RECEIPT (40) → SUCCESSFUL (50).
/// Every negative status is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum TransferStatus {
    /// Initial status - request validated and recorded
    Pending = 0,

    /// Reserve command dispatched, waiting for the ledger outcome
    ProcessingReservation = 10,

    /// Funds held, waiting for the sender to echo the confirmation code
    AwaitingConfirmation = 20,

    /// Commit command dispatched, waiting for the ledger outcome
    /// CRITICAL: funds are IN-FLIGHT until the outcome lands
    ProcessingFunds = 30,

    /// Funds committed, registering the network leg and emitting a receipt
    ProcessingReceipt = 40,

    /// Terminal: transfer completed end to end
    Successful = 50,

    /// Terminal: ledger rejected the hold (no funds moved)
    ReservationFailed = -10,

    /// Terminal: confirmation attempts exhausted (hold released)
    ConfirmationFailed = -20,

    /// Terminal: ledger rejected the commit
    FundsTransferFailed = -30,

    /// Terminal: funds committed but the receipt stage failed
    ReceiptError = -40,

    /// Terminal: sender never confirmed within the deadline (hold released)
    Timeout = -50,

    /// Terminal: reservation stage stalled with no outcome
    Failed = -60,
}

impl TransferStatus {
    /// Check if this is a terminal status (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Successful
                | TransferStatus::ReservationFailed
                | TransferStatus::ConfirmationFailed
                | TransferStatus::FundsTransferFailed
                | TransferStatus::ReceiptError
                | TransferStatus::Timeout
                | TransferStatus::Failed
        )
    }

    /// Check if a saga stage is in flight (an outcome may never arrive)
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            TransferStatus::ProcessingReservation
                | TransferStatus::ProcessingFunds
                | TransferStatus::ProcessingReceipt
        )
    }

    /// Check if the sender's money reached the recipient
    ///
    /// RECEIPT_ERROR counts: the commit landed, only the paper trail
    /// failed.
    #[inline]
    pub fn funds_moved(&self) -> bool {
        matches!(self, TransferStatus::Successful | TransferStatus::ReceiptError)
    }

    /// Allowed edges of the FSM
    ///
    /// Single source of truth for every status change. The store rejects
    /// any update whose (current, next) pair is not listed here.
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (*self, next),
            (Pending, ProcessingReservation)
                | (ProcessingReservation, AwaitingConfirmation)
                | (ProcessingReservation, ReservationFailed)
                | (ProcessingReservation, Failed)
                | (AwaitingConfirmation, ProcessingFunds)
                | (AwaitingConfirmation, ConfirmationFailed)
                | (AwaitingConfirmation, Timeout)
                | (ProcessingFunds, ProcessingReceipt)
                | (ProcessingFunds, FundsTransferFailed)
                | (ProcessingReceipt, Successful)
                | (ProcessingReceipt, ReceiptError)
        )
    }

    /// Terminal status a reconciliation pass forces when this stage stalls
    ///
    /// None for statuses the sweep never touches.
    pub fn forced_failure_status(&self) -> Option<TransferStatus> {
        match self {
            TransferStatus::ProcessingReservation => Some(TransferStatus::Failed),
            TransferStatus::ProcessingFunds => Some(TransferStatus::FundsTransferFailed),
            TransferStatus::ProcessingReceipt => Some(TransferStatus::ReceiptError),
            _ => None,
        }
    }

    /// Get the numeric status ID
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from a numeric status ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferStatus::Pending),
            10 => Some(TransferStatus::ProcessingReservation),
            20 => Some(TransferStatus::AwaitingConfirmation),
            30 => Some(TransferStatus::ProcessingFunds),
            40 => Some(TransferStatus::ProcessingReceipt),
            50 => Some(TransferStatus::Successful),
            -10 => Some(TransferStatus::ReservationFailed),
            -20 => Some(TransferStatus::ConfirmationFailed),
            -30 => Some(TransferStatus::FundsTransferFailed),
            -40 => Some(TransferStatus::ReceiptError),
            -50 => Some(TransferStatus::Timeout),
            -60 => Some(TransferStatus::Failed),
            _ => None,
        }
    }

    /// Get human-readable status name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::ProcessingReservation => "PROCESSING_RESERVATION",
            TransferStatus::AwaitingConfirmation => "AWAITING_CONFIRMATION",
            TransferStatus::ProcessingFunds => "PROCESSING_FUNDS",
            TransferStatus::ProcessingReceipt => "PROCESSING_RECEIPT",
            TransferStatus::Successful => "SUCCESSFUL",
            TransferStatus::ReservationFailed => "RESERVATION_FAILED",
            TransferStatus::ConfirmationFailed => "CONFIRMATION_FAILED",
            TransferStatus::FundsTransferFailed => "FUNDS_TRANSFER_FAILED",
            TransferStatus::ReceiptError => "RECEIPT_ERROR",
            TransferStatus::Timeout => "TIMEOUT",
            TransferStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransferStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransferStatus::from_id(value).ok_or(())
    }
}
