//! Transfer Error Types
//!
//! Caller-facing failures of the orchestrator. Saga-internal failures
//! never surface here: they travel as outcome events and end up in the
//! transfer's status and failure reason.

use crate::transport::TransportError;
use thiserror::Error;

/// Transport-neutral error classification
///
/// Carried alongside the code so an embedding surface (HTTP, gRPC, CLI)
/// can map failures without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Conflict,
    Validation,
    Unavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transfer error types
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    // === Validation Errors ===
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Sender and recipient cannot be the same")]
    SameAccount,

    #[error("Unsupported recipient bank: {0}")]
    UnsupportedBank(String),

    // === Authorization Errors ===
    #[error("Caller is not the sender of this transfer")]
    Forbidden,

    // === Lookup / State Errors ===
    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    #[error("Invalid transfer state: {0}")]
    InvalidTransferState(String),

    #[error("Duplicate transfer (correlation id already exists): {0}")]
    DuplicateCorrelation(String),

    // === System Errors ===
    #[error("Command dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl TransferError {
    /// Get the error code for caller-facing responses
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Validation(_) => "VALIDATION_FAILED",
            TransferError::SameAccount => "SAME_ACCOUNT",
            TransferError::UnsupportedBank(_) => "UNSUPPORTED_BANK",
            TransferError::Forbidden => "FORBIDDEN",
            TransferError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            TransferError::InvalidTransferState(_) => "INVALID_TRANSFER_STATE",
            TransferError::DuplicateCorrelation(_) => "DUPLICATE_CORRELATION",
            TransferError::DispatchFailed(_) => "DISPATCH_FAILED",
            TransferError::Unavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Classify the failure for an embedding surface
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::Validation(_)
            | TransferError::SameAccount
            | TransferError::UnsupportedBank(_) => ErrorKind::Validation,
            TransferError::Forbidden => ErrorKind::Forbidden,
            TransferError::TransferNotFound(_) => ErrorKind::NotFound,
            TransferError::InvalidTransferState(_) | TransferError::DuplicateCorrelation(_) => {
                ErrorKind::Conflict
            }
            TransferError::DispatchFailed(_) => ErrorKind::Internal,
            TransferError::Unavailable(_) => ErrorKind::Unavailable,
        }
    }
}

impl From<TransportError> for TransferError {
    fn from(e: TransportError) -> Self {
        TransferError::DispatchFailed(e.to_string())
    }
}
