//! Transfer Core Types
//!
//! Record and caller-facing views for the saga orchestrator.

use crate::core_types::{BankId, CorrelationId, NetworkTxId, PhoneKey, TransferId};
use crate::orchestrator::state::TransferStatus;
use rust_decimal::Decimal;

/// Transfer request from the caller
///
/// Raw strings on purpose: recipient phone and bank id are validated at
/// the orchestrator boundary so every caller gets the same rules.
#[derive(Debug, Clone)]
pub struct InitiateRequest {
    /// Recipient phone number (digits, optional leading '+')
    pub recipient_phone: String,
    /// Recipient bank id in the payment-network directory
    pub recipient_bank: String,
    /// Amount to transfer
    pub amount: Decimal,
}

impl InitiateRequest {
    pub fn new(recipient_phone: &str, recipient_bank: &str, amount: Decimal) -> Self {
        Self {
            recipient_phone: recipient_phone.to_string(),
            recipient_bank: recipient_bank.to_string(),
            amount,
        }
    }
}

/// Transfer record held by the orchestrator store
#[derive(Debug, Clone)]
pub struct Transfer {
    /// Unique transfer ID (ULID, also the store primary key)
    pub transfer_id: TransferId,
    /// Saga join key, present on every message of this transfer
    pub correlation: CorrelationId,
    /// Sender phone key (authenticated caller)
    pub sender: PhoneKey,
    /// Recipient phone key
    pub recipient: PhoneKey,
    /// Recipient bank id
    pub recipient_bank: BankId,
    /// Recipient bank display name (resolved at initiate)
    pub recipient_bank_name: String,
    /// Amount to transfer
    pub amount: Decimal,
    /// Current FSM status
    pub status: TransferStatus,
    /// Six digit code the sender must echo back
    pub confirmation_code: String,
    /// Last code the sender actually provided
    pub user_provided_code: Option<String>,
    /// Failed confirmation attempts so far (never decreases)
    pub confirmation_attempts: u32,
    /// Why the transfer ended in a failure status
    pub failure_reason: Option<String>,
    /// Payment-network leg id (stamped during the receipt stage)
    pub network_tx: Option<NetworkTxId>,
    /// Created timestamp (millis)
    pub created_at: i64,
    /// Last updated timestamp (millis)
    pub updated_at: i64,
}

impl Transfer {
    /// Create a new transfer record in PENDING
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        correlation: CorrelationId,
        sender: PhoneKey,
        recipient: PhoneKey,
        recipient_bank: BankId,
        recipient_bank_name: String,
        amount: Decimal,
        confirmation_code: String,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            transfer_id: TransferId::new(),
            correlation,
            sender,
            recipient,
            recipient_bank,
            recipient_bank_name,
            amount,
            status: TransferStatus::Pending,
            confirmation_code,
            user_provided_code: None,
            confirmation_attempts: 0,
            failure_reason: None,
            network_tx: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build the caller-facing view of this record
    ///
    /// The snapshot never carries the expected confirmation code.
    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            transfer_id: self.transfer_id,
            correlation: self.correlation,
            sender: self.sender.clone(),
            recipient: self.recipient.clone(),
            recipient_bank: self.recipient_bank.clone(),
            recipient_bank_name: self.recipient_bank_name.clone(),
            amount: self.amount,
            status: self.status,
            confirmation_attempts: self.confirmation_attempts,
            failure_reason: self.failure_reason.clone(),
            network_tx: self.network_tx.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Caller-facing transfer view
#[derive(Debug, Clone)]
pub struct TransferSnapshot {
    pub transfer_id: TransferId,
    pub correlation: CorrelationId,
    pub sender: PhoneKey,
    pub recipient: PhoneKey,
    pub recipient_bank: BankId,
    pub recipient_bank_name: String,
    pub amount: Decimal,
    pub status: TransferStatus,
    pub confirmation_attempts: u32,
    pub failure_reason: Option<String>,
    pub network_tx: Option<NetworkTxId>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Reply to a confirmation attempt
#[derive(Debug, Clone)]
pub struct ConfirmReply {
    pub transfer_id: TransferId,
    pub status: TransferStatus,
    /// Human-readable outcome ("2 attempt(s) remaining", "already settled")
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample() -> Transfer {
        Transfer::new(
            CorrelationId::new(),
            PhoneKey::parse("5511999990001").unwrap(),
            PhoneKey::parse("5511999990002").unwrap(),
            BankId::parse("341").unwrap(),
            "Banco Meridional".to_string(),
            Decimal::from_str("100.00").unwrap(),
            "123456".to_string(),
        )
    }

    #[test]
    fn test_new_transfer_starts_pending() {
        let transfer = sample();
        assert_eq!(transfer.status, TransferStatus::Pending);
        assert_eq!(transfer.confirmation_attempts, 0);
        assert!(transfer.user_provided_code.is_none());
        assert!(transfer.failure_reason.is_none());
        assert!(transfer.network_tx.is_none());
        assert_eq!(transfer.created_at, transfer.updated_at);
        assert!(transfer.created_at > 0);
    }

    #[test]
    fn test_snapshot_hides_expected_code() {
        let transfer = sample();
        let snapshot = transfer.snapshot();
        assert_eq!(snapshot.transfer_id, transfer.transfer_id);
        assert_eq!(snapshot.status, TransferStatus::Pending);
        assert_eq!(snapshot.recipient_bank_name, "Banco Meridional");
        // Compile-time property really: TransferSnapshot has no code field.
        let debug = format!("{:?}", snapshot);
        assert!(!debug.contains("123456"));
    }
}
