//! Transfer Orchestrator
//!
//! Drives the saga: validates and creates transfers, checks
//! confirmation codes, reacts to ledger outcomes, and runs the receipt
//! stage. Every read-check-write unit for one transfer runs under that
//! transfer's correlation lock, so outcome handling, confirmation and
//! the sweep never interleave for the same saga.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::adapters::payment_network::{PaymentNetwork, PaymentNetworkError};
use crate::adapters::receipts::{Receipt, ReceiptEmitter};
use crate::config::SagaConfig;
use crate::core_types::{BankId, CorrelationId, PhoneKey, TransferId, validate_amount};
use crate::messages::{FundsOutcome, Message};
use crate::orchestrator::error::TransferError;
use crate::orchestrator::state::TransferStatus;
use crate::orchestrator::store::TransferStore;
use crate::orchestrator::types::{ConfirmReply, InitiateRequest, Transfer, TransferSnapshot};
use crate::runner::SagaStats;
use crate::transport::{MessageBus, MessageHandler};
use async_trait::async_trait;
use dashmap::DashMap;

const MAX_ATTEMPTS_REASON: &str = "Maximum confirmation attempts exceeded";
const TIMEOUT_REASON: &str = "Confirmation deadline exceeded";
const STUCK_REASON: &str = "Processing deadline exceeded";

// ============================================================
// CORRELATION LOCKS
// ============================================================

/// Keyed async mutexes, one per saga
///
/// The store itself is lock-free; this is what serializes the
/// read-check-write units (initiate, confirm, outcome handling, sweep
/// steps) that touch the same transfer.
#[derive(Default)]
pub struct CorrelationLocks {
    locks: DashMap<CorrelationId, Arc<Mutex<()>>>,
}

impl CorrelationLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Take the per-saga lock
    pub async fn acquire(&self, correlation: CorrelationId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(correlation)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        lock.lock_owned().await
    }
}

/// Six random digits, zero padded
fn generate_confirmation_code() -> String {
    use rand::Rng;
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

// ============================================================
// TRANSFER SERVICE
// ============================================================

/// Saga orchestrator: caller API + outcome event consumer
pub struct TransferService {
    store: Arc<TransferStore>,
    locks: Arc<CorrelationLocks>,
    bus: Arc<MessageBus>,
    network: Arc<dyn PaymentNetwork>,
    receipts: Arc<dyn ReceiptEmitter>,
    config: SagaConfig,
    stats: Arc<SagaStats>,
}

impl TransferService {
    pub fn new(
        store: Arc<TransferStore>,
        locks: Arc<CorrelationLocks>,
        bus: Arc<MessageBus>,
        network: Arc<dyn PaymentNetwork>,
        receipts: Arc<dyn ReceiptEmitter>,
        config: SagaConfig,
        stats: Arc<SagaStats>,
    ) -> Self {
        Self {
            store,
            locks,
            bus,
            network,
            receipts,
            config,
            stats,
        }
    }

    // ============================================================
    // CALLER API
    // ============================================================

    /// Start a transfer saga
    ///
    /// Replay-safe: a second call with the same correlation id returns
    /// the existing transfer without dispatching anything. If the
    /// reserve command cannot be dispatched, the created record is
    /// removed again so the caller can retry cleanly.
    pub async fn initiate(
        &self,
        correlation: CorrelationId,
        sender: PhoneKey,
        request: InitiateRequest,
    ) -> Result<TransferSnapshot, TransferError> {
        validate_amount(request.amount).map_err(|e| TransferError::Validation(e.to_string()))?;
        let recipient = PhoneKey::parse(&request.recipient_phone)
            .map_err(|e| TransferError::Validation(format!("recipient phone: {}", e)))?;
        let bank = BankId::parse(&request.recipient_bank)
            .map_err(|e| TransferError::Validation(format!("recipient bank: {}", e)))?;
        if sender == recipient {
            return Err(TransferError::SameAccount);
        }

        let _guard = self.locks.acquire(correlation).await;

        // Retried request: hand back what the first call produced
        if let Some(existing) = self.store.get_by_correlation(correlation) {
            debug!(correlation_id = %correlation, transfer_id = %existing.transfer_id,
                "Duplicate correlation id, returning existing transfer");
            return Ok(existing.snapshot());
        }

        // The only blocking collaborator call in the saga, so it gets a
        // hard deadline
        let bank_info = match tokio::time::timeout(
            self.config.bank_lookup_timeout(),
            self.network.lookup_bank(&bank),
        )
        .await
        {
            Err(_) => {
                warn!(correlation_id = %correlation, bank = %bank, "Bank directory lookup timed out");
                return Err(TransferError::Unavailable(
                    "Bank directory lookup timed out".to_string(),
                ));
            }
            Ok(Err(PaymentNetworkError::UnknownBank(id))) => {
                return Err(TransferError::UnsupportedBank(id));
            }
            Ok(Err(e)) => return Err(TransferError::Unavailable(e.to_string())),
            Ok(Ok(info)) => info,
        };

        let record = Transfer::new(
            correlation,
            sender.clone(),
            recipient,
            bank,
            bank_info.name,
            request.amount,
            generate_confirmation_code(),
        );
        let confirmation_code = record.confirmation_code.clone();
        let transfer_id = self.store.create(record)?;

        // Dispatch-or-rollback: no reserve command, no record
        let reserve = Message::ReserveFunds {
            sender: sender.clone(),
            amount: request.amount,
            confirmation_code,
        };
        if let Err(e) = self.bus.publish(correlation, &reserve) {
            error!(correlation_id = %correlation, error = %e,
                "Reserve dispatch failed, rolling back transfer creation");
            self.store.remove(transfer_id);
            return Err(e.into());
        }

        if !self.store.update_status_if(
            transfer_id,
            TransferStatus::Pending,
            TransferStatus::ProcessingReservation,
        )? {
            error!(transfer_id = %transfer_id, "CAS failed after create (data corruption?)");
            return Err(TransferError::InvalidTransferState("PENDING".to_string()));
        }

        self.stats.incr_initiated();
        info!(
            transfer_id = %transfer_id,
            correlation_id = %correlation,
            amount = %request.amount,
            "Transfer initiated: {} -> {}", sender, request.recipient_phone
        );

        // Re-read so the snapshot carries the dispatched status
        self.get_status(transfer_id)
    }

    /// Check a confirmation code echoed by the sender
    pub async fn confirm(
        &self,
        transfer_id: TransferId,
        code: &str,
        caller: &PhoneKey,
    ) -> Result<ConfirmReply, TransferError> {
        let preview = self
            .store
            .get(transfer_id)
            .ok_or_else(|| TransferError::TransferNotFound(transfer_id.to_string()))?;
        if preview.sender != *caller {
            warn!(transfer_id = %transfer_id, caller = %caller, "Confirmation by non-sender rejected");
            return Err(TransferError::Forbidden);
        }

        let _guard = self.locks.acquire(preview.correlation).await;

        // Re-read under the lock: the sweep or an outcome may have
        // settled the transfer while we waited
        let record = self
            .store
            .get(transfer_id)
            .ok_or_else(|| TransferError::TransferNotFound(transfer_id.to_string()))?;

        match record.status {
            TransferStatus::AwaitingConfirmation => {}
            TransferStatus::ProcessingFunds | TransferStatus::ProcessingReceipt => {
                return Ok(ConfirmReply {
                    transfer_id,
                    status: record.status,
                    message: "Confirmation already accepted, transfer settling".to_string(),
                });
            }
            status if status.is_terminal() => {
                return Ok(ConfirmReply {
                    transfer_id,
                    status,
                    message: format!("Transfer already settled: {}", status),
                });
            }
            status => {
                return Err(TransferError::InvalidTransferState(format!(
                    "{} (confirmation not open yet)",
                    status
                )));
            }
        }

        let max = self.config.max_confirmation_attempts;

        // Exhausted on a previous call whose release dispatch failed:
        // retry the compensation instead of honoring the code
        if record.confirmation_attempts >= max {
            return self.exhaust_confirmation(&record, record.confirmation_attempts);
        }

        if record.confirmation_code != code {
            let attempts = self.store.record_attempt(transfer_id, code)?;
            if attempts >= max {
                return self.exhaust_confirmation(&record, attempts);
            }
            let remaining = max - attempts;
            info!(transfer_id = %transfer_id, attempts, remaining, "Invalid confirmation code");
            return Ok(ConfirmReply {
                transfer_id,
                status: TransferStatus::AwaitingConfirmation,
                message: format!("Invalid confirmation code. {} attempt(s) remaining", remaining),
            });
        }

        // Dispatch the final debit, then flip. The flip cannot fail
        // under the correlation lock, so a dispatched commit is never
        // left in PENDING-like limbo.
        let commit = Message::ReleaseOrCommit {
            sender: record.sender.clone(),
            recipient: Some(record.recipient.clone()),
            amount: record.amount,
            final_debit: true,
        };
        if let Err(e) = self.bus.publish(record.correlation, &commit) {
            error!(transfer_id = %transfer_id, error = %e,
                "Commit dispatch failed, staying AWAITING_CONFIRMATION");
            return Err(e.into());
        }
        if !self.store.update_status_if(
            transfer_id,
            TransferStatus::AwaitingConfirmation,
            TransferStatus::ProcessingFunds,
        )? {
            error!(transfer_id = %transfer_id, "CAS failed under correlation lock (data corruption?)");
        }

        self.stats.incr_confirmed();
        info!(transfer_id = %transfer_id, "Confirmation accepted, committing funds");
        Ok(ConfirmReply {
            transfer_id,
            status: TransferStatus::ProcessingFunds,
            message: "Confirmation accepted".to_string(),
        })
    }

    /// Get the caller-facing snapshot of a transfer
    pub fn get_status(&self, transfer_id: TransferId) -> Result<TransferSnapshot, TransferError> {
        self.store
            .get(transfer_id)
            .map(|record| record.snapshot())
            .ok_or_else(|| TransferError::TransferNotFound(transfer_id.to_string()))
    }

    /// Store handle for the reconciliation sweep
    pub fn store(&self) -> &Arc<TransferStore> {
        &self.store
    }

    // ============================================================
    // SWEEP ENTRY POINTS
    // ============================================================

    /// Time out a transfer still awaiting confirmation past its deadline
    ///
    /// Re-checks status and age under the correlation lock: a confirm
    /// that landed while the sweep waited makes this a no-op. Returns
    /// whether the transfer was actually timed out.
    pub async fn expire_confirmation(
        &self,
        transfer_id: TransferId,
        cutoff_millis: i64,
    ) -> anyhow::Result<bool> {
        let Some(preview) = self.store.get(transfer_id) else {
            return Ok(false);
        };
        let _guard = self.locks.acquire(preview.correlation).await;

        let Some(record) = self.store.get(transfer_id) else {
            return Ok(false);
        };
        if record.status != TransferStatus::AwaitingConfirmation
            || record.updated_at > cutoff_millis
        {
            return Ok(false);
        }

        let release = Message::ReleaseOrCommit {
            sender: record.sender.clone(),
            recipient: None,
            amount: record.amount,
            final_debit: false,
        };
        if let Err(e) = self.bus.publish(record.correlation, &release) {
            warn!(transfer_id = %transfer_id, error = %e,
                "Release dispatch failed, transfer stays for the next pass");
            return Ok(false);
        }

        if self.store.update_status_with_reason(
            transfer_id,
            TransferStatus::AwaitingConfirmation,
            TransferStatus::Timeout,
            TIMEOUT_REASON,
        )? {
            self.stats.incr_failed();
            self.stats.incr_swept();
            warn!(transfer_id = %transfer_id, "Confirmation deadline exceeded, hold released");
            self.notify_failure(&record, TIMEOUT_REASON);
            return Ok(true);
        }
        Ok(false)
    }

    /// Force a stuck in-flight transfer onto its failure edge
    ///
    /// No compensation is dispatched here: a transfer stuck in a
    /// PROCESSING_* state means the channel or a collaborator is in an
    /// unknown condition, so the flip records the failure for operator
    /// repair instead of guessing at ledger state.
    pub async fn force_stale(
        &self,
        transfer_id: TransferId,
        cutoff_millis: i64,
    ) -> anyhow::Result<bool> {
        let Some(preview) = self.store.get(transfer_id) else {
            return Ok(false);
        };
        let _guard = self.locks.acquire(preview.correlation).await;

        let Some(record) = self.store.get(transfer_id) else {
            return Ok(false);
        };
        if record.updated_at > cutoff_millis {
            return Ok(false);
        }
        let Some(failure) = record.status.forced_failure_status() else {
            // Moved on while we waited for the lock
            return Ok(false);
        };

        if self
            .store
            .update_status_with_reason(transfer_id, record.status, failure, STUCK_REASON)?
        {
            warn!(transfer_id = %transfer_id, from = %record.status, to = %failure,
                "Forcing stuck transfer onto its failure edge");
            self.stats.incr_swept();
            if failure == TransferStatus::ReceiptError {
                // Funds moved before the transfer got stuck
                self.stats.incr_receipt_errors();
                self.notify_success(&record);
            } else {
                self.stats.incr_failed();
                self.notify_failure(&record, STUCK_REASON);
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Exhaustion: dispatch the compensating release, then flip
    ///
    /// Dispatch comes first so a failed dispatch leaves the transfer in
    /// AWAITING_CONFIRMATION where this path (or the sweep) retries it.
    fn exhaust_confirmation(
        &self,
        record: &Transfer,
        attempts: u32,
    ) -> Result<ConfirmReply, TransferError> {
        let release = Message::ReleaseOrCommit {
            sender: record.sender.clone(),
            recipient: None,
            amount: record.amount,
            final_debit: false,
        };
        if let Err(e) = self.bus.publish(record.correlation, &release) {
            error!(transfer_id = %record.transfer_id, error = %e,
                "Release dispatch failed, leaving transfer for the sweep");
            return Err(e.into());
        }
        if self.store.update_status_with_reason(
            record.transfer_id,
            TransferStatus::AwaitingConfirmation,
            TransferStatus::ConfirmationFailed,
            MAX_ATTEMPTS_REASON,
        )? {
            self.stats.incr_failed();
            warn!(transfer_id = %record.transfer_id, attempts,
                "Confirmation attempts exhausted, reservation released");
            self.notify_failure(record, MAX_ATTEMPTS_REASON);
        }
        Ok(ConfirmReply {
            transfer_id: record.transfer_id,
            status: TransferStatus::ConfirmationFailed,
            message: MAX_ATTEMPTS_REASON.to_string(),
        })
    }

    // ============================================================
    // OUTCOME HANDLING
    // ============================================================

    async fn on_funds_outcome(
        &self,
        correlation: CorrelationId,
        outcome: FundsOutcome,
    ) -> anyhow::Result<()> {
        let _guard = self.locks.acquire(correlation).await;

        let Some(record) = self.store.get_by_correlation(correlation) else {
            warn!(correlation_id = %correlation, outcome = %outcome,
                "Outcome for unknown correlation, discarding");
            return Ok(());
        };
        let transfer_id = record.transfer_id;

        if record.status.is_terminal() {
            debug!(correlation_id = %correlation, status = %record.status, outcome = %outcome,
                "Late outcome for settled transfer, discarding");
            return Ok(());
        }

        match (record.status, outcome) {
            (TransferStatus::ProcessingReservation, FundsOutcome::Reserved) => {
                if self.store.update_status_if(
                    transfer_id,
                    TransferStatus::ProcessingReservation,
                    TransferStatus::AwaitingConfirmation,
                )? {
                    info!(transfer_id = %transfer_id, "Funds held, awaiting confirmation");
                }
                Ok(())
            }
            (TransferStatus::ProcessingReservation, FundsOutcome::Failed { reason }) => {
                if self.store.update_status_with_reason(
                    transfer_id,
                    TransferStatus::ProcessingReservation,
                    TransferStatus::ReservationFailed,
                    &reason,
                )? {
                    self.stats.incr_failed();
                    warn!(transfer_id = %transfer_id, reason = %reason, "Reservation failed");
                    self.notify_failure(&record, &reason);
                }
                Ok(())
            }
            (TransferStatus::ProcessingFunds, FundsOutcome::Committed) => {
                self.run_receipt_stage(&record).await
            }
            (TransferStatus::ProcessingFunds, FundsOutcome::Failed { reason }) => {
                if self.store.update_status_with_reason(
                    transfer_id,
                    TransferStatus::ProcessingFunds,
                    TransferStatus::FundsTransferFailed,
                    &reason,
                )? {
                    self.stats.incr_failed();
                    warn!(transfer_id = %transfer_id, reason = %reason, "Funds transfer failed");
                    self.notify_failure(&record, &reason);
                }
                Ok(())
            }
            (status, outcome) => {
                // Includes Cancelled against a live transfer: release
                // acks are only expected after a terminal flip
                warn!(transfer_id = %transfer_id, status = %status, outcome = %outcome,
                    "Unexpected outcome for status, discarding");
                Ok(())
            }
        }
    }

    /// Receipt stage: register the network leg, emit the receipt
    ///
    /// Funds already moved, so every failure here degrades to
    /// RECEIPT_ERROR and the sender still gets a success notice.
    async fn run_receipt_stage(&self, record: &Transfer) -> anyhow::Result<()> {
        let transfer_id = record.transfer_id;

        if !self.store.update_status_if(
            transfer_id,
            TransferStatus::ProcessingFunds,
            TransferStatus::ProcessingReceipt,
        )? {
            warn!(transfer_id = %transfer_id, "Commit outcome raced another settle path, discarding");
            return Ok(());
        }
        info!(transfer_id = %transfer_id, "🔒 Funds committed, running receipt stage");

        let leg = match self
            .network
            .register_transfer(
                record.correlation,
                &record.sender,
                &record.recipient,
                &record.recipient_bank,
                record.amount,
            )
            .await
        {
            Ok(leg) => leg,
            Err(e) => {
                return self
                    .finish_receipt_error(record, &format!("Network registration failed: {}", e));
            }
        };
        self.store.stamp_network_tx(transfer_id, leg.clone())?;

        let receipt = Receipt {
            correlation: record.correlation,
            network_tx: leg,
            sender: record.sender.clone(),
            recipient: record.recipient.clone(),
            recipient_bank_name: record.recipient_bank_name.clone(),
            amount: record.amount,
            issued_at: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(e) = self.receipts.emit(&receipt).await {
            return self.finish_receipt_error(record, &format!("Receipt emission failed: {}", e));
        }

        if self.store.update_status_if(
            transfer_id,
            TransferStatus::ProcessingReceipt,
            TransferStatus::Successful,
        )? {
            self.stats.incr_succeeded();
            info!(transfer_id = %transfer_id, "Transfer SUCCESSFUL");
            self.notify_success(record);
        }
        Ok(())
    }

    fn finish_receipt_error(&self, record: &Transfer, reason: &str) -> anyhow::Result<()> {
        if self.store.update_status_with_reason(
            record.transfer_id,
            TransferStatus::ProcessingReceipt,
            TransferStatus::ReceiptError,
            reason,
        )? {
            self.stats.incr_receipt_errors();
            warn!(transfer_id = %record.transfer_id, reason = %reason,
                "Receipt stage failed, funds already moved");
            // Funds reached the recipient, so the sender hears success
            self.notify_success(record);
        }
        Ok(())
    }

    async fn on_code_sent(&self, correlation: CorrelationId) -> anyhow::Result<()> {
        // Advisory: the FSM waits on the sender, not on the channel ack
        debug!(correlation_id = %correlation, "Confirmation code delivery acknowledged");
        Ok(())
    }

    // ============================================================
    // NOTIFICATIONS (best effort)
    // ============================================================

    fn notify_failure(&self, record: &Transfer, reason: &str) {
        let message = Message::SendFailure {
            phone: record.sender.clone(),
            amount: record.amount,
            reason: reason.to_string(),
        };
        if let Err(e) = self.bus.publish(record.correlation, &message) {
            warn!(correlation_id = %record.correlation, error = %e, "Failure notice dropped");
        }
    }

    fn notify_success(&self, record: &Transfer) {
        let message = Message::SendSuccess {
            phone: record.sender.clone(),
            recipient: record.recipient.clone(),
            amount: record.amount,
            recipient_bank_name: record.recipient_bank_name.clone(),
        };
        if let Err(e) = self.bus.publish(record.correlation, &message) {
            warn!(correlation_id = %record.correlation, error = %e, "Success notice dropped");
        }
    }
}

#[async_trait]
impl MessageHandler for TransferService {
    fn name(&self) -> &'static str {
        "orchestrator"
    }

    async fn handle(&self, correlation_id: CorrelationId, message: Message) -> anyhow::Result<()> {
        match message {
            Message::FundsOutcome { outcome, .. } => {
                self.on_funds_outcome(correlation_id, outcome).await
            }
            Message::CodeSent => self.on_code_sent(correlation_id).await,
            other => {
                warn!(correlation_id = %correlation_id, kind = %other.kind(),
                    "Unexpected message on orchestrator channels");
                Ok(())
            }
        }
    }
}
