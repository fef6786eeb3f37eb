//! Transfer Store
//!
//! In-memory record store with guarded status transitions. Every status
//! change goes through a CAS that also validates the edge against
//! [`TransferStatus::can_transition_to`], so an illegal transition is a
//! hard error no matter which code path attempts it.

use crate::core_types::{CorrelationId, NetworkTxId, TransferId};
use crate::orchestrator::error::TransferError;
use crate::orchestrator::state::TransferStatus;
use crate::orchestrator::types::Transfer;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Transfer record operations
///
/// Lookups clone records out; concurrent mutation control is the
/// caller's job (the service serializes per correlation id).
pub struct TransferStore {
    transfers: DashMap<TransferId, Transfer>,
    by_correlation: DashMap<CorrelationId, TransferId>,
}

impl TransferStore {
    pub fn new() -> Self {
        Self {
            transfers: DashMap::new(),
            by_correlation: DashMap::new(),
        }
    }

    /// Create a new transfer record
    ///
    /// The correlation id must be unseen. Callers handle replays by
    /// looking up the correlation first (under its lock), so a duplicate
    /// here means a broken invariant, not a retry.
    pub fn create(&self, record: Transfer) -> Result<TransferId, TransferError> {
        let id = record.transfer_id;
        match self.by_correlation.entry(record.correlation) {
            Entry::Occupied(_) => Err(TransferError::DuplicateCorrelation(
                record.correlation.to_string(),
            )),
            Entry::Vacant(vacant) => {
                self.transfers.insert(id, record);
                vacant.insert(id);
                Ok(id)
            }
        }
    }

    /// Get a transfer record by transfer id
    pub fn get(&self, id: TransferId) -> Option<Transfer> {
        self.transfers.get(&id).map(|entry| entry.value().clone())
    }

    /// Get a transfer record by correlation id
    pub fn get_by_correlation(&self, correlation: CorrelationId) -> Option<Transfer> {
        let id = *self.by_correlation.get(&correlation)?;
        self.get(id)
    }

    /// Remove a record (initiate rollback path)
    ///
    /// Keeps the correlation index consistent with the record map.
    pub fn remove(&self, id: TransferId) -> Option<Transfer> {
        let (_, record) = self.transfers.remove(&id)?;
        self.by_correlation.remove(&record.correlation);
        Some(record)
    }

    /// Atomic CAS update: set status only if the current status matches
    ///
    /// Returns true on success, false if the current status didn't match
    /// (another path settled the transfer first). An (expected, next)
    /// pair that is not an FSM edge is an error regardless of the
    /// current status.
    pub fn update_status_if(
        &self,
        id: TransferId,
        expected: TransferStatus,
        next: TransferStatus,
    ) -> Result<bool, TransferError> {
        self.update(id, expected, next, None)
    }

    /// Atomic CAS update that also records a failure reason
    pub fn update_status_with_reason(
        &self,
        id: TransferId,
        expected: TransferStatus,
        next: TransferStatus,
        reason: &str,
    ) -> Result<bool, TransferError> {
        self.update(id, expected, next, Some(reason))
    }

    fn update(
        &self,
        id: TransferId,
        expected: TransferStatus,
        next: TransferStatus,
        reason: Option<&str>,
    ) -> Result<bool, TransferError> {
        if !expected.can_transition_to(next) {
            return Err(TransferError::InvalidTransferState(format!(
                "{} -> {}",
                expected, next
            )));
        }
        let mut entry = self
            .transfers
            .get_mut(&id)
            .ok_or_else(|| TransferError::TransferNotFound(id.to_string()))?;
        if entry.status != expected {
            return Ok(false);
        }
        entry.status = next;
        if let Some(reason) = reason {
            entry.failure_reason = Some(reason.to_string());
        }
        entry.updated_at = chrono::Utc::now().timestamp_millis();
        Ok(true)
    }

    /// Record a confirmation attempt, returns the new attempt count
    pub fn record_attempt(&self, id: TransferId, provided: &str) -> Result<u32, TransferError> {
        let mut entry = self
            .transfers
            .get_mut(&id)
            .ok_or_else(|| TransferError::TransferNotFound(id.to_string()))?;
        entry.confirmation_attempts += 1;
        entry.user_provided_code = Some(provided.to_string());
        entry.updated_at = chrono::Utc::now().timestamp_millis();
        Ok(entry.confirmation_attempts)
    }

    /// Stamp the payment-network leg id (receipt stage)
    pub fn stamp_network_tx(&self, id: TransferId, tx: NetworkTxId) -> Result<(), TransferError> {
        let mut entry = self
            .transfers
            .get_mut(&id)
            .ok_or_else(|| TransferError::TransferNotFound(id.to_string()))?;
        entry.network_tx = Some(tx);
        entry.updated_at = chrono::Utc::now().timestamp_millis();
        Ok(())
    }

    /// Find stale transfers (sitting in one of `statuses` since before
    /// `cutoff_millis`), oldest first, at most `limit`
    ///
    /// Used by the reconciliation sweep.
    pub fn find_stale(
        &self,
        statuses: &[TransferStatus],
        cutoff_millis: i64,
        limit: usize,
    ) -> Vec<Transfer> {
        let mut stale: Vec<Transfer> = self
            .transfers
            .iter()
            .filter(|entry| {
                statuses.contains(&entry.status) && entry.updated_at < cutoff_millis
            })
            .map(|entry| entry.value().clone())
            .collect();
        stale.sort_by_key(|record| record.updated_at);
        stale.truncate(limit);
        stale
    }

    /// Count transfers currently in a status
    pub fn count_by_status(&self, status: TransferStatus) -> usize {
        self.transfers
            .iter()
            .filter(|entry| entry.status == status)
            .count()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Shift a record's updated_at into the past (deadline tests)
    #[cfg(test)]
    pub fn backdate_updated_at(&self, id: TransferId, millis_ago: i64) {
        if let Some(mut entry) = self.transfers.get_mut(&id) {
            entry.updated_at -= millis_ago;
        }
    }
}

impl Default for TransferStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{BankId, PhoneKey};
    use rust_decimal::Decimal;
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
    fn test_create_and_lookup() {
        let store = TransferStore::new();
        let record = sample();
        let correlation = record.correlation;

        let id = store.create(record).unwrap();
        assert_eq!(store.get(id).unwrap().transfer_id, id);
        assert_eq!(
            store.get_by_correlation(correlation).unwrap().transfer_id,
            id
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_duplicate_correlation_rejected() {
        let store = TransferStore::new();
        let record = sample();
        let mut duplicate = sample();
        duplicate.correlation = record.correlation;

        store.create(record).unwrap();
        let err = store.create(duplicate).unwrap_err();
        assert!(matches!(err, TransferError::DuplicateCorrelation(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_cas_success_and_miss() {
        let store = TransferStore::new();
        let id = store.create(sample()).unwrap();

        let moved = store
            .update_status_if(
                id,
                TransferStatus::Pending,
                TransferStatus::ProcessingReservation,
            )
            .unwrap();
        assert!(moved);
        assert_eq!(
            store.get(id).unwrap().status,
            TransferStatus::ProcessingReservation
        );

        // Same CAS again: current status no longer matches
        let moved = store
            .update_status_if(
                id,
                TransferStatus::Pending,
                TransferStatus::ProcessingReservation,
            )
            .unwrap();
        assert!(!moved);
    }

    #[test]
    fn test_illegal_edge_is_an_error() {
        let store = TransferStore::new();
        let id = store.create(sample()).unwrap();

        let err = store
            .update_status_if(id, TransferStatus::Pending, TransferStatus::Successful)
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidTransferState(_)));
        // Record untouched
        assert_eq!(store.get(id).unwrap().status, TransferStatus::Pending);
    }

    #[test]
    fn test_update_with_reason() {
        let store = TransferStore::new();
        let id = store.create(sample()).unwrap();
        store
            .update_status_if(
                id,
                TransferStatus::Pending,
                TransferStatus::ProcessingReservation,
            )
            .unwrap();

        let moved = store
            .update_status_with_reason(
                id,
                TransferStatus::ProcessingReservation,
                TransferStatus::ReservationFailed,
                "Insufficient available funds",
            )
            .unwrap();
        assert!(moved);

        let record = store.get(id).unwrap();
        assert_eq!(record.status, TransferStatus::ReservationFailed);
        assert_eq!(
            record.failure_reason.as_deref(),
            Some("Insufficient available funds")
        );
    }

    #[test]
    fn test_record_attempt() {
        let store = TransferStore::new();
        let id = store.create(sample()).unwrap();

        assert_eq!(store.record_attempt(id, "000001").unwrap(), 1);
        assert_eq!(store.record_attempt(id, "000002").unwrap(), 2);

        let record = store.get(id).unwrap();
        assert_eq!(record.confirmation_attempts, 2);
        assert_eq!(record.user_provided_code.as_deref(), Some("000002"));
    }

    #[test]
    fn test_stamp_network_tx() {
        let store = TransferStore::new();
        let id = store.create(sample()).unwrap();

        store
            .stamp_network_tx(id, NetworkTxId::new("NET-1".to_string()))
            .unwrap();
        assert_eq!(
            store.get(id).unwrap().network_tx.unwrap().as_str(),
            "NET-1"
        );
    }

    #[test]
    fn test_find_stale_filters_and_orders() {
        let store = TransferStore::new();
        let fresh = store.create(sample()).unwrap();
        let old = store.create(sample()).unwrap();
        let older = store.create(sample()).unwrap();
        for id in [fresh, old, older] {
            store
                .update_status_if(
                    id,
                    TransferStatus::Pending,
                    TransferStatus::ProcessingReservation,
                )
                .unwrap();
        }
        store.backdate_updated_at(old, 60_000);
        store.backdate_updated_at(older, 120_000);

        let cutoff = chrono::Utc::now().timestamp_millis() - 30_000;
        let stale = store.find_stale(&[TransferStatus::ProcessingReservation], cutoff, 10);
        assert_eq!(stale.len(), 2);
        assert_eq!(stale[0].transfer_id, older); // oldest first
        assert_eq!(stale[1].transfer_id, old);

        // Status filter applies
        let none = store.find_stale(&[TransferStatus::AwaitingConfirmation], cutoff, 10);
        assert!(none.is_empty());

        // Limit applies after ordering
        let capped = store.find_stale(&[TransferStatus::ProcessingReservation], cutoff, 1);
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].transfer_id, older);
    }

    #[test]
    fn test_count_by_status() {
        let store = TransferStore::new();
        let a = store.create(sample()).unwrap();
        let _b = store.create(sample()).unwrap();
        store
            .update_status_if(
                a,
                TransferStatus::Pending,
                TransferStatus::ProcessingReservation,
            )
            .unwrap();

        assert_eq!(store.count_by_status(TransferStatus::Pending), 1);
        assert_eq!(
            store.count_by_status(TransferStatus::ProcessingReservation),
            1
        );
        assert_eq!(store.count_by_status(TransferStatus::Successful), 0);
    }

    #[test]
    fn test_remove_clears_correlation_index() {
        let store = TransferStore::new();
        let record = sample();
        let correlation = record.correlation;
        let id = store.create(record).unwrap();

        let removed = store.remove(id).unwrap();
        assert_eq!(removed.transfer_id, id);
        assert!(store.get(id).is_none());
        assert!(store.get_by_correlation(correlation).is_none());

        // The correlation can be used again after removal
        let mut fresh = sample();
        fresh.correlation = correlation;
        store.create(fresh).unwrap();
    }
}
