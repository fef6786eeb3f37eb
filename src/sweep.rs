//! Reconciliation Sweep
//!
//! Background task that scans for transfers the message flow left
//! behind: confirmations nobody answered and sagas stuck in a
//! processing state.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::orchestrator::TransferService;
use crate::orchestrator::state::TransferStatus;
use crate::transport::ShutdownSignal;

/// Configuration for the reconciliation sweep
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How often to scan the transfer store
    pub scan_interval: Duration,
    /// How long a transfer may sit in AWAITING_CONFIRMATION
    pub confirmation_timeout: Duration,
    /// How long a transfer may sit in any PROCESSING_* state
    pub processing_timeout: Duration,
    /// Maximum transfers to act on per pass, per category
    pub batch_size: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            confirmation_timeout: Duration::from_secs(900),
            processing_timeout: Duration::from_secs(300),
            batch_size: 100,
        }
    }
}

/// What one sweep pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Transfers timed out of AWAITING_CONFIRMATION
    pub timed_out: usize,
    /// Transfers forced off a stuck PROCESSING_* state
    pub forced: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.timed_out + self.forced
    }
}

/// Reconciliation Sweep
///
/// Periodically walks the transfer store oldest-first and hands stale
/// records to the orchestrator, which re-checks each one under its
/// correlation lock before acting. The sweep itself never mutates a
/// transfer.
pub struct ReconciliationSweep {
    service: Arc<TransferService>,
    config: SweepConfig,
}

impl ReconciliationSweep {
    pub fn new(service: Arc<TransferService>, config: SweepConfig) -> Self {
        Self { service, config }
    }

    /// Run the sweep loop until shutdown
    pub async fn run(&self, shutdown: Arc<ShutdownSignal>) {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            confirmation_timeout_secs = self.config.confirmation_timeout.as_secs(),
            processing_timeout_secs = self.config.processing_timeout.as_secs(),
            "Starting reconciliation sweep"
        );

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("Reconciliation sweep stopped");
                    return;
                }
                _ = tokio::time::sleep(self.config.scan_interval) => {}
            }

            let report = self.run_once().await;
            if report.total() > 0 {
                info!(
                    timed_out = report.timed_out,
                    forced = report.forced,
                    "Sweep pass reconciled transfers"
                );
            }
        }
    }

    /// Run a single scan over both staleness categories
    pub async fn run_once(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = chrono::Utc::now().timestamp_millis();

        // Pass 1: confirmations nobody answered. These still hold
        // reserved funds, so expiry releases the hold.
        let cutoff = now - self.config.confirmation_timeout.as_millis() as i64;
        let stale = self.service.store().find_stale(
            &[TransferStatus::AwaitingConfirmation],
            cutoff,
            self.config.batch_size,
        );
        if !stale.is_empty() {
            debug!(count = stale.len(), "Found transfers past the confirmation deadline");
        }
        for record in stale {
            match self
                .service
                .expire_confirmation(record.transfer_id, cutoff)
                .await
            {
                Ok(true) => report.timed_out += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(transfer_id = %record.transfer_id, error = %e,
                        "Confirmation expiry failed");
                }
            }
        }

        // Pass 2: sagas stuck mid-processing. An outcome or a pump is
        // missing, so force the failure edge and flag the operator.
        let cutoff = now - self.config.processing_timeout.as_millis() as i64;
        let stale = self.service.store().find_stale(
            &[
                TransferStatus::ProcessingReservation,
                TransferStatus::ProcessingFunds,
                TransferStatus::ProcessingReceipt,
            ],
            cutoff,
            self.config.batch_size,
        );
        if !stale.is_empty() {
            warn!(count = stale.len(), "Found transfers stuck in a processing state");
        }
        for record in stale {
            match self.service.force_stale(record.transfer_id, cutoff).await {
                Ok(true) => report.forced += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(transfer_id = %record.transfer_id, error = %e,
                        "Forced failure flip failed");
                }
            }
        }

        report
    }
}
