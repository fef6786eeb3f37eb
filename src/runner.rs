//! Application Runner
//!
//! Wires the bus, stores, services, channel pumps and the
//! reconciliation sweep into one running saga application.
//!
//! # Handler Topology
//!
//! ```text
//! reserve-funds-cmd ───┐
//! release-or-commit ───┴─► LedgerService
//! funds-outcome-evt ───┐
//! code-sent-evt ───────┴─► TransferService (orchestrator)
//! send-code-cmd ───────┐
//! send-success-cmd ────┼─► NotificationService
//! send-failure-cmd ────┘
//! ```
//!
//! Each channel gets exactly one pump, so envelopes on one queue are
//! handled strictly in order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::adapters::notification::{NotificationService, NotificationSink};
use crate::adapters::payment_network::PaymentNetwork;
use crate::adapters::receipts::ReceiptEmitter;
use crate::config::AppConfig;
use crate::core_types::{CorrelationId, PhoneKey, TransferId};
use crate::ledger::{AccountStore, AccountView, LedgerService};
use crate::messages::{MessageKind, channels};
use crate::orchestrator::{
    ConfirmReply, CorrelationLocks, InitiateRequest, TransferError, TransferService,
    TransferSnapshot, TransferStore,
};
use crate::sweep::{ReconciliationSweep, SweepConfig};
use crate::transport::{
    ChannelPump, DeadLetter, HandlerRegistry, MessageBus, ShutdownSignal, TransportConfig,
};

// ============================================================
// SAGA STATISTICS
// ============================================================

/// Statistics for saga execution
#[derive(Debug, Default)]
pub struct SagaStats {
    /// Transfers accepted and dispatched
    pub initiated: AtomicU64,
    /// Confirmation codes accepted
    pub confirmed: AtomicU64,
    /// Transfers settled SUCCESSFUL
    pub succeeded: AtomicU64,
    /// Transfers ended on a failure edge with no funds moved
    pub failed: AtomicU64,
    /// Transfers settled RECEIPT_ERROR (funds moved, paperwork pending)
    pub receipt_errors: AtomicU64,
    /// Sweep interventions (timeouts plus forced flips)
    pub swept: AtomicU64,
}

impl SagaStats {
    pub fn incr_initiated(&self) {
        self.initiated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_confirmed(&self) {
        self.confirmed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_receipt_errors(&self) {
        self.receipt_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_swept(&self) {
        self.swept.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats
    pub fn snapshot(&self) -> SagaStatsSnapshot {
        SagaStatsSnapshot {
            initiated: self.initiated.load(Ordering::Relaxed),
            confirmed: self.confirmed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            receipt_errors: self.receipt_errors.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of stats (for reporting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SagaStatsSnapshot {
    pub initiated: u64,
    pub confirmed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub receipt_errors: u64,
    pub swept: u64,
}

impl std::fmt::Display for SagaStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Saga Stats: initiated={}, confirmed={}, succeeded={}, failed={}, receipt_errors={}, swept={}",
            self.initiated,
            self.confirmed,
            self.succeeded,
            self.failed,
            self.receipt_errors,
            self.swept
        )
    }
}

// ============================================================
// COLLABORATORS
// ============================================================

/// External collaborators the saga talks to
pub struct Collaborators {
    pub network: Arc<dyn PaymentNetwork>,
    pub receipts: Arc<dyn ReceiptEmitter>,
    pub sink: Arc<dyn NotificationSink>,
}

#[cfg(any(test, feature = "mock-collaborators"))]
impl Collaborators {
    /// Mocked collaborators plus typed handles for driving them
    pub fn mocked() -> (
        Self,
        Arc<crate::adapters::MockPaymentNetwork>,
        Arc<crate::adapters::MockReceipts>,
        Arc<crate::adapters::RecordingSink>,
    ) {
        let network = Arc::new(crate::adapters::MockPaymentNetwork::new());
        let receipts = Arc::new(crate::adapters::MockReceipts::new());
        let sink = Arc::new(crate::adapters::RecordingSink::new());
        let collaborators = Self {
            network: network.clone(),
            receipts: receipts.clone(),
            sink: sink.clone(),
        };
        (collaborators, network, receipts, sink)
    }
}

// ============================================================
// APPLICATION
// ============================================================

/// A fully wired saga application
///
/// Owns the bus, both stores, one pump per channel and the
/// reconciliation sweep. Dropping it without calling [`App::shutdown`]
/// detaches the background tasks.
pub struct App {
    bus: Arc<MessageBus>,
    accounts: Arc<AccountStore>,
    transfers: Arc<TransferStore>,
    orchestrator: Arc<TransferService>,
    stats: Arc<SagaStats>,
    shutdown: Arc<ShutdownSignal>,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Wire everything and spawn the pumps and the sweep
    ///
    /// Must run inside a tokio runtime.
    pub fn start(config: AppConfig, collaborators: Collaborators) -> Self {
        let transport = TransportConfig {
            queue_capacity: config.transport.queue_capacity,
            max_delivery_attempts: config.transport.max_delivery_attempts,
            redelivery_backoff: Duration::from_millis(config.transport.redelivery_backoff_ms),
        };
        let bus = Arc::new(MessageBus::new(transport));
        let shutdown = Arc::new(ShutdownSignal::new());
        let stats = Arc::new(SagaStats::default());

        let accounts = Arc::new(AccountStore::new(config.ledger.seed_balance));
        let transfers = Arc::new(TransferStore::new());
        let locks = Arc::new(CorrelationLocks::new());

        let ledger = Arc::new(LedgerService::new(accounts.clone(), bus.clone()));
        let orchestrator = Arc::new(TransferService::new(
            transfers.clone(),
            locks,
            bus.clone(),
            collaborators.network,
            collaborators.receipts,
            config.saga.clone(),
            stats.clone(),
        ));
        let notifications = Arc::new(NotificationService::new(collaborators.sink, bus.clone()));

        let mut registry = HandlerRegistry::new();
        registry.register(MessageKind::ReserveFunds, ledger.clone());
        registry.register(MessageKind::ReleaseOrCommit, ledger);
        registry.register(MessageKind::FundsOutcome, orchestrator.clone());
        registry.register(MessageKind::CodeSent, orchestrator.clone());
        registry.register(MessageKind::SendCode, notifications.clone());
        registry.register(MessageKind::SendSuccess, notifications.clone());
        registry.register(MessageKind::SendFailure, notifications);
        let registry = Arc::new(registry);

        let mut tasks = Vec::with_capacity(channels::ALL.len() + 1);
        for channel in channels::ALL {
            // Receivers exist until claimed, and start() owns a fresh bus
            let pump = ChannelPump::claim(channel, bus.clone(), registry.clone(), shutdown.clone())
                .expect("each channel is claimed exactly once at startup");
            tasks.push(tokio::spawn(pump.run()));
        }

        let sweep = ReconciliationSweep::new(
            orchestrator.clone(),
            SweepConfig {
                scan_interval: config.sweep.scan_interval(),
                confirmation_timeout: config.saga.confirmation_timeout(),
                processing_timeout: config.saga.processing_timeout(),
                batch_size: config.sweep.batch_size,
            },
        );
        let sweep_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            sweep.run(sweep_shutdown).await;
        }));

        info!(
            channels = channels::ALL.len(),
            seed_balance = %config.ledger.seed_balance,
            "Saga application started"
        );

        Self {
            bus,
            accounts,
            transfers,
            orchestrator,
            stats,
            shutdown,
            tasks,
        }
    }

    // ============================================================
    // CALLER API
    // ============================================================

    pub async fn initiate(
        &self,
        correlation: CorrelationId,
        sender: PhoneKey,
        request: InitiateRequest,
    ) -> Result<TransferSnapshot, TransferError> {
        self.orchestrator.initiate(correlation, sender, request).await
    }

    pub async fn confirm(
        &self,
        transfer_id: TransferId,
        code: &str,
        caller: &PhoneKey,
    ) -> Result<ConfirmReply, TransferError> {
        self.orchestrator.confirm(transfer_id, code, caller).await
    }

    pub fn get_status(&self, transfer_id: TransferId) -> Result<TransferSnapshot, TransferError> {
        self.orchestrator.get_status(transfer_id)
    }

    /// Open (or reset) an account at an explicit balance
    pub fn open_account(&self, phone: PhoneKey, balance: Decimal) {
        self.accounts.open_account(phone, balance);
    }

    pub async fn balance(&self, phone: &PhoneKey) -> Option<AccountView> {
        self.accounts.view(phone).await
    }

    // ============================================================
    // INTROSPECTION
    // ============================================================

    pub fn stats(&self) -> SagaStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.bus.dead_letters()
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn accounts(&self) -> &Arc<AccountStore> {
        &self.accounts
    }

    pub fn transfers(&self) -> &Arc<TransferStore> {
        &self.transfers
    }

    /// Stop the pumps and the sweep, then wait for them to finish
    pub async fn shutdown(self) {
        self.shutdown.request_shutdown();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task aborted");
            }
        }
        info!("Saga application stopped: {}", self.stats.snapshot());
    }
}
