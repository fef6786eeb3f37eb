//! End-to-end saga flows against a fully wired application
//!
//! Each test starts a real [`App`]: bounded channels, one pump per
//! channel, the ledger, the orchestrator and the reconciliation sweep,
//! with mock collaborators standing in for the outside world.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use payrail::adapters::{MockPaymentNetwork, MockReceipts, RecordingSink};
use payrail::config::AppConfig;
use payrail::core_types::{CorrelationId, PhoneKey, TransferId};
use payrail::ledger::AccountView;
use payrail::messages::{FundsOutcome, Message, channels};
use payrail::orchestrator::{InitiateRequest, TransferError, TransferStatus};
use payrail::runner::{App, Collaborators};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn phone(s: &str) -> PhoneKey {
    PhoneKey::parse(s).unwrap()
}

/// A wired app plus typed handles into its mock collaborators
struct Harness {
    app: App,
    network: Arc<MockPaymentNetwork>,
    receipts: Arc<MockReceipts>,
    sink: Arc<RecordingSink>,
    alice: PhoneKey,
    bob: PhoneKey,
}

impl Harness {
    fn start(config: AppConfig) -> Self {
        let (collaborators, network, receipts, sink) = Collaborators::mocked();
        let app = App::start(config, collaborators);
        let harness = Self {
            app,
            network,
            receipts,
            sink,
            alice: phone("5511999990001"),
            bob: phone("5511999990002"),
        };
        // Alice funded explicitly; Bob left to the lazy seed
        harness.app.open_account(harness.alice.clone(), dec("10000.00"));
        harness
    }

    fn with_defaults() -> Self {
        Self::start(AppConfig::default())
    }

    async fn initiate(&self, amount: &str) -> (TransferId, CorrelationId) {
        let correlation = CorrelationId::new();
        let snapshot = self
            .app
            .initiate(
                correlation,
                self.alice.clone(),
                InitiateRequest::new("5511999990002", "341", dec(amount)),
            )
            .await
            .unwrap();
        (snapshot.transfer_id, correlation)
    }

    async fn wait_for_status(&self, transfer_id: TransferId, want: TransferStatus) {
        let start = tokio::time::Instant::now();
        loop {
            let status = self.app.get_status(transfer_id).unwrap().status;
            if status == want {
                return;
            }
            assert!(
                !(status.is_terminal() || start.elapsed() > Duration::from_secs(5)),
                "waiting for {want}, transfer stuck at {status}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn wait_for_code(&self) -> String {
        let start = tokio::time::Instant::now();
        loop {
            if let Some(code) = self.sink.last_code_for(&self.alice) {
                return code;
            }
            assert!(
                start.elapsed() < Duration::from_secs(5),
                "confirmation code never delivered"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn wait_for_ledger(&self, account: &PhoneKey, pred: impl Fn(&AccountView) -> bool) {
        let start = tokio::time::Instant::now();
        loop {
            if let Some(view) = self.app.balance(account).await {
                if pred(&view) {
                    return;
                }
            }
            assert!(
                start.elapsed() < Duration::from_secs(5),
                "ledger never reached the expected view for {account}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Drive a transfer through reservation and code delivery
    async fn awaiting_transfer(&self, amount: &str) -> (TransferId, CorrelationId, String) {
        let (transfer_id, correlation) = self.initiate(amount).await;
        self.wait_for_status(transfer_id, TransferStatus::AwaitingConfirmation)
            .await;
        let code = self.wait_for_code().await;
        (transfer_id, correlation, code)
    }
}

async fn wait_until(what: &str, pred: impl Fn() -> bool) {
    let start = tokio::time::Instant::now();
    while !pred() {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_happy_path_moves_funds_and_issues_receipt() {
    let harness = Harness::with_defaults();

    let (transfer_id, _, code) = harness.awaiting_transfer("100.00").await;

    // Hold in place while the code is outstanding
    let view = harness.app.balance(&harness.alice).await.unwrap();
    assert_eq!(view.balance, dec("10000.00"));
    assert_eq!(view.reserved, dec("100.00"));
    assert_eq!(view.available, dec("9900.00"));

    let reply = harness
        .app
        .confirm(transfer_id, &code, &harness.alice)
        .await
        .unwrap();
    assert_eq!(reply.status, TransferStatus::ProcessingFunds);

    harness
        .wait_for_status(transfer_id, TransferStatus::Successful)
        .await;

    // Sender debited, hold gone
    let view = harness.app.balance(&harness.alice).await.unwrap();
    assert_eq!(view.balance, dec("9900.00"));
    assert_eq!(view.reserved, dec("0"));

    // Recipient was lazily seeded, then credited
    let view = harness.app.balance(&harness.bob).await.unwrap();
    assert_eq!(view.balance, dec("10100.00"));

    // Receipt carries the registered network leg
    let snapshot = harness.app.get_status(transfer_id).unwrap();
    let receipts = harness.receipts.receipts();
    assert_eq!(receipts.len(), 1);
    assert_eq!(snapshot.network_tx, Some(receipts[0].network_tx.clone()));
    assert_eq!(receipts[0].amount, dec("100.00"));
    assert_eq!(harness.network.register_count(), 1);

    let sink = harness.sink.clone();
    wait_until("success notice", move || sink.success_count() == 1).await;

    let stats = harness.app.stats();
    assert_eq!(stats.initiated, 1);
    assert_eq!(stats.confirmed, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 0);
    assert!(harness.app.dead_letters().is_empty());

    harness.app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_initiate_is_idempotent_per_correlation() {
    let harness = Harness::with_defaults();

    let (transfer_id, correlation, _) = harness.awaiting_transfer("100.00").await;

    // The retried request joins the same saga
    let replay = harness
        .app
        .initiate(
            correlation,
            harness.alice.clone(),
            InitiateRequest::new("5511999990002", "341", dec("100.00")),
        )
        .await
        .unwrap();
    assert_eq!(replay.transfer_id, transfer_id);

    // And the hold was taken exactly once
    tokio::time::sleep(Duration::from_millis(100)).await;
    let view = harness.app.balance(&harness.alice).await.unwrap();
    assert_eq!(view.reserved, dec("100.00"));
    assert_eq!(harness.app.stats().initiated, 1);

    harness.app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_insufficient_funds_fails_reservation() {
    let harness = Harness::with_defaults();
    harness.app.open_account(harness.alice.clone(), dec("25.50"));

    let (transfer_id, _) = harness.initiate("100.00").await;
    harness
        .wait_for_status(transfer_id, TransferStatus::ReservationFailed)
        .await;

    let snapshot = harness.app.get_status(transfer_id).unwrap();
    assert_eq!(
        snapshot.failure_reason.as_deref(),
        Some("Insufficient available funds")
    );

    // Ledger untouched, recipient never created
    let view = harness.app.balance(&harness.alice).await.unwrap();
    assert_eq!(view.balance, dec("25.50"));
    assert_eq!(view.reserved, dec("0"));
    assert!(harness.app.balance(&harness.bob).await.is_none());

    let sink = harness.sink.clone();
    wait_until("failure notice", move || sink.failure_count() == 1).await;
    assert_eq!(harness.app.stats().failed, 1);

    harness.app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wrong_code_exhaustion_releases_hold() {
    let harness = Harness::with_defaults();

    let (transfer_id, _, code) = harness.awaiting_transfer("100.00").await;
    let wrong = if code == "000000" { "000001" } else { "000000" };

    // Two misses leave the transfer open
    let reply = harness
        .app
        .confirm(transfer_id, wrong, &harness.alice)
        .await
        .unwrap();
    assert_eq!(reply.status, TransferStatus::AwaitingConfirmation);
    assert!(reply.message.contains("2 attempt(s) remaining"));
    let reply = harness
        .app
        .confirm(transfer_id, wrong, &harness.alice)
        .await
        .unwrap();
    assert!(reply.message.contains("1 attempt(s) remaining"));

    // The third closes it and compensates
    let reply = harness
        .app
        .confirm(transfer_id, wrong, &harness.alice)
        .await
        .unwrap();
    assert_eq!(reply.status, TransferStatus::ConfirmationFailed);

    harness
        .wait_for_ledger(&harness.alice, |view| {
            view.reserved == dec("0") && view.balance == dec("10000.00")
        })
        .await;
    assert!(harness.app.balance(&harness.bob).await.is_none());

    let sink = harness.sink.clone();
    wait_until("failure notice", move || sink.failure_count() == 1).await;
    assert_eq!(harness.app.stats().failed, 1);

    harness.app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_confirmation_timeout_swept_and_released() {
    let mut config = AppConfig::default();
    config.saga.confirmation_timeout_secs = 1;
    config.sweep.scan_interval_secs = 1;
    let harness = Harness::start(config);

    let (transfer_id, _, _code) = harness.awaiting_transfer("100.00").await;

    // Nobody echoes the code; the sweep must time the saga out
    harness
        .wait_for_status(transfer_id, TransferStatus::Timeout)
        .await;
    let snapshot = harness.app.get_status(transfer_id).unwrap();
    assert_eq!(
        snapshot.failure_reason.as_deref(),
        Some("Confirmation deadline exceeded")
    );

    harness
        .wait_for_ledger(&harness.alice, |view| {
            view.reserved == dec("0") && view.balance == dec("10000.00")
        })
        .await;
    assert!(harness.app.balance(&harness.bob).await.is_none());

    let stats = harness.app.stats();
    assert_eq!(stats.swept, 1);
    assert_eq!(stats.failed, 1);

    harness.app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_receipt_outage_degrades_without_losing_funds() {
    let harness = Harness::with_defaults();
    harness.receipts.set_fail_emit(true);

    let (transfer_id, _, code) = harness.awaiting_transfer("100.00").await;
    harness
        .app
        .confirm(transfer_id, &code, &harness.alice)
        .await
        .unwrap();

    harness
        .wait_for_status(transfer_id, TransferStatus::ReceiptError)
        .await;
    let snapshot = harness.app.get_status(transfer_id).unwrap();
    assert!(snapshot.failure_reason.unwrap().contains("Receipt emission"));

    // Funds moved even though the paperwork did not
    let view = harness.app.balance(&harness.alice).await.unwrap();
    assert_eq!(view.balance, dec("9900.00"));
    assert_eq!(view.reserved, dec("0"));
    let view = harness.app.balance(&harness.bob).await.unwrap();
    assert_eq!(view.balance, dec("10100.00"));
    assert_eq!(harness.network.register_count(), 1);

    // So the sender still hears success
    let sink = harness.sink.clone();
    wait_until("success notice", move || sink.success_count() == 1).await;
    assert_eq!(harness.app.stats().receipt_errors, 1);

    harness.app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_forged_outcome_after_settlement_is_ignored() {
    let harness = Harness::with_defaults();

    let (transfer_id, correlation, code) = harness.awaiting_transfer("100.00").await;
    harness
        .app
        .confirm(transfer_id, &code, &harness.alice)
        .await
        .unwrap();
    harness
        .wait_for_status(transfer_id, TransferStatus::Successful)
        .await;

    // A duplicate (or forged) failure outcome lands after settlement
    harness
        .app
        .bus()
        .publish(
            correlation,
            &Message::FundsOutcome {
                sender: harness.alice.clone(),
                recipient: Some(harness.bob.clone()),
                amount: dec("100.00"),
                outcome: FundsOutcome::Failed {
                    reason: "forged".to_string(),
                },
            },
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let snapshot = harness.app.get_status(transfer_id).unwrap();
    assert_eq!(snapshot.status, TransferStatus::Successful);
    assert!(snapshot.failure_reason.is_none());
    let view = harness.app.balance(&harness.bob).await.unwrap();
    assert_eq!(view.balance, dec("10100.00"));

    harness.app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_initiate_rejections_leave_no_trace() {
    let harness = Harness::with_defaults();

    let err = harness
        .app
        .initiate(
            CorrelationId::new(),
            harness.alice.clone(),
            InitiateRequest::new("5511999990002", "999", dec("10.00")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::UnsupportedBank(_)));

    let err = harness
        .app
        .initiate(
            CorrelationId::new(),
            harness.alice.clone(),
            InitiateRequest::new("5511999990002", "341", dec("-10.00")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Validation(_)));

    let err = harness
        .app
        .initiate(
            CorrelationId::new(),
            harness.alice.clone(),
            InitiateRequest::new("5511999990001", "341", dec("10.00")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::SameAccount));

    assert_eq!(harness.app.stats().initiated, 0);
    assert!(harness.app.transfers().is_empty());

    harness.app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_notification_outage_dead_letters_but_saga_survives() {
    let mut config = AppConfig::default();
    config.transport.redelivery_backoff_ms = 10;
    let harness = Harness::start(config);
    harness.sink.set_fail_delivery(true);

    // Reservation succeeds; only the code delivery keeps failing
    let (transfer_id, _) = harness.initiate("100.00").await;
    harness
        .wait_for_status(transfer_id, TransferStatus::AwaitingConfirmation)
        .await;

    let app = &harness.app;
    wait_until("send-code dead letter", || !app.dead_letters().is_empty()).await;
    let dead = harness.app.dead_letters();
    assert_eq!(dead[0].channel, channels::SEND_CODE_CMD);

    // The rail heals; the sender asks support for the code and settles
    harness.sink.set_fail_delivery(false);
    let code = harness
        .app
        .transfers()
        .get(transfer_id)
        .unwrap()
        .confirmation_code;
    harness
        .app
        .confirm(transfer_id, &code, &harness.alice)
        .await
        .unwrap();
    harness
        .wait_for_status(transfer_id, TransferStatus::Successful)
        .await;

    harness.app.shutdown().await;
}
