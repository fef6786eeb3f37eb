//! Payrail - Money Transfer Saga
//!
//! Demo entry point. Architecture:
//!
//! ```text
//! ┌──────────┐    ┌─────────────┐    ┌──────────┐    ┌──────────┐
//! │  Caller  │───▶│ Orchestrator│◀──▶│  Ledger  │    │ Notices  │
//! │  (API)   │    │   (FSM)     │    │(reserve/ │    │ (codes,  │
//! └──────────┘    └─────────────┘    │ commit)  │    │ results) │
//!                       ▲            └──────────┘    └──────────┘
//!                       │                  ▲               ▲
//!                       └──── correlated envelopes ────────┘
//! ```
//!
//! Runs one transfer end to end against mock collaborators: seed two
//! accounts, initiate, echo the confirmation code (one wrong try
//! first), then print ledger balances and saga statistics.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use payrail::config::AppConfig;
use payrail::core_types::{CorrelationId, PhoneKey, TransferId};
use payrail::orchestrator::{InitiateRequest, TransferStatus};
use payrail::runner::{App, Collaborators};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Poll until the transfer reaches `want`, a different terminal state,
/// or the deadline
async fn wait_for_status(
    app: &App,
    transfer_id: TransferId,
    want: TransferStatus,
    deadline: Duration,
) -> TransferStatus {
    let start = tokio::time::Instant::now();
    loop {
        if let Ok(snapshot) = app.get_status(transfer_id) {
            if snapshot.status == want || snapshot.status.is_terminal() {
                return snapshot.status;
            }
        }
        if start.elapsed() > deadline {
            return app
                .get_status(transfer_id)
                .map(|s| s.status)
                .unwrap_or(TransferStatus::Failed);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _log_guard = payrail::logging::init_logging(&config);

    println!("=== Payrail Transfer Saga (build {}) ===", env!("GIT_HASH"));
    tracing::info!("Starting payrail in {} env", env);

    let (collaborators, _network, receipts, sink) = Collaborators::mocked();
    let app = App::start(config, collaborators);

    let alice = PhoneKey::parse("5511999990001").expect("demo sender phone");
    let bob = PhoneKey::parse("5511999990002").expect("demo recipient phone");
    app.open_account(alice.clone(), Decimal::from_str("500.00")?);
    app.open_account(bob.clone(), Decimal::from_str("250.00")?);

    // 1. Initiate
    let correlation = CorrelationId::new();
    let snapshot = app
        .initiate(
            correlation,
            alice.clone(),
            InitiateRequest::new("5511999990002", "341", Decimal::from_str("125.50")?),
        )
        .await?;
    println!(
        "Initiated {} -> {} for {} via {} [{}]",
        alice, bob, snapshot.amount, snapshot.recipient_bank_name, snapshot.status
    );

    // 2. Wait for the hold and the delivered code
    let status = wait_for_status(
        &app,
        snapshot.transfer_id,
        TransferStatus::AwaitingConfirmation,
        Duration::from_secs(2),
    )
    .await;
    anyhow::ensure!(
        status == TransferStatus::AwaitingConfirmation,
        "transfer never reached AWAITING_CONFIRMATION: {status}"
    );
    let code = {
        let mut tries = 0;
        loop {
            if let Some(code) = sink.last_code_for(&alice) {
                break code;
            }
            tries += 1;
            anyhow::ensure!(tries < 200, "confirmation code never arrived");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    println!("Confirmation code delivered to {}: {}", alice, code);

    // 3. One wrong echo, then the real one
    let wrong = if code == "000000" { "000001" } else { "000000" };
    let reply = app.confirm(snapshot.transfer_id, wrong, &alice).await?;
    println!("Wrong code echoed: {}", reply.message);
    let reply = app.confirm(snapshot.transfer_id, &code, &alice).await?;
    println!("Right code echoed: {}", reply.message);

    // 4. Settle
    let status = wait_for_status(
        &app,
        snapshot.transfer_id,
        TransferStatus::Successful,
        Duration::from_secs(2),
    )
    .await;
    println!("Final status: {}", status);

    println!("=== Ledger ===");
    if let Some(view) = app.balance(&alice).await {
        println!("{}: {}", alice, view);
    }
    if let Some(view) = app.balance(&bob).await {
        println!("{}: {}", bob, view);
    }
    for receipt in receipts.receipts() {
        println!(
            "Receipt {} for {} ({} -> {})",
            receipt.network_tx.as_str(),
            receipt.amount,
            receipt.sender,
            receipt.recipient
        );
    }

    let dead = app.dead_letters();
    if !dead.is_empty() {
        println!("Dead letters: {}", dead.len());
    }
    println!("{}", app.stats());

    app.shutdown().await;
    Ok(())
}
