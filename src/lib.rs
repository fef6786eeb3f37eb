//! Payrail - Money Transfer Saga Pipeline
//!
//! An in-process transfer rail built as a correlated message saga,
//! step by step.
//!
//! # Modules
//!
//! - [`core_types`] - Core type definitions (TransferId, PhoneKey, etc.)
//! - [`config`] - YAML application configuration
//! - [`logging`] - Tracing initialization with file rotation
//! - [`messages`] - Channel names, payloads and envelopes
//! - [`transport`] - Bounded in-process queues with redelivery
//! - [`ledger`] - Funds ledger (reserve / release / commit)
//! - [`orchestrator`] - Transfer saga FSM and caller API
//! - [`adapters`] - Payment network, receipts, notification rail
//! - [`sweep`] - Reconciliation sweep for stale transfers
//! - [`runner`] - Whole-application wiring

// Core types - must be first!
pub mod core_types;

// Ambient concerns
pub mod config;
pub mod logging;

// Messaging backbone
pub mod messages;
pub mod transport;

// Saga components
pub mod adapters;
pub mod ledger;
pub mod orchestrator;
pub mod sweep;

// Wiring
pub mod runner;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use core_types::{BankId, CorrelationId, NetworkTxId, PhoneKey, TransferId};
pub use ledger::{AccountStore, AccountView, LedgerService};
pub use messages::{Envelope, FundsOutcome, Message, MessageKind};
pub use orchestrator::{
    ConfirmReply, InitiateRequest, TransferError, TransferService, TransferSnapshot,
    TransferStatus, TransferStore,
};
pub use runner::{App, Collaborators, SagaStats, SagaStatsSnapshot};
pub use sweep::{ReconciliationSweep, SweepConfig, SweepReport};
pub use transport::{ChannelPump, HandlerRegistry, MessageBus, MessageHandler, ShutdownSignal};
