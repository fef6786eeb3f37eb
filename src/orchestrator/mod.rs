//! Transfer Saga FSM
//!
//! Coordinates a money transfer across the ledger, the payment network
//! and the notification rail via correlated messages.
//!
//! # State Machine
//!
//! ```text
//! PENDING → PROCESSING_RESERVATION → AWAITING_CONFIRMATION → PROCESSING_FUNDS → PROCESSING_RECEIPT → SUCCESSFUL
//!                    ↓                     ↓         ↓               ↓                  ↓
//!            RESERVATION_FAILED   CONFIRMATION_   TIMEOUT   FUNDS_TRANSFER_      RECEIPT_ERROR
//!             (or FAILED)            FAILED                     FAILED
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Dispatch-Before-Flip**: The load-bearing command goes on the bus
//!    before the status CAS. A failed dispatch leaves the record where
//!    it was, so the caller or the sweep retries the whole unit.
//! 2. **Correlation Lock**: Every read-check-write unit for one saga
//!    runs under that saga's lock. Status flips inside a unit cannot
//!    lose races.
//! 3. **Legal Edges Only**: `TransferStatus::can_transition_to` is the
//!    single edge table. The store rejects any update off that table.
//! 4. **Terminal Means Terminal**: Late or duplicate outcomes against a
//!    settled transfer are logged and discarded, never replayed.

pub mod error;
pub mod service;
pub mod state;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use error::{ErrorKind, TransferError};
pub use service::{CorrelationLocks, TransferService};
pub use state::TransferStatus;
pub use store::TransferStore;
pub use types::{ConfirmReply, InitiateRequest, Transfer, TransferSnapshot};
