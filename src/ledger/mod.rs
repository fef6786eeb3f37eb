//! Funds Ledger
//!
//! Exclusive owner of account state. The ledger consumes commands from
//! the transport and reports a `FundsOutcome` event for each one;
//! nothing else in the crate touches a balance directly.
//!
//! # Two-Phase Settlement
//!
//! ```text
//! reserve:  available shrinks, balance intact
//!     ├─ release (final_debit = false): hold returned, clamped at zero
//!     └─ commit  (final_debit = true):  balance moves to the recipient
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Per-Account Exclusivity**: one async mutex per phone key, every
//!    mutation serialized
//! 2. **Available Never Negative**: `available = balance - reserved >= 0`
//! 3. **Idempotency**: replayed commands re-publish the original outcome
//!    without re-applying the write

pub mod account;
pub mod service;
pub mod store;

// Re-exports for convenience
pub use account::{Account, AccountView};
pub use service::LedgerService;
pub use store::{AccountStore, LedgerError};
