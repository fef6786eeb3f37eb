//! Phone-keyed account store.
//!
//! Every account sits behind its own async mutex, so balance mutations
//! for one phone number are fully serialized. The two-account commit
//! locks both parties in key order to stay deadlock free.

use crate::core_types::PhoneKey;
use crate::ledger::account::{Account, AccountView};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

// ============================================================
// ERRORS
// ============================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Sender account not found: {0}")]
    SenderNotFound(String),

    #[error("Sender and recipient must differ")]
    SameAccount,

    /// Account-level rejection (insufficient funds, arithmetic bounds)
    #[error("{0}")]
    Funds(&'static str),
}

// ============================================================
// ACCOUNT STORE
// ============================================================

/// Concurrent map of phone key -> locked [`Account`]
///
/// Accounts are created lazily with the configured seed balance the
/// first time a reserve or credit references them. Release and
/// commit-debit never create the sender side: a settle command for an
/// unknown sender is an anomaly, not a signup path.
pub struct AccountStore {
    accounts: DashMap<PhoneKey, Arc<Mutex<Account>>>,
    seed_balance: Decimal,
}

impl AccountStore {
    pub fn new(seed_balance: Decimal) -> Self {
        Self {
            accounts: DashMap::new(),
            seed_balance,
        }
    }

    /// Create or reset an account with an explicit opening balance
    ///
    /// Seeding hook for demos and tests. Replaces any existing state, so
    /// only call it before traffic starts.
    pub fn open_account(&self, phone: PhoneKey, opening_balance: Decimal) {
        self.accounts
            .insert(phone, Arc::new(Mutex::new(Account::new(opening_balance))));
    }

    /// Get-or-create the lock handle for an account (lazy seeding)
    ///
    /// The map shard guard is dropped before the caller awaits the lock.
    fn handle(&self, phone: &PhoneKey) -> Arc<Mutex<Account>> {
        self.accounts
            .entry(phone.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Account::new(self.seed_balance))))
            .value()
            .clone()
    }

    /// Lock handle without creating
    fn existing(&self, phone: &PhoneKey) -> Option<Arc<Mutex<Account>>> {
        self.accounts.get(phone).map(|entry| entry.value().clone())
    }

    /// Snapshot an account's balances, None if it was never referenced
    pub async fn view(&self, phone: &PhoneKey) -> Option<AccountView> {
        let handle = self.existing(phone)?;
        let account = handle.lock().await;
        Some(account.view())
    }

    /// Hold funds on the sender account (created with the seed balance
    /// if absent)
    pub async fn reserve(&self, phone: &PhoneKey, amount: Decimal) -> Result<(), LedgerError> {
        let handle = self.handle(phone);
        let mut account = handle.lock().await;
        account.reserve(amount).map_err(LedgerError::Funds)
    }

    /// Return (part of) a reservation, clamped at zero
    ///
    /// Missing accounts are a no-op so redelivered release commands stay
    /// harmless. Returns the amount actually released.
    pub async fn release(&self, phone: &PhoneKey, amount: Decimal) -> Decimal {
        let Some(handle) = self.existing(phone) else {
            return Decimal::ZERO;
        };
        let mut account = handle.lock().await;
        account.release(amount)
    }

    /// Move a reserved amount from sender to recipient
    ///
    /// Every precondition is checked before either account mutates. A
    /// failure moves no funds and leaves the sender's reservation
    /// intact for a later release or operator repair.
    pub async fn commit_transfer(
        &self,
        sender: &PhoneKey,
        recipient: &PhoneKey,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        if sender == recipient {
            return Err(LedgerError::SameAccount);
        }
        let sender_handle = self
            .existing(sender)
            .ok_or_else(|| LedgerError::SenderNotFound(sender.to_string()))?;
        let recipient_handle = self.handle(recipient);

        // Key-ordered locking: whichever phone sorts first locks first
        let (first, second, sender_first) = if sender < recipient {
            (sender_handle, recipient_handle, true)
        } else {
            (recipient_handle, sender_handle, false)
        };
        let mut first_guard = first.lock().await;
        let mut second_guard = second.lock().await;
        let (sender_account, recipient_account) = if sender_first {
            (&mut *first_guard, &mut *second_guard)
        } else {
            (&mut *second_guard, &mut *first_guard)
        };

        if sender_account.reserved() < amount {
            return Err(LedgerError::Funds("Insufficient reserved funds"));
        }
        if recipient_account.balance().checked_add(amount).is_none() {
            return Err(LedgerError::Funds("Credit overflow"));
        }

        sender_account
            .commit_debit(amount)
            .map_err(LedgerError::Funds)?;
        recipient_account.credit(amount).map_err(LedgerError::Funds)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
