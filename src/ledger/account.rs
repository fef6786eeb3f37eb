/// ENFORCED ACCOUNT TYPE - Used by the funds ledger
///
/// This is the SINGLE source of truth for balance operations.
/// ALL balance mutations MUST go through these methods.
///
/// # Enforcement Strategy:
/// 1. Fields are PRIVATE - no direct access
/// 2. All mutations return Result - errors are explicit
/// 3. Version auto-increments - audit trail
/// 4. checked arithmetic - overflow protection
/// 5. Type system prevents bypassing validation
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Funds state for a single phone-keyed account
///
/// # Invariants (ENFORCED by private fields):
/// - balance >= reserved >= 0 at all times
/// - available = balance - reserved (never negative)
/// - Version increments on every mutation
/// - All state changes return Result
///
/// # Usage:
/// ```ignore
/// let mut account = Account::new(Decimal::from(10_000));
/// account.reserve(amount)?;       // available shrinks, balance unchanged
/// account.commit_debit(amount)?;  // balance and reserved both shrink
/// account.release(amount);        // reservation returned, clamped at zero
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    balance: Decimal,  // PRIVATE - ONLY modified through credit/commit_debit
    reserved: Decimal, // PRIVATE - ONLY modified through reserve/release/commit_debit
    version: u64,      // PRIVATE - incremented on every mutation
}

impl Account {
    /// Create an account with an opening balance and nothing reserved
    pub fn new(opening_balance: Decimal) -> Self {
        Self {
            balance: opening_balance,
            reserved: Decimal::ZERO,
            version: 0,
        }
    }

    // ============================================================
    // READ-ONLY GETTERS (safe to expose)
    // ============================================================

    /// Get total balance, reserved portion included (read-only)
    #[inline(always)]
    pub fn balance(&self) -> Decimal {
        self.balance
    }

    /// Get reserved portion (read-only)
    #[inline(always)]
    pub fn reserved(&self) -> Decimal {
        self.reserved
    }

    /// Get spendable balance: balance - reserved
    #[inline(always)]
    pub fn available(&self) -> Decimal {
        self.balance - self.reserved
    }

    /// Get mutation version (read-only)
    #[inline(always)]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Build a plain view for reporting
    pub fn view(&self) -> AccountView {
        AccountView {
            balance: self.balance,
            reserved: self.reserved,
            available: self.available(),
        }
    }

    // ============================================================
    // VALIDATED MUTATIONS (ENFORCED operations)
    // ============================================================

    /// Hold funds for a pending transfer
    ///
    /// # Errors
    /// - "Insufficient available funds" if available < amount
    /// - "Reserve overflow" on arithmetic error
    ///
    /// # Effects
    /// - Increases reserved by amount (balance unchanged)
    pub fn reserve(&mut self, amount: Decimal) -> Result<(), &'static str> {
        if self.available() < amount {
            return Err("Insufficient available funds");
        }
        self.reserved = self
            .reserved
            .checked_add(amount)
            .ok_or("Reserve overflow")?;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// Return a reservation to the spendable balance
    ///
    /// Clamped at zero so redelivered release commands are harmless.
    /// Returns the amount actually released.
    pub fn release(&mut self, amount: Decimal) -> Decimal {
        let released = self.reserved.min(amount);
        self.reserved -= released;
        self.version = self.version.wrapping_add(1);
        released
    }

    /// Spend a reservation: the final debit of a committed transfer
    ///
    /// # Errors
    /// - "Insufficient reserved funds" if reserved < amount
    ///
    /// # Effects
    /// - Decreases reserved AND balance by amount
    pub fn commit_debit(&mut self, amount: Decimal) -> Result<(), &'static str> {
        if self.reserved < amount {
            return Err("Insufficient reserved funds");
        }
        self.reserved = self
            .reserved
            .checked_sub(amount)
            .ok_or("Commit reserved underflow")?;
        self.balance = self
            .balance
            .checked_sub(amount)
            .ok_or("Commit balance underflow")?;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// Receive funds from a committed transfer
    ///
    /// # Errors
    /// - "Credit overflow" on arithmetic error
    pub fn credit(&mut self, amount: Decimal) -> Result<(), &'static str> {
        self.balance = self.balance.checked_add(amount).ok_or("Credit overflow")?;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }
}

/// Immutable balance view for reporting and API snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccountView {
    pub balance: Decimal,
    pub reserved: Decimal,
    pub available: Decimal,
}

impl std::fmt::Display for AccountView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "balance={} reserved={} available={}",
            self.balance, self.reserved, self.available
        )
    }
}

// ============================================================
// TESTS - Prove enforcement works
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_reserve() {
        let mut acc = Account::new(dec("10000.00"));

        acc.reserve(dec("100.00")).unwrap();
        assert_eq!(acc.balance(), dec("10000.00"));
        assert_eq!(acc.reserved(), dec("100.00"));
        assert_eq!(acc.available(), dec("9900.00"));
        assert_eq!(acc.version(), 1);
    }

    #[test]
    fn test_reserve_insufficient() {
        let mut acc = Account::new(dec("25.50"));

        assert!(acc.reserve(dec("100.00")).is_err());
        assert_eq!(acc.balance(), dec("25.50")); // Unchanged
        assert_eq!(acc.reserved(), Decimal::ZERO);
        assert_eq!(acc.version(), 0);
    }

    #[test]
    fn test_reserve_counts_prior_reservations() {
        let mut acc = Account::new(dec("100.00"));
        acc.reserve(dec("80.00")).unwrap();

        // Only 20.00 available, so a second 80.00 hold must fail
        assert!(acc.reserve(dec("80.00")).is_err());
        assert_eq!(acc.reserved(), dec("80.00"));
    }

    #[test]
    fn test_release_clamped() {
        let mut acc = Account::new(dec("1000.00"));
        acc.reserve(dec("100.00")).unwrap();

        assert_eq!(acc.release(dec("100.00")), dec("100.00"));
        assert_eq!(acc.reserved(), Decimal::ZERO);

        // Redelivered release is a no-op, never negative
        assert_eq!(acc.release(dec("100.00")), Decimal::ZERO);
        assert_eq!(acc.reserved(), Decimal::ZERO);
        assert_eq!(acc.available(), dec("1000.00"));
    }

    #[test]
    fn test_commit_debit() {
        let mut acc = Account::new(dec("10000.00"));
        acc.reserve(dec("100.00")).unwrap();

        acc.commit_debit(dec("100.00")).unwrap();
        assert_eq!(acc.balance(), dec("9900.00"));
        assert_eq!(acc.reserved(), Decimal::ZERO);
        assert_eq!(acc.available(), dec("9900.00"));
    }

    #[test]
    fn test_commit_debit_requires_reservation() {
        let mut acc = Account::new(dec("10000.00"));

        assert!(acc.commit_debit(dec("100.00")).is_err());
        assert_eq!(acc.balance(), dec("10000.00")); // Unchanged
    }

    #[test]
    fn test_credit() {
        let mut acc = Account::new(dec("10000.00"));

        acc.credit(dec("100.00")).unwrap();
        assert_eq!(acc.balance(), dec("10100.00"));
        assert_eq!(acc.reserved(), Decimal::ZERO);
    }

    #[test]
    fn test_available_invariant_through_sequence() {
        let mut acc = Account::new(dec("500.00"));

        acc.reserve(dec("200.00")).unwrap();
        acc.release(dec("50.00"));
        acc.reserve(dec("100.00")).unwrap();
        acc.commit_debit(dec("150.00")).unwrap();
        acc.credit(dec("25.00")).unwrap();

        assert!(acc.available() >= Decimal::ZERO);
        assert!(acc.reserved() >= Decimal::ZERO);
        assert_eq!(acc.available(), acc.balance() - acc.reserved());
        assert_eq!(acc.balance(), dec("375.00"));
        assert_eq!(acc.reserved(), dec("100.00"));
    }

    #[test]
    fn test_version_increments() {
        let mut acc = Account::new(dec("100.00"));
        assert_eq!(acc.version(), 0);

        acc.reserve(dec("10.00")).unwrap();
        assert_eq!(acc.version(), 1);

        acc.release(dec("10.00"));
        assert_eq!(acc.version(), 2);

        acc.credit(dec("5.00")).unwrap();
        assert_eq!(acc.version(), 3);
    }

    #[test]
    fn test_view() {
        let mut acc = Account::new(dec("10000.00"));
        acc.reserve(dec("100.00")).unwrap();

        let view = acc.view();
        assert_eq!(view.balance, dec("10000.00"));
        assert_eq!(view.reserved, dec("100.00"));
        assert_eq!(view.available, dec("9900.00"));
    }
}
