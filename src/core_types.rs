//! Core identity types used throughout the system
//!
//! Newtypes over raw strings and ids so the compiler keeps phone keys,
//! bank codes and correlation ids from being mixed up across module
//! boundaries.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Transfer ID - ULID-based unique identifier
///
/// Using ULID provides:
/// - Monotonic, sortable IDs
/// - No coordination needed (no machine_id)
/// - 128-bit with good entropy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(ulid::Ulid);

impl TransferId {
    /// Generate a new unique TransferId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Get the inner ULID value
    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Correlation ID - the saga-wide join key
///
/// Supplied by the caller at initiation (doubles as the idempotency key).
/// Every message in a transfer saga carries this id; the orchestrator uses
/// it to join asynchronous replies back to the originating Transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(uuid::Uuid);

impl CorrelationId {
    /// Generate a fresh correlation id (demo and tests; real callers bring
    /// their own)
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID value
    pub fn inner(&self) -> uuid::Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}

/// Phone-number key - account identity in the ledger and user identity in
/// the orchestrator
///
/// Format: optional `+` followed by 8..=15 digits. Wire messages carry it
/// pre-validated; `parse` enforces the format at the API boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneKey(String);

impl PhoneKey {
    /// Validate a raw phone string
    pub fn parse(raw: &str) -> Result<Self, &'static str> {
        let digits = raw.strip_prefix('+').unwrap_or(raw);
        if digits.is_empty() {
            return Err("Phone cannot be empty");
        }
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err("Phone must contain only digits");
        }
        if digits.len() < 8 || digits.len() > 15 {
            return Err("Phone must be 8 to 15 digits");
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bank identifier - short numeric routing code (e.g. "001")
///
/// Resolved against the payment-network directory at transfer initiation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BankId(String);

impl BankId {
    /// Validate a raw bank code
    pub fn parse(raw: &str) -> Result<Self, &'static str> {
        if raw.is_empty() {
            return Err("Bank code cannot be empty");
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err("Bank code must be numeric");
        }
        if raw.len() > 8 {
            return Err("Bank code too long");
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payment-network transaction id, assigned when the network leg of a
/// committed transfer is registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkTxId(String);

impl NetworkTxId {
    pub fn new(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetworkTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validate a transfer amount at the API boundary
///
/// # Errors
/// - Zero or negative amounts
/// - More than 2 decimal places (cent precision)
/// - Above the per-transfer maximum of 1,000,000.00
pub fn validate_amount(amount: Decimal) -> Result<(), &'static str> {
    if amount <= Decimal::ZERO {
        return Err("Amount must be greater than zero");
    }
    if amount.normalize().scale() > 2 {
        return Err("Amount precision exceeds 2 decimal places");
    }
    if amount > Decimal::from(1_000_000u32) {
        return Err("Amount exceeds per-transfer maximum");
    }
    Ok(())
}
