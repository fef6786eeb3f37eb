//! Receipt Emitter Adapter
//!
//! The downstream accounting system that records settled transfers. It
//! accepts a receipt and either takes it or does not; the saga treats it
//! as a black box.

use crate::core_types::{CorrelationId, NetworkTxId, PhoneKey};
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ReceiptError {
    #[error("Receipt channel unavailable: {0}")]
    Unavailable(String),

    #[error("Receipt rejected: {0}")]
    Rejected(String),
}

/// Settled transfer record handed to the accounting system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub correlation: CorrelationId,
    /// Payment-network leg backing this settlement
    pub network_tx: NetworkTxId,
    pub sender: PhoneKey,
    pub recipient: PhoneKey,
    pub recipient_bank_name: String,
    pub amount: Decimal,
    /// Issue timestamp (millis)
    pub issued_at: i64,
}

#[async_trait]
pub trait ReceiptEmitter: Send + Sync {
    /// Get adapter name for logging
    fn name(&self) -> &'static str;

    async fn emit(&self, receipt: &Receipt) -> Result<(), ReceiptError>;
}

/// Mock receipt emitter for tests and the demo binary
#[cfg(any(test, feature = "mock-collaborators"))]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct MockReceipts {
        /// Accepted receipts for verification
        receipts: Mutex<Vec<Receipt>>,
        emit_count: AtomicUsize,
        /// Configured behavior
        fail_emit: Mutex<bool>,
    }

    impl MockReceipts {
        pub fn new() -> Self {
            Self {
                receipts: Mutex::new(Vec::new()),
                emit_count: AtomicUsize::new(0),
                fail_emit: Mutex::new(false),
            }
        }

        pub fn set_fail_emit(&self, fail: bool) {
            *self.fail_emit.lock().unwrap() = fail;
        }

        pub fn emit_count(&self) -> usize {
            self.emit_count.load(Ordering::SeqCst)
        }

        pub fn receipts(&self) -> Vec<Receipt> {
            self.receipts.lock().unwrap().clone()
        }
    }

    impl Default for MockReceipts {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ReceiptEmitter for MockReceipts {
        fn name(&self) -> &'static str {
            "mock-receipts"
        }

        async fn emit(&self, receipt: &Receipt) -> Result<(), ReceiptError> {
            self.emit_count.fetch_add(1, Ordering::SeqCst);

            if *self.fail_emit.lock().unwrap() {
                return Err(ReceiptError::Unavailable(
                    "Mock receipt outage".to_string(),
                ));
            }
            self.receipts.lock().unwrap().push(receipt.clone());
            Ok(())
        }
    }

}

#[cfg(any(test, feature = "mock-collaborators"))]
pub use mock::MockReceipts;
