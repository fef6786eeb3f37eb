//! Payment Network Adapter
//!
//! Black-box view of the external payment network: a bank directory
//! lookup at initiate time and a transfer registration during the
//! receipt stage.

use crate::core_types::{BankId, CorrelationId, NetworkTxId, PhoneKey};
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum PaymentNetworkError {
    #[error("Unknown bank: {0}")]
    UnknownBank(String),

    #[error("Registration rejected: {0}")]
    Rejected(String),

    #[error("Payment network unavailable: {0}")]
    Unavailable(String),
}

/// Resolved bank directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankInfo {
    pub id: BankId,
    pub name: String,
}

/// Payment network operations
///
/// `register_transfer` MUST be idempotent - registering the same
/// correlation id twice must return the original leg id.
#[async_trait]
pub trait PaymentNetwork: Send + Sync {
    /// Get adapter name for logging
    fn name(&self) -> &'static str;

    /// Resolve a bank id against the network directory
    async fn lookup_bank(&self, bank: &BankId) -> Result<BankInfo, PaymentNetworkError>;

    /// Register a settled transfer with the network
    ///
    /// # Idempotency
    /// If already registered with this correlation id, return the
    /// original leg id.
    async fn register_transfer(
        &self,
        correlation: CorrelationId,
        sender: &PhoneKey,
        recipient: &PhoneKey,
        bank: &BankId,
        amount: Decimal,
    ) -> Result<NetworkTxId, PaymentNetworkError>;
}

/// Mock payment network for tests and the demo binary
#[cfg(any(test, feature = "mock-collaborators"))]
pub mod mock {
    use super::*;
    use rustc_hash::FxHashMap;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    pub struct MockPaymentNetwork {
        directory: FxHashMap<&'static str, &'static str>,
        /// Registered legs for idempotent replay
        registered: Mutex<HashMap<CorrelationId, NetworkTxId>>,
        leg_seq: AtomicU64,
        lookup_count: AtomicUsize,
        register_count: AtomicUsize,
        /// Configured behavior
        fail_lookup: Mutex<bool>,
        fail_register: Mutex<bool>,
        latency: Mutex<Duration>,
    }

    impl MockPaymentNetwork {
        pub fn new() -> Self {
            let mut directory = FxHashMap::default();
            directory.insert("001", "Banco Nacional");
            directory.insert("033", "Banco Santista");
            directory.insert("104", "Caixa Popular");
            directory.insert("237", "Banco Horizonte");
            directory.insert("341", "Banco Meridional");
            Self {
                directory,
                registered: Mutex::new(HashMap::new()),
                leg_seq: AtomicU64::new(0),
                lookup_count: AtomicUsize::new(0),
                register_count: AtomicUsize::new(0),
                fail_lookup: Mutex::new(false),
                fail_register: Mutex::new(false),
                latency: Mutex::new(Duration::ZERO),
            }
        }

        pub fn set_fail_lookup(&self, fail: bool) {
            *self.fail_lookup.lock().unwrap() = fail;
        }

        pub fn set_fail_register(&self, fail: bool) {
            *self.fail_register.lock().unwrap() = fail;
        }

        /// Delay every call by roughly this long (deadline tests)
        pub fn set_latency(&self, latency: Duration) {
            *self.latency.lock().unwrap() = latency;
        }

        pub fn lookup_count(&self) -> usize {
            self.lookup_count.load(Ordering::SeqCst)
        }

        pub fn register_count(&self) -> usize {
            self.register_count.load(Ordering::SeqCst)
        }

        async fn simulate_latency(&self) {
            let latency = *self.latency.lock().unwrap();
            if latency > Duration::ZERO {
                // Jitter computed before the await so the rng stays local
                let jitter = {
                    use rand::Rng;
                    rand::thread_rng().gen_range(0..=5)
                };
                tokio::time::sleep(latency + Duration::from_millis(jitter)).await;
            }
        }
    }

    impl Default for MockPaymentNetwork {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl PaymentNetwork for MockPaymentNetwork {
        fn name(&self) -> &'static str {
            "mock-payment-network"
        }

        async fn lookup_bank(&self, bank: &BankId) -> Result<BankInfo, PaymentNetworkError> {
            self.lookup_count.fetch_add(1, Ordering::SeqCst);
            self.simulate_latency().await;

            if *self.fail_lookup.lock().unwrap() {
                return Err(PaymentNetworkError::Unavailable(
                    "Mock directory outage".to_string(),
                ));
            }
            match self.directory.get(bank.as_str()) {
                Some(name) => Ok(BankInfo {
                    id: bank.clone(),
                    name: (*name).to_string(),
                }),
                None => Err(PaymentNetworkError::UnknownBank(bank.to_string())),
            }
        }

        async fn register_transfer(
            &self,
            correlation: CorrelationId,
            _sender: &PhoneKey,
            _recipient: &PhoneKey,
            _bank: &BankId,
            _amount: Decimal,
        ) -> Result<NetworkTxId, PaymentNetworkError> {
            self.register_count.fetch_add(1, Ordering::SeqCst);
            self.simulate_latency().await;

            if *self.fail_register.lock().unwrap() {
                return Err(PaymentNetworkError::Unavailable(
                    "Mock registration outage".to_string(),
                ));
            }

            let mut registered = self.registered.lock().unwrap();
            if let Some(existing) = registered.get(&correlation) {
                return Ok(existing.clone());
            }
            let seq = self.leg_seq.fetch_add(1, Ordering::SeqCst) + 1;
            let leg = NetworkTxId::new(format!("NET-{:08}", seq));
            registered.insert(correlation, leg.clone());
            Ok(leg)
        }
    }

}

#[cfg(any(test, feature = "mock-collaborators"))]
pub use mock::MockPaymentNetwork;
