use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub saga: SagaConfig,
    #[serde(default)]
    pub sweep: SweepSection,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub transport: TransportSection,
}

/// Saga-level knobs: confirmation policy and stage deadlines.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SagaConfig {
    pub max_confirmation_attempts: u32,
    pub confirmation_timeout_secs: u64,
    pub processing_timeout_secs: u64,
    pub bank_lookup_timeout_ms: u64,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            max_confirmation_attempts: 3,
            confirmation_timeout_secs: 15 * 60,
            processing_timeout_secs: 5 * 60,
            bank_lookup_timeout_ms: 2_000,
        }
    }
}

impl SagaConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    pub fn bank_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.bank_lookup_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SweepSection {
    pub scan_interval_secs: u64,
    pub batch_size: usize,
}

impl Default for SweepSection {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            batch_size: 100,
        }
    }
}

impl SweepSection {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    /// Opening balance granted to accounts created on first reference.
    pub seed_balance: Decimal,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            seed_balance: Decimal::new(10_000_00, 2),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TransportSection {
    pub queue_capacity: usize,
    pub max_delivery_attempts: u32,
    pub redelivery_backoff_ms: u64,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_delivery_attempts: 5,
            redelivery_backoff_ms: 50,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "payrail.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            saga: SagaConfig::default(),
            sweep: SweepSection::default(),
            ledger: LedgerConfig::default(),
            transport: TransportSection::default(),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        let config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config yaml: {}", config_path))?;
        Ok(config)
    }
}
