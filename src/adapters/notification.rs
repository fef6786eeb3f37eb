//! Notification Service
//!
//! Consumes the three notification commands and hands each one to a
//! [`NotificationSink`] (SMS gateway, push provider). Code deliveries
//! are acknowledged back to the orchestrator with a code-sent event;
//! success and failure notices are fire-and-forget.

use crate::core_types::{CorrelationId, PhoneKey};
use crate::messages::Message;
use crate::transport::{MessageBus, MessageHandler};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone)]
pub enum NotificationError {
    #[error("Notification channel unavailable: {0}")]
    Unavailable(String),
}

/// User-facing notice, one per notification command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Code {
        phone: PhoneKey,
        code: String,
    },
    Success {
        phone: PhoneKey,
        recipient: PhoneKey,
        amount: Decimal,
        recipient_bank_name: String,
    },
    Failure {
        phone: PhoneKey,
        amount: Decimal,
        reason: String,
    },
}

/// Delivery channel for notices
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Get sink name for logging
    fn name(&self) -> &'static str;

    async fn deliver(&self, notice: &Notice) -> Result<(), NotificationError>;
}

/// Sink that only writes to the log
///
/// Stand-in for a real SMS gateway when none is wired.
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn deliver(&self, notice: &Notice) -> Result<(), NotificationError> {
        match notice {
            Notice::Code { phone, code } => {
                info!(phone = %phone, code = %code, "Confirmation code notice");
            }
            Notice::Success {
                phone,
                recipient,
                amount,
                recipient_bank_name,
            } => {
                info!(phone = %phone, recipient = %recipient, %amount,
                    bank = %recipient_bank_name, "Transfer success notice");
            }
            Notice::Failure {
                phone,
                amount,
                reason,
            } => {
                info!(phone = %phone, %amount, reason = %reason, "Transfer failure notice");
            }
        }
        Ok(())
    }
}

/// Message consumer bridging the notification channels to a sink
pub struct NotificationService {
    sink: Arc<dyn NotificationSink>,
    bus: Arc<MessageBus>,
}

impl NotificationService {
    pub fn new(sink: Arc<dyn NotificationSink>, bus: Arc<MessageBus>) -> Self {
        Self { sink, bus }
    }
}

#[async_trait]
impl MessageHandler for NotificationService {
    fn name(&self) -> &'static str {
        "notification"
    }

    async fn handle(&self, correlation_id: CorrelationId, message: Message) -> anyhow::Result<()> {
        let notice = match message {
            Message::SendCode { phone, code } => Notice::Code { phone, code },
            Message::SendSuccess {
                phone,
                recipient,
                amount,
                recipient_bank_name,
            } => Notice::Success {
                phone,
                recipient,
                amount,
                recipient_bank_name,
            },
            Message::SendFailure {
                phone,
                amount,
                reason,
            } => Notice::Failure {
                phone,
                amount,
                reason,
            },
            other => {
                warn!(correlation_id = %correlation_id, kind = %other.kind(),
                    "Unexpected message on notification channels");
                return Ok(());
            }
        };

        let is_code = matches!(notice, Notice::Code { .. });
        // Sink errors bubble up so the transport redelivers the command
        self.sink.deliver(&notice).await?;
        debug!(correlation_id = %correlation_id, sink = self.sink.name(), "Notice delivered");

        if is_code {
            self.bus.publish(correlation_id, &Message::CodeSent)?;
        }
        Ok(())
    }
}

/// Sink that records every notice for verification
#[cfg(any(test, feature = "mock-collaborators"))]
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct RecordingSink {
        notices: Mutex<Vec<Notice>>,
        delivered_count: AtomicUsize,
        /// Configured behavior
        fail_delivery: Mutex<bool>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self {
                notices: Mutex::new(Vec::new()),
                delivered_count: AtomicUsize::new(0),
                fail_delivery: Mutex::new(false),
            }
        }

        pub fn set_fail_delivery(&self, fail: bool) {
            *self.fail_delivery.lock().unwrap() = fail;
        }

        pub fn delivered_count(&self) -> usize {
            self.delivered_count.load(Ordering::SeqCst)
        }

        pub fn notices(&self) -> Vec<Notice> {
            self.notices.lock().unwrap().clone()
        }

        /// Latest confirmation code delivered to a phone
        pub fn last_code_for(&self, phone: &PhoneKey) -> Option<String> {
            self.notices
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find_map(|notice| match notice {
                    Notice::Code { phone: p, code } if p == phone => Some(code.clone()),
                    _ => None,
                })
        }

        pub fn success_count(&self) -> usize {
            self.notices
                .lock()
                .unwrap()
                .iter()
                .filter(|notice| matches!(notice, Notice::Success { .. }))
                .count()
        }

        pub fn failure_count(&self) -> usize {
            self.notices
                .lock()
                .unwrap()
                .iter()
                .filter(|notice| matches!(notice, Notice::Failure { .. }))
                .count()
        }
    }

    impl Default for RecordingSink {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn deliver(&self, notice: &Notice) -> Result<(), NotificationError> {
            if *self.fail_delivery.lock().unwrap() {
                return Err(NotificationError::Unavailable(
                    "Mock delivery outage".to_string(),
                ));
            }
            self.notices.lock().unwrap().push(notice.clone());
            self.delivered_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "mock-collaborators"))]
pub use mock::RecordingSink;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::channels;
    use crate::transport::TransportConfig;
    use std::str::FromStr;

    fn phone(s: &str) -> PhoneKey {
        PhoneKey::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_code_delivery_publishes_code_sent() {
        let bus = Arc::new(MessageBus::new(TransportConfig::default()));
        let mut rx_sent = bus.take_receiver(channels::CODE_SENT_EVENT).unwrap();
        let sink = Arc::new(RecordingSink::new());
        let service = NotificationService::new(sink.clone(), bus);
        let cid = CorrelationId::new();
        let alice = phone("5511999990001");

        service
            .handle(
                cid,
                Message::SendCode {
                    phone: alice.clone(),
                    code: "123456".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(sink.last_code_for(&alice).as_deref(), Some("123456"));
        let envelope = rx_sent.try_recv().unwrap();
        assert_eq!(envelope.correlation_id, cid);
        assert!(matches!(envelope.decode().unwrap(), Message::CodeSent));
    }

    #[tokio::test]
    async fn test_sink_outage_bubbles_up() {
        let bus = Arc::new(MessageBus::new(TransportConfig::default()));
        let mut rx_sent = bus.take_receiver(channels::CODE_SENT_EVENT).unwrap();
        let sink = Arc::new(RecordingSink::new());
        sink.set_fail_delivery(true);
        let service = NotificationService::new(sink.clone(), bus);

        let result = service
            .handle(
                CorrelationId::new(),
                Message::SendCode {
                    phone: phone("5511999990001"),
                    code: "123456".to_string(),
                },
            )
            .await;
        assert!(result.is_err());
        // No acknowledgement for a failed delivery
        assert!(rx_sent.try_recv().is_err());
        assert_eq!(sink.delivered_count(), 0);
    }

    #[tokio::test]
    async fn test_success_and_failure_notices() {
        let bus = Arc::new(MessageBus::new(TransportConfig::default()));
        let mut rx_sent = bus.take_receiver(channels::CODE_SENT_EVENT).unwrap();
        let sink = Arc::new(RecordingSink::new());
        let service = NotificationService::new(sink.clone(), bus);
        let alice = phone("5511999990001");
        let bob = phone("5511999990002");

        service
            .handle(
                CorrelationId::new(),
                Message::SendSuccess {
                    phone: alice.clone(),
                    recipient: bob,
                    amount: Decimal::from_str("100.00").unwrap(),
                    recipient_bank_name: "Banco Nacional".to_string(),
                },
            )
            .await
            .unwrap();
        service
            .handle(
                CorrelationId::new(),
                Message::SendFailure {
                    phone: alice,
                    amount: Decimal::from_str("50.00").unwrap(),
                    reason: "Insufficient available funds".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(sink.success_count(), 1);
        assert_eq!(sink.failure_count(), 1);
        // Only code deliveries are acknowledged
        assert!(rx_sent.try_recv().is_err());
    }
}
