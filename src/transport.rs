//! In-process message transport
//!
//! Named FIFO queues with at-least-once semantics between the saga roles.
//! Each channel gets one pump task that pops envelopes, decodes them and
//! dispatches to the handler registered for the message kind. A failed
//! dispatch is retried in place with backoff (preserving per-queue order);
//! after the attempt budget the envelope moves to the dead-letter queue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::core_types::CorrelationId;
use crate::messages::{channels, Envelope, Message, MessageKind};

// ============================================================
// ERRORS
// ============================================================

/// Transport failures surfaced to publishers
///
/// Publishing is synchronous (`try_send`) so a caller can treat a failed
/// dispatch as part of its own local unit and roll back.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Queue full: {0}")]
    QueueFull(String),

    #[error("Message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

// ============================================================
// CONFIG
// ============================================================

/// Configuration for queues and redelivery
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Bounded capacity of each channel queue
    pub queue_capacity: usize,
    /// Total handler invocations per envelope before dead-lettering
    pub max_delivery_attempts: u32,
    /// Base redelivery backoff; grows linearly with the attempt number
    pub redelivery_backoff: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_delivery_attempts: 5,
            redelivery_backoff: Duration::from_millis(50),
        }
    }
}

// ============================================================
// SHUTDOWN SIGNALING
// ============================================================

/// Shutdown signal for graceful termination of pumps and the sweep
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    /// Flag to indicate shutdown requested
    shutdown: AtomicBool,
    /// Wakes tasks parked in `wait`
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Check if shutdown was requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}

// ============================================================
// MESSAGE HANDLER + REGISTRY
// ============================================================

/// Consumer of one or more message kinds
///
/// Handler errors mean infrastructure trouble and trigger redelivery.
/// Business failures travel as outcome events, and protocol anomalies
/// (unknown correlation, late replies) must be logged and consumed as Ok.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Get handler name for logging
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        correlation_id: CorrelationId,
        message: Message,
    ) -> anyhow::Result<()>;
}

/// Explicit routing table: message kind -> handler
///
/// Built once during wiring, then shared read-only by every pump.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: FxHashMap<MessageKind, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a message kind
    pub fn register(&mut self, kind: MessageKind, handler: Arc<dyn MessageHandler>) {
        if let Some(existing) = self.handlers.insert(kind, handler) {
            warn!(
                kind = %kind,
                handler = existing.name(),
                "Handler replaced for message kind"
            );
        }
    }

    pub fn get(&self, kind: MessageKind) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

// ============================================================
// DEAD LETTERS
// ============================================================

/// Envelope parked after decode failure or attempt exhaustion
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub channel: &'static str,
    pub envelope: Envelope,
    pub error: String,
    pub dead_at: i64,
}

// ============================================================
// TRANSPORT STATS
// ============================================================

/// Delivery counters shared by the bus and its pumps
#[derive(Debug, Default)]
pub struct TransportStats {
    published: AtomicU64,
    delivered: AtomicU64,
    retries: AtomicU64,
    dead_lettered: AtomicU64,
}

impl TransportStats {
    pub fn incr_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats
    pub fn snapshot(&self) -> TransportStatsSnapshot {
        TransportStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of transport stats (for reporting)
#[derive(Debug, Clone)]
pub struct TransportStatsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub retries: u64,
    pub dead_lettered: u64,
}

impl std::fmt::Display for TransportStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Transport Stats: published={}, delivered={}, retries={}, dead_lettered={}",
            self.published, self.delivered, self.retries, self.dead_lettered
        )
    }
}

// ============================================================
// MESSAGE BUS
// ============================================================

/// In-process broker: one bounded FIFO queue per logical channel
pub struct MessageBus {
    senders: FxHashMap<&'static str, mpsc::Sender<Envelope>>,
    /// Receivers parked here until a pump claims them
    receivers: Mutex<FxHashMap<&'static str, mpsc::Receiver<Envelope>>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    stats: Arc<TransportStats>,
    config: TransportConfig,
}

impl MessageBus {
    /// Create a broker with every saga channel provisioned
    pub fn new(config: TransportConfig) -> Self {
        let mut senders = FxHashMap::default();
        let mut receivers = FxHashMap::default();

        for channel in channels::ALL {
            let (tx, rx) = mpsc::channel(config.queue_capacity);
            senders.insert(channel, tx);
            receivers.insert(channel, rx);
        }

        Self {
            senders,
            receivers: Mutex::new(receivers),
            dead_letters: Mutex::new(Vec::new()),
            stats: Arc::new(TransportStats::default()),
            config,
        }
    }

    /// Publish a message on the channel its kind maps to
    ///
    /// Synchronous: a full or closed queue fails the publish immediately so
    /// the caller can roll back its colocated write.
    pub fn publish(
        &self,
        correlation_id: CorrelationId,
        message: &Message,
    ) -> Result<(), TransportError> {
        let envelope = Envelope::new(correlation_id, message)?;
        self.publish_envelope(message.kind().channel(), envelope)
    }

    /// Publish a pre-built envelope (also used by tests to inject poison)
    pub fn publish_envelope(
        &self,
        channel: &str,
        envelope: Envelope,
    ) -> Result<(), TransportError> {
        let tx = self
            .senders
            .get(channel)
            .ok_or_else(|| TransportError::UnknownChannel(channel.to_string()))?;

        tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull(channel.to_string()),
            mpsc::error::TrySendError::Closed(_) => {
                TransportError::ChannelClosed(channel.to_string())
            }
        })?;

        self.stats.incr_published();
        Ok(())
    }

    /// Claim the receiver end of a channel (once, at pump spawn)
    pub fn take_receiver(&self, channel: &'static str) -> Option<mpsc::Receiver<Envelope>> {
        self.receivers.lock().unwrap().remove(channel)
    }

    /// Park an envelope that cannot be delivered
    pub fn push_dead_letter(&self, channel: &'static str, envelope: Envelope, error: String) {
        error!(
            channel = channel,
            correlation_id = %envelope.correlation_id,
            kind = %envelope.kind,
            attempts = envelope.attempts,
            error = %error,
            "Message dead-lettered"
        );
        self.stats.incr_dead_lettered();
        self.dead_letters.lock().unwrap().push(DeadLetter {
            channel,
            envelope,
            error,
            dead_at: chrono::Utc::now().timestamp_millis(),
        });
    }

    /// Snapshot of the dead-letter queue
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().unwrap().clone()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.dead_letters.lock().unwrap().len()
    }

    pub fn stats(&self) -> Arc<TransportStats> {
        self.stats.clone()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

// ============================================================
// CHANNEL PUMP
// ============================================================

/// One consumer loop per channel
///
/// Owns the channel receiver; decoding, dispatch, redelivery and
/// dead-lettering all happen here so handlers stay plain business code.
pub struct ChannelPump {
    channel: &'static str,
    rx: mpsc::Receiver<Envelope>,
    registry: Arc<HandlerRegistry>,
    bus: Arc<MessageBus>,
    shutdown: Arc<ShutdownSignal>,
}

impl ChannelPump {
    /// Claim the channel's receiver and build its pump
    ///
    /// Returns None if the receiver was already claimed.
    pub fn claim(
        channel: &'static str,
        bus: Arc<MessageBus>,
        registry: Arc<HandlerRegistry>,
        shutdown: Arc<ShutdownSignal>,
    ) -> Option<Self> {
        let rx = bus.take_receiver(channel)?;
        Some(Self {
            channel,
            rx,
            registry,
            bus,
            shutdown,
        })
    }

    /// Run the pump until shutdown or channel close
    pub async fn run(mut self) {
        info!(channel = self.channel, "Pump started");

        loop {
            tokio::select! {
                _ = self.shutdown.wait() => {
                    info!(channel = self.channel, "Pump shutting down");
                    break;
                }
                maybe = self.rx.recv() => {
                    match maybe {
                        Some(envelope) => self.deliver(envelope).await,
                        None => {
                            info!(channel = self.channel, "Channel closed, pump exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Deliver one envelope: decode, dispatch, retry in place, dead-letter
    async fn deliver(&self, mut envelope: Envelope) {
        let Some(handler) = self.registry.get(envelope.kind) else {
            self.bus.push_dead_letter(
                self.channel,
                envelope,
                "No handler registered for message kind".to_string(),
            );
            return;
        };

        let message = match envelope.decode() {
            Ok(m) => m,
            Err(e) => {
                self.bus.push_dead_letter(
                    self.channel,
                    envelope,
                    format!("Payload decode failed: {}", e),
                );
                return;
            }
        };

        if message.kind() != envelope.kind {
            let found = message.kind();
            self.bus.push_dead_letter(
                self.channel,
                envelope,
                format!("Envelope kind does not match payload: {}", found),
            );
            return;
        }

        let max_attempts = self.bus.config().max_delivery_attempts;
        let backoff = self.bus.config().redelivery_backoff;

        loop {
            envelope.attempts += 1;

            match handler
                .handle(envelope.correlation_id, message.clone())
                .await
            {
                Ok(()) => {
                    debug!(
                        channel = self.channel,
                        correlation_id = %envelope.correlation_id,
                        kind = %envelope.kind,
                        handler = handler.name(),
                        attempts = envelope.attempts,
                        "Message delivered"
                    );
                    self.bus.stats.incr_delivered();
                    return;
                }
                Err(e) if envelope.attempts >= max_attempts => {
                    self.bus.push_dead_letter(
                        self.channel,
                        envelope,
                        format!("Handler failed: {}", e),
                    );
                    return;
                }
                Err(e) => {
                    warn!(
                        channel = self.channel,
                        correlation_id = %envelope.correlation_id,
                        kind = %envelope.kind,
                        handler = handler.name(),
                        attempt = envelope.attempts,
                        error = %e,
                        "Handler failed, retrying in place"
                    );
                    self.bus.stats.incr_retries();
                    // Retrying in place keeps per-channel ordering intact
                    tokio::time::sleep(backoff * envelope.attempts).await;
                }
            }
        }
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Records deliveries; fails the first `fail_times` invocations
    struct RecordingHandler {
        seen: Mutex<Vec<CorrelationId>>,
        fail_times: AtomicUsize,
    }

    impl RecordingHandler {
        fn new(fail_times: usize) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                fail_times: AtomicUsize::new(fail_times),
            }
        }

        fn seen_count(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn handle(
            &self,
            correlation_id: CorrelationId,
            _message: Message,
        ) -> anyhow::Result<()> {
            let remaining = self.fail_times.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_times.store(remaining - 1, Ordering::SeqCst);
                anyhow::bail!("induced failure");
            }
            self.seen.lock().unwrap().push(correlation_id);
            Ok(())
        }
    }

    fn fast_config() -> TransportConfig {
        TransportConfig {
            queue_capacity: 16,
            max_delivery_attempts: 3,
            redelivery_backoff: Duration::from_millis(1),
        }
    }

    fn spawn_pump(
        channel: &'static str,
        bus: &Arc<MessageBus>,
        registry: Arc<HandlerRegistry>,
        shutdown: &Arc<ShutdownSignal>,
    ) -> tokio::task::JoinHandle<()> {
        let pump = ChannelPump::claim(channel, bus.clone(), registry, shutdown.clone()).unwrap();
        tokio::spawn(pump.run())
    }

    #[tokio::test]
    async fn test_pump_delivers_message() {
        let bus = Arc::new(MessageBus::new(fast_config()));
        let shutdown = Arc::new(ShutdownSignal::new());
        let handler = Arc::new(RecordingHandler::new(0));

        let mut registry = HandlerRegistry::new();
        registry.register(MessageKind::CodeSent, handler.clone());
        let task = spawn_pump(
            channels::CODE_SENT_EVENT,
            &bus,
            Arc::new(registry),
            &shutdown,
        );

        let cid = CorrelationId::new();
        bus.publish(cid, &Message::CodeSent).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handler.seen_count(), 1);
        assert_eq!(bus.dead_letter_count(), 0);

        shutdown.request_shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let bus = Arc::new(MessageBus::new(fast_config()));
        let shutdown = Arc::new(ShutdownSignal::new());
        // Fails twice, succeeds on attempt 3 (within the 3-attempt budget)
        let handler = Arc::new(RecordingHandler::new(2));

        let mut registry = HandlerRegistry::new();
        registry.register(MessageKind::CodeSent, handler.clone());
        let task = spawn_pump(
            channels::CODE_SENT_EVENT,
            &bus,
            Arc::new(registry),
            &shutdown,
        );

        bus.publish(CorrelationId::new(), &Message::CodeSent).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.seen_count(), 1, "third attempt should deliver");
        assert_eq!(bus.dead_letter_count(), 0);
        assert_eq!(bus.stats().snapshot().retries, 2);

        shutdown.request_shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_attempts_dead_letter() {
        let bus = Arc::new(MessageBus::new(fast_config()));
        let shutdown = Arc::new(ShutdownSignal::new());
        // Fails more times than the budget allows
        let handler = Arc::new(RecordingHandler::new(10));

        let mut registry = HandlerRegistry::new();
        registry.register(MessageKind::CodeSent, handler.clone());
        let task = spawn_pump(
            channels::CODE_SENT_EVENT,
            &bus,
            Arc::new(registry),
            &shutdown,
        );

        bus.publish(CorrelationId::new(), &Message::CodeSent).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.seen_count(), 0);
        assert_eq!(bus.dead_letter_count(), 1);

        let dead = bus.dead_letters();
        assert_eq!(dead[0].channel, channels::CODE_SENT_EVENT);
        assert_eq!(dead[0].envelope.attempts, 3);

        shutdown.request_shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_poison_payload_dead_letters_without_stalling() {
        let bus = Arc::new(MessageBus::new(fast_config()));
        let shutdown = Arc::new(ShutdownSignal::new());
        let handler = Arc::new(RecordingHandler::new(0));

        let mut registry = HandlerRegistry::new();
        registry.register(MessageKind::CodeSent, handler.clone());
        let task = spawn_pump(
            channels::CODE_SENT_EVENT,
            &bus,
            Arc::new(registry),
            &shutdown,
        );

        // Poison first, healthy message behind it
        let mut poison = Envelope::new(CorrelationId::new(), &Message::CodeSent).unwrap();
        poison.payload = serde_json::json!({ "type": "garbage" });
        bus.publish_envelope(channels::CODE_SENT_EVENT, poison).unwrap();
        bus.publish(CorrelationId::new(), &Message::CodeSent).unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(bus.dead_letter_count(), 1, "poison should dead-letter");
        assert_eq!(handler.seen_count(), 1, "channel must not stall");

        shutdown.request_shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unregistered_kind_dead_letters() {
        let bus = Arc::new(MessageBus::new(fast_config()));
        let shutdown = Arc::new(ShutdownSignal::new());

        // Registry left empty for this channel
        let task = spawn_pump(
            channels::CODE_SENT_EVENT,
            &bus,
            Arc::new(HandlerRegistry::new()),
            &shutdown,
        );

        bus.publish(CorrelationId::new(), &Message::CodeSent).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bus.dead_letter_count(), 1);

        shutdown.request_shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_pump() {
        let bus = Arc::new(MessageBus::new(fast_config()));
        let shutdown = Arc::new(ShutdownSignal::new());

        let task = spawn_pump(
            channels::CODE_SENT_EVENT,
            &bus,
            Arc::new(HandlerRegistry::new()),
            &shutdown,
        );

        shutdown.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("pump should exit on shutdown")
            .unwrap();
    }

    #[test]
    fn test_publish_unknown_channel() {
        let bus = MessageBus::new(fast_config());
        let env = Envelope::new(CorrelationId::new(), &Message::CodeSent).unwrap();
        let result = bus.publish_envelope("no-such-channel", env);
        assert!(matches!(result, Err(TransportError::UnknownChannel(_))));
    }

    #[test]
    fn test_queue_full_fails_publish() {
        let config = TransportConfig {
            queue_capacity: 1,
            ..fast_config()
        };
        let bus = MessageBus::new(config);

        bus.publish(CorrelationId::new(), &Message::CodeSent).unwrap();
        let result = bus.publish(CorrelationId::new(), &Message::CodeSent);
        assert!(matches!(result, Err(TransportError::QueueFull(_))));
    }
}
