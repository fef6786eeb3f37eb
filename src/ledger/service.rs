//! Funds ledger message consumer.
//!
//! Consumes reserve and settle commands and reports a [`FundsOutcome`]
//! event for every one of them. The handler is idempotent per
//! correlation id: a redelivered command re-publishes the original
//! outcome without touching balances a second time, which is what makes
//! publish failures safe to surface as handler errors.

use crate::core_types::{CorrelationId, PhoneKey};
use crate::ledger::store::AccountStore;
use crate::messages::{FundsOutcome, Message};
use crate::transport::{MessageBus, MessageHandler};
use async_trait::async_trait;
use dashmap::DashSet;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct LedgerService {
    store: Arc<AccountStore>,
    bus: Arc<MessageBus>,
    /// Correlations whose reservation already succeeded
    reserved: DashSet<CorrelationId>,
    /// Correlations whose commit already succeeded
    committed: DashSet<CorrelationId>,
}

impl LedgerService {
    pub fn new(store: Arc<AccountStore>, bus: Arc<MessageBus>) -> Self {
        Self {
            store,
            bus,
            reserved: DashSet::new(),
            committed: DashSet::new(),
        }
    }

    async fn handle_reserve(
        &self,
        cid: CorrelationId,
        sender: PhoneKey,
        amount: Decimal,
        confirmation_code: String,
    ) -> anyhow::Result<()> {
        if self.reserved.contains(&cid) {
            debug!(correlation_id = %cid, "Reserve replay, re-publishing outcome");
        } else {
            match self.store.reserve(&sender, amount).await {
                Ok(()) => {
                    info!(correlation_id = %cid, account = %sender, %amount, "Funds reserved");
                    self.reserved.insert(cid);
                }
                Err(e) => {
                    // Business rejection: report it and stop, nothing was held
                    info!(correlation_id = %cid, account = %sender, %amount, error = %e,
                        "Reserve rejected");
                    self.bus.publish(
                        cid,
                        &Message::FundsOutcome {
                            sender,
                            recipient: None,
                            amount,
                            outcome: FundsOutcome::Failed {
                                reason: e.to_string(),
                            },
                        },
                    )?;
                    return Ok(());
                }
            }
        }

        // Publish failures bubble up as handler errors. The redelivery
        // takes the replay branch above, so the hold never doubles.
        self.bus.publish(
            cid,
            &Message::FundsOutcome {
                sender: sender.clone(),
                recipient: None,
                amount,
                outcome: FundsOutcome::Reserved,
            },
        )?;
        self.bus.publish(
            cid,
            &Message::SendCode {
                phone: sender,
                code: confirmation_code,
            },
        )?;
        Ok(())
    }

    async fn handle_settle(
        &self,
        cid: CorrelationId,
        sender: PhoneKey,
        recipient: Option<PhoneKey>,
        amount: Decimal,
        final_debit: bool,
    ) -> anyhow::Result<()> {
        if !final_debit {
            // Clamped release: redeliveries and oversized amounts no-op
            let released = self.store.release(&sender, amount).await;
            info!(correlation_id = %cid, account = %sender, %released, "Reservation released");
            self.bus.publish(
                cid,
                &Message::FundsOutcome {
                    sender,
                    recipient,
                    amount,
                    outcome: FundsOutcome::Cancelled,
                },
            )?;
            return Ok(());
        }

        let outcome = if self.committed.contains(&cid) {
            debug!(correlation_id = %cid, "Commit replay, re-publishing outcome");
            FundsOutcome::Committed
        } else {
            match &recipient {
                None => {
                    warn!(correlation_id = %cid, account = %sender, "Commit command without recipient");
                    FundsOutcome::Failed {
                        reason: "Commit requires a recipient account".to_string(),
                    }
                }
                Some(to) => match self.store.commit_transfer(&sender, to, amount).await {
                    Ok(()) => {
                        info!(correlation_id = %cid, from = %sender, to = %to, %amount,
                            "Funds committed");
                        self.committed.insert(cid);
                        FundsOutcome::Committed
                    }
                    Err(e) => {
                        warn!(correlation_id = %cid, from = %sender, error = %e, "Commit rejected");
                        FundsOutcome::Failed {
                            reason: e.to_string(),
                        }
                    }
                },
            }
        };

        self.bus.publish(
            cid,
            &Message::FundsOutcome {
                sender,
                recipient,
                amount,
                outcome,
            },
        )?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for LedgerService {
    fn name(&self) -> &'static str {
        "ledger"
    }

    async fn handle(&self, correlation_id: CorrelationId, message: Message) -> anyhow::Result<()> {
        match message {
            Message::ReserveFunds {
                sender,
                amount,
                confirmation_code,
            } => {
                self.handle_reserve(correlation_id, sender, amount, confirmation_code)
                    .await
            }
            Message::ReleaseOrCommit {
                sender,
                recipient,
                amount,
                final_debit,
            } => {
                self.handle_settle(correlation_id, sender, recipient, amount, final_debit)
                    .await
            }
            other => {
                warn!(correlation_id = %correlation_id, kind = %other.kind(),
                    "Unexpected message on funds channels");
                Ok(())
            }
        }
    }
}
