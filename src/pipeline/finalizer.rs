//! Ledger Finalizer
//!
//! The shared decision function behind both the coordinator and the
//! reconciliation scheduler: given a ticket awaiting confirmation and an
//! oracle result, apply exactly one state transition. Finalization is the
//! only place a wallet balance is ever credited, and the store performs
//! it under a "not already terminal" predicate so racing callers cannot
//! credit twice.

use std::sync::Arc;
use tracing::{info, warn};

use super::PipelineError;
use crate::notify::Notifier;
use crate::oracle::{VerificationResult, VerificationStatus};
use crate::storage::TicketStore;
use crate::types::DepositTicket;

/// What applying an oracle result did to a ticket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Settled now: status flipped to COMPLETED and the balance credited
    Credited,
    /// The guarded finalize found the ticket already terminal; nothing
    /// was written (the racing caller won)
    AlreadySettled,
    /// Still awaiting confirmation; progress persisted
    Progressing { confirmations: u32 },
    /// Oracle unconfigured and degraded mode disallows unverified
    /// settlement; ticket untouched, retried later
    Unavailable,
    /// Terminal rejection
    Rejected { reason: String },
}

/// Applies verification results to tickets and the ledger
pub struct LedgerFinalizer {
    store: Arc<dyn TicketStore>,
    notifier: Arc<dyn Notifier>,
    /// Degraded-mode flag: permit deposits to settle without oracle
    /// verification when no endpoint is configured
    allow_unverified: bool,
}

impl LedgerFinalizer {
    pub fn new(
        store: Arc<dyn TicketStore>,
        notifier: Arc<dyn Notifier>,
        allow_unverified: bool,
    ) -> Self {
        Self {
            store,
            notifier,
            allow_unverified,
        }
    }

    pub fn allows_unverified(&self) -> bool {
        self.allow_unverified
    }

    /// Apply one oracle result to one ticket in AWAITING_CONFIRMATION.
    pub async fn apply(
        &self,
        ticket: &DepositTicket,
        result: &VerificationResult,
    ) -> Result<FinalizeOutcome, PipelineError> {
        match result.status {
            VerificationStatus::Unconfigured => self.apply_unconfigured(ticket, result).await,

            // A transient oracle problem is data, not a failure: keep the
            // ticket awaiting, persist the note, let the scheduler retry
            VerificationStatus::Error => {
                let note = result.note();
                self.store
                    .record_progress(&ticket.id, result.confirmations.unwrap_or(0), Some(&note))
                    .await?;
                warn!(target: "custodia::pipeline", ticket = %ticket.id, note, "verification errored; will retry");
                Ok(FinalizeOutcome::Progressing {
                    confirmations: ticket.confirmations.max(result.confirmations.unwrap_or(0)),
                })
            }

            // One-way gate: the chain does not know this transaction, or
            // it does not pay the expected amount to the expected address
            VerificationStatus::NotFound | VerificationStatus::Mismatch => {
                let reason = match result.status {
                    VerificationStatus::NotFound => result
                        .message
                        .clone()
                        .unwrap_or_else(|| "transaction not found on chain".to_string()),
                    _ => result
                        .message
                        .clone()
                        .unwrap_or_else(|| "transaction does not match this deposit".to_string()),
                };

                let rejected = self.store.reject(&ticket.id, &reason).await?;
                if rejected {
                    info!(target: "custodia::pipeline", ticket = %ticket.id, reason, "deposit rejected");
                    self.notifier
                        .notify(
                            &ticket.user_id,
                            "Deposit rejected",
                            &format!("Deposit {} could not be verified: {}", ticket.id, reason),
                        )
                        .await;
                }
                Ok(FinalizeOutcome::Rejected { reason })
            }

            VerificationStatus::Confirmed => {
                let confirmations = result.confirmations.unwrap_or(0);
                if confirmations >= ticket.confirmation_target {
                    self.finalize(ticket, confirmations, result).await
                } else {
                    let note = format!(
                        "{} of {} confirmations",
                        confirmations, ticket.confirmation_target
                    );
                    self.store
                        .record_progress(&ticket.id, confirmations, Some(&note))
                        .await?;
                    Ok(FinalizeOutcome::Progressing {
                        confirmations: ticket.confirmations.max(confirmations),
                    })
                }
            }

            VerificationStatus::Pending => {
                let confirmations = result.confirmations.unwrap_or(0);
                self.store
                    .record_progress(&ticket.id, confirmations, Some(&result.note()))
                    .await?;
                Ok(FinalizeOutcome::Progressing {
                    confirmations: ticket.confirmations.max(confirmations),
                })
            }
        }
    }

    async fn apply_unconfigured(
        &self,
        ticket: &DepositTicket,
        result: &VerificationResult,
    ) -> Result<FinalizeOutcome, PipelineError> {
        if !self.allow_unverified {
            // Leave the ticket untouched; the scheduler retries once an
            // endpoint is configured
            return Ok(FinalizeOutcome::Unavailable);
        }

        let note = "settled without on-chain verification (no oracle configured)";
        let credited = self
            .store
            .finalize(&ticket.id, 0, result.raw.as_ref(), Some(note))
            .await?;

        if !credited {
            return Ok(FinalizeOutcome::AlreadySettled);
        }

        warn!(target: "custodia::pipeline", ticket = %ticket.id, "deposit settled unverified (degraded mode)");
        self.notify_settled(ticket).await;
        Ok(FinalizeOutcome::Credited)
    }

    /// The one balance-credit site. The store's finalize runs the status
    /// flip and the credit in a single transaction; a false return means
    /// another caller settled (or rejected) the ticket first.
    async fn finalize(
        &self,
        ticket: &DepositTicket,
        confirmations: u32,
        result: &VerificationResult,
    ) -> Result<FinalizeOutcome, PipelineError> {
        let credited = self
            .store
            .finalize(
                &ticket.id,
                confirmations,
                result.raw.as_ref(),
                result.message.as_deref(),
            )
            .await?;

        if !credited {
            return Ok(FinalizeOutcome::AlreadySettled);
        }

        info!(
            target: "custodia::pipeline",
            ticket = %ticket.id,
            user = %ticket.user_id,
            asset = %ticket.asset,
            amount = %ticket.amount,
            confirmations,
            "deposit settled and credited"
        );

        // Outside the transaction; delivery failure cannot roll back the
        // ledger
        self.notify_settled(ticket).await;
        Ok(FinalizeOutcome::Credited)
    }

    async fn notify_settled(&self, ticket: &DepositTicket) {
        self.notifier
            .notify(
                &ticket.user_id,
                "Deposit completed",
                &format!(
                    "Your deposit of {} {} has been credited to your balance.",
                    ticket.amount, ticket.asset
                ),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::RecordingNotifier;
    use crate::oracle::VerificationResult;
    use crate::storage::MemoryTicketStore;
    use crate::types::{Asset, TicketStatus};
    use rust_decimal_macros::dec;

    fn confirmed(confirmations: u32) -> VerificationResult {
        VerificationResult {
            status: VerificationStatus::Confirmed,
            confirmations: Some(confirmations),
            amount: None,
            to_address: None,
            message: None,
            raw: None,
        }
    }

    fn with_status(status: VerificationStatus) -> VerificationResult {
        VerificationResult {
            status,
            confirmations: None,
            amount: None,
            to_address: None,
            message: None,
            raw: None,
        }
    }

    async fn claimed_ticket(store: &MemoryTicketStore, hash: &str) -> DepositTicket {
        let ticket = DepositTicket::new(
            "user-1".to_string(),
            Asset::Btc,
            dec!(0.01),
            "bc1q-system".to_string(),
        );
        store.insert(&ticket).await.unwrap();
        store.claim_tx_hash(&ticket.id, hash).await.unwrap()
    }

    fn finalizer(
        store: &MemoryTicketStore,
        notifier: &RecordingNotifier,
        allow_unverified: bool,
    ) -> LedgerFinalizer {
        LedgerFinalizer::new(
            Arc::new(store.clone()),
            Arc::new(notifier.clone()),
            allow_unverified,
        )
    }

    #[tokio::test]
    async fn test_confirmed_at_target_credits_once() {
        let store = MemoryTicketStore::new();
        let notifier = RecordingNotifier::new();
        let finalizer = finalizer(&store, &notifier, false);
        let ticket = claimed_ticket(&store, "h1").await;

        let outcome = finalizer.apply(&ticket, &confirmed(3)).await.unwrap();
        assert_eq!(outcome, FinalizeOutcome::Credited);
        assert_eq!(store.balance("user-1", Asset::Btc).await.unwrap(), dec!(0.01));
        assert_eq!(notifier.count().await, 1);

        // Replaying the same result (coordinator/scheduler race) credits
        // nothing further
        let outcome = finalizer.apply(&ticket, &confirmed(3)).await.unwrap();
        assert_eq!(outcome, FinalizeOutcome::AlreadySettled);
        assert_eq!(store.balance("user-1", Asset::Btc).await.unwrap(), dec!(0.01));
        assert_eq!(notifier.count().await, 1);
    }

    #[tokio::test]
    async fn test_confirmed_below_target_keeps_waiting() {
        let store = MemoryTicketStore::new();
        let notifier = RecordingNotifier::new();
        let finalizer = finalizer(&store, &notifier, false);
        let ticket = claimed_ticket(&store, "h1").await;

        let outcome = finalizer.apply(&ticket, &confirmed(2)).await.unwrap();
        assert_eq!(outcome, FinalizeOutcome::Progressing { confirmations: 2 });

        let current = store.get(&ticket.id).await.unwrap().unwrap();
        assert_eq!(current.status, TicketStatus::AwaitingConfirmation);
        assert_eq!(current.confirmations, 2);
        assert_eq!(store.balance("user-1", Asset::Btc).await.unwrap(), dec!(0));
    }

    #[tokio::test]
    async fn test_error_is_transient() {
        let store = MemoryTicketStore::new();
        let notifier = RecordingNotifier::new();
        let finalizer = finalizer(&store, &notifier, false);
        let ticket = claimed_ticket(&store, "h1").await;

        // Three consecutive erroring polls: still awaiting, notes updated,
        // no credit
        for _ in 0..3 {
            let outcome = finalizer
                .apply(&ticket, &VerificationResult::error("oracle timeout"))
                .await
                .unwrap();
            assert!(matches!(outcome, FinalizeOutcome::Progressing { .. }));
        }

        let current = store.get(&ticket.id).await.unwrap().unwrap();
        assert_eq!(current.status, TicketStatus::AwaitingConfirmation);
        assert!(current
            .verification_notes
            .as_deref()
            .unwrap()
            .contains("oracle timeout"));
        assert_eq!(store.balance("user-1", Asset::Btc).await.unwrap(), dec!(0));
    }

    #[tokio::test]
    async fn test_mismatch_rejects_terminally() {
        let store = MemoryTicketStore::new();
        let notifier = RecordingNotifier::new();
        let finalizer = finalizer(&store, &notifier, false);
        let ticket = claimed_ticket(&store, "h1").await;

        let outcome = finalizer
            .apply(&ticket, &with_status(VerificationStatus::Mismatch))
            .await
            .unwrap();
        assert!(matches!(outcome, FinalizeOutcome::Rejected { .. }));
        assert_eq!(notifier.count().await, 1);

        let current = store.get(&ticket.id).await.unwrap().unwrap();
        assert_eq!(current.status, TicketStatus::Rejected);

        // Later ticks no longer see the ticket
        assert!(store.awaiting_batch(50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_without_degraded_mode() {
        let store = MemoryTicketStore::new();
        let notifier = RecordingNotifier::new();
        let finalizer = finalizer(&store, &notifier, false);
        let ticket = claimed_ticket(&store, "h1").await;

        let outcome = finalizer
            .apply(&ticket, &VerificationResult::unconfigured())
            .await
            .unwrap();
        assert_eq!(outcome, FinalizeOutcome::Unavailable);

        // Ticket untouched: still awaiting, still in the reconcile batch
        let current = store.get(&ticket.id).await.unwrap().unwrap();
        assert_eq!(current.status, TicketStatus::AwaitingConfirmation);
        assert_eq!(store.awaiting_batch(50).await.unwrap().len(), 1);
        assert_eq!(notifier.count().await, 0);
    }

    #[tokio::test]
    async fn test_unconfigured_with_degraded_mode_settles_flagged() {
        let store = MemoryTicketStore::new();
        let notifier = RecordingNotifier::new();
        let finalizer = finalizer(&store, &notifier, true);
        let ticket = claimed_ticket(&store, "h1").await;

        let outcome = finalizer
            .apply(&ticket, &VerificationResult::unconfigured())
            .await
            .unwrap();
        assert_eq!(outcome, FinalizeOutcome::Credited);

        let current = store.get(&ticket.id).await.unwrap().unwrap();
        assert_eq!(current.status, TicketStatus::Completed);
        assert_eq!(current.confirmations, 0);
        assert!(current
            .verification_notes
            .as_deref()
            .unwrap()
            .contains("without on-chain verification"));
        assert_eq!(store.balance("user-1", Asset::Btc).await.unwrap(), dec!(0.01));
    }

    #[tokio::test]
    async fn test_pending_confirmations_stay_monotonic() {
        let store = MemoryTicketStore::new();
        let notifier = RecordingNotifier::new();
        let finalizer = finalizer(&store, &notifier, false);
        let ticket = claimed_ticket(&store, "h1").await;

        finalizer.apply(&ticket, &confirmed(2)).await.unwrap();
        // A later poll observing fewer confirmations must not regress
        let ticket = store.get(&ticket.id).await.unwrap().unwrap();
        finalizer.apply(&ticket, &confirmed(1)).await.unwrap();

        let current = store.get(&ticket.id).await.unwrap().unwrap();
        assert_eq!(current.confirmations, 2);
    }
}
