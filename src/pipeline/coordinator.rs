//! Deposit Confirmation Coordinator
//!
//! Validates a user-submitted transaction hash, claims it on the ticket,
//! and drives one immediate verification attempt through the finalizer.
//! The claim happens before the oracle is called, so a concurrent
//! duplicate submission of the same hash is caught by the uniqueness
//! constraint even while the first call is still in flight.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use super::finalizer::{FinalizeOutcome, LedgerFinalizer};
use super::{ConfirmOutcome, PipelineError};
use crate::oracle::{DepositOracle, VerificationRequest};
use crate::storage::{StorageError, TicketStore};
use crate::types::{TicketKind, TicketStatus};

/// Absolute tolerance for a caller-supplied amount cross-check. Fixed
/// across assets; guards against pasting the wrong ticket id while
/// tolerating minor rounding.
fn amount_tolerance() -> Decimal {
    Decimal::new(1, 8) // 0.00000001
}

/// Coordinates the inline confirmation path for a user request
pub struct DepositConfirmationCoordinator {
    store: Arc<dyn TicketStore>,
    oracle: Arc<dyn DepositOracle>,
    finalizer: Arc<LedgerFinalizer>,
}

impl DepositConfirmationCoordinator {
    pub fn new(
        store: Arc<dyn TicketStore>,
        oracle: Arc<dyn DepositOracle>,
        finalizer: Arc<LedgerFinalizer>,
    ) -> Self {
        Self {
            store,
            oracle,
            finalizer,
        }
    }

    /// Submit a transaction hash as proof for a deposit ticket.
    ///
    /// Validation failures surface immediately with no ticket mutation.
    /// A ticket accepts exactly one proof, ever; a COMPLETED ticket
    /// answers success idempotently; a REJECTED ticket is dead.
    pub async fn confirm(
        &self,
        user_id: &str,
        ticket_id: &str,
        tx_hash: &str,
        amount: Option<Decimal>,
    ) -> Result<ConfirmOutcome, PipelineError> {
        let tx_hash = normalize_tx_hash(tx_hash)?;

        let ticket = self
            .store
            .get(ticket_id)
            .await?
            .filter(|t| t.user_id == user_id)
            .ok_or_else(|| PipelineError::NotFound(ticket_id.to_string()))?;

        if ticket.kind != TicketKind::Deposit {
            return Err(PipelineError::NotADeposit(ticket.id));
        }

        match ticket.status {
            TicketStatus::Completed => {
                // Repeat-submission safe: no mutation, no second credit
                return Ok(ConfirmOutcome::AlreadyCompleted);
            }
            TicketStatus::Rejected => {
                return Err(PipelineError::TicketRejected {
                    id: ticket.id,
                    reason: ticket
                        .verification_notes
                        .unwrap_or_else(|| "verification refused".to_string()),
                });
            }
            TicketStatus::Pending | TicketStatus::AwaitingConfirmation => {}
        }

        if ticket.tx_hash.is_some() {
            return Err(PipelineError::HashAlreadySet(ticket.id));
        }

        // Proof reuse across tickets/users is how double-crediting is
        // attempted; refuse before claiming
        if self.store.find_by_tx_hash(&tx_hash).await?.is_some() {
            return Err(PipelineError::HashAlreadyLinked(tx_hash));
        }

        if let Some(submitted) = amount {
            let divergence = (submitted - ticket.amount).abs();
            if divergence > amount_tolerance() {
                return Err(PipelineError::AmountMismatch {
                    expected: ticket.amount,
                    submitted,
                });
            }
        }

        // Atomic claim, before the oracle call. The uniqueness constraint
        // catches a concurrent duplicate the pre-check above missed.
        let claimed = match self.store.claim_tx_hash(&ticket.id, &tx_hash).await {
            Ok(claimed) => claimed,
            Err(StorageError::Duplicate(_)) => {
                return Err(PipelineError::HashAlreadyLinked(tx_hash));
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            target: "custodia::pipeline",
            ticket = %claimed.id,
            user = %user_id,
            asset = %claimed.asset,
            "proof hash claimed, verifying"
        );

        let request = VerificationRequest {
            tx_hash,
            asset: claimed.asset,
            expected_amount: claimed.amount,
            expected_address: claimed.wallet_address.clone(),
            min_confirmations: claimed.confirmation_target,
        };

        let result = self.oracle.verify(&request).await;
        let outcome = self.finalizer.apply(&claimed, &result).await?;

        Ok(match outcome {
            FinalizeOutcome::Credited => ConfirmOutcome::Completed,
            FinalizeOutcome::AlreadySettled => ConfirmOutcome::AlreadyCompleted,
            FinalizeOutcome::Progressing { confirmations } => ConfirmOutcome::Pending {
                confirmations,
                target: claimed.confirmation_target,
            },
            FinalizeOutcome::Unavailable => ConfirmOutcome::Unavailable,
            FinalizeOutcome::Rejected { reason } => ConfirmOutcome::Rejected { reason },
        })
    }
}

/// Syntactic validation of a submitted hash: trimmed, single token,
/// alphanumeric, plausible length. Hex hashes and base58 signatures both
/// pass; garbage is refused before the store is touched.
fn normalize_tx_hash(raw: &str) -> Result<String, PipelineError> {
    let trimmed = raw.trim();
    let body = trimmed.strip_prefix("0x").unwrap_or(trimmed);

    if body.len() < 16 || body.len() > 128 {
        return Err(PipelineError::InvalidTxHash(format!(
            "implausible length {}",
            body.len()
        )));
    }
    if !body.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(PipelineError::InvalidTxHash(
            "contains non-alphanumeric characters".to_string(),
        ));
    }

    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::RecordingNotifier;
    use crate::oracle::{MockDepositOracle, VerificationResult, VerificationStatus};
    use crate::storage::MemoryTicketStore;
    use crate::types::{Asset, DepositTicket};
    use rust_decimal_macros::dec;

    const HASH_A: &str = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";
    const HASH_B: &str = "9b0fc92260312ce44e74ef369f5c66bbb85848f2eddd5a7a1cde251e54ccfdd5";

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

    struct Harness {
        store: MemoryTicketStore,
        notifier: RecordingNotifier,
        coordinator: DepositConfirmationCoordinator,
    }

    fn harness(oracle: MockDepositOracle) -> Harness {
        let store = MemoryTicketStore::new();
        let notifier = RecordingNotifier::new();
        let finalizer = Arc::new(LedgerFinalizer::new(
            Arc::new(store.clone()),
            Arc::new(notifier.clone()),
            false,
        ));
        let coordinator = DepositConfirmationCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(oracle),
            finalizer,
        );
        Harness {
            store,
            notifier,
            coordinator,
        }
    }

    async fn open_ticket(store: &MemoryTicketStore, user: &str) -> DepositTicket {
        let ticket = DepositTicket::new(
            user.to_string(),
            Asset::Btc,
            dec!(0.01),
            "bc1q-system".to_string(),
        );
        store.insert(&ticket).await.unwrap();
        ticket
    }

    #[tokio::test]
    async fn test_scenario_a_confirmed_deposit_credits() {
        let mut oracle = MockDepositOracle::new();
        oracle.expect_verify().times(1).returning(|_| confirmed(3));
        let h = harness(oracle);
        let ticket = open_ticket(&h.store, "user-1").await;

        let outcome = h
            .coordinator
            .confirm("user-1", &ticket.id, HASH_A, Some(dec!(0.01)))
            .await
            .unwrap();

        assert_eq!(outcome, ConfirmOutcome::Completed);
        assert_eq!(h.store.balance("user-1", Asset::Btc).await.unwrap(), dec!(0.01));
        assert_eq!(h.notifier.count().await, 1);
    }

    #[tokio::test]
    async fn test_scenario_b_hash_reuse_rejected_without_mutation() {
        let mut oracle = MockDepositOracle::new();
        oracle.expect_verify().times(1).returning(|_| confirmed(3));
        let h = harness(oracle);

        let first = open_ticket(&h.store, "user-1").await;
        let second = open_ticket(&h.store, "user-2").await;

        h.coordinator
            .confirm("user-1", &first.id, HASH_A, None)
            .await
            .unwrap();

        let err = h
            .coordinator
            .confirm("user-2", &second.id, HASH_A, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::HashAlreadyLinked(_)));

        // No mutation to either ticket, no balance change for user-2
        let untouched = h.store.get(&second.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, TicketStatus::Pending);
        assert!(untouched.tx_hash.is_none());
        assert_eq!(h.store.balance("user-2", Asset::Btc).await.unwrap(), dec!(0));
    }

    #[tokio::test]
    async fn test_double_confirm_on_completed_is_idempotent() {
        let mut oracle = MockDepositOracle::new();
        oracle.expect_verify().times(1).returning(|_| confirmed(3));
        let h = harness(oracle);
        let ticket = open_ticket(&h.store, "user-1").await;

        let first = h
            .coordinator
            .confirm("user-1", &ticket.id, HASH_A, None)
            .await
            .unwrap();
        assert_eq!(first, ConfirmOutcome::Completed);

        // The oracle mock would panic on a second call; the repeat returns
        // before any verification and credits nothing
        let second = h
            .coordinator
            .confirm("user-1", &ticket.id, HASH_A, None)
            .await
            .unwrap();
        assert_eq!(second, ConfirmOutcome::AlreadyCompleted);
        assert_eq!(h.store.balance("user-1", Asset::Btc).await.unwrap(), dec!(0.01));
    }

    #[tokio::test]
    async fn test_wrong_owner_reads_as_not_found() {
        let oracle = MockDepositOracle::new();
        let h = harness(oracle);
        let ticket = open_ticket(&h.store, "user-1").await;

        let err = h
            .coordinator
            .confirm("someone-else", &ticket.id, HASH_A, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rejected_ticket_is_dead() {
        let mut oracle = MockDepositOracle::new();
        oracle
            .expect_verify()
            .times(1)
            .returning(|_| VerificationResult {
                status: VerificationStatus::Mismatch,
                confirmations: None,
                amount: None,
                to_address: None,
                message: Some("wrong destination".to_string()),
                raw: None,
            });
        let h = harness(oracle);
        let ticket = open_ticket(&h.store, "user-1").await;

        let outcome = h
            .coordinator
            .confirm("user-1", &ticket.id, HASH_A, None)
            .await
            .unwrap();
        assert!(matches!(outcome, ConfirmOutcome::Rejected { .. }));

        // Even a fresh hash cannot revive a rejected ticket
        let err = h
            .coordinator
            .confirm("user-1", &ticket.id, HASH_B, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::TicketRejected { .. }));
    }

    #[tokio::test]
    async fn test_amount_mismatch_rejected_before_claim() {
        let oracle = MockDepositOracle::new();
        let h = harness(oracle);
        let ticket = open_ticket(&h.store, "user-1").await;

        let err = h
            .coordinator
            .confirm("user-1", &ticket.id, HASH_A, Some(dec!(0.5)))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::AmountMismatch { .. }));

        let untouched = h.store.get(&ticket.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, TicketStatus::Pending);
        assert!(untouched.tx_hash.is_none());
    }

    #[tokio::test]
    async fn test_amount_within_tolerance_accepted() {
        let mut oracle = MockDepositOracle::new();
        oracle.expect_verify().times(1).returning(|_| confirmed(3));
        let h = harness(oracle);
        let ticket = open_ticket(&h.store, "user-1").await;

        let outcome = h
            .coordinator
            .confirm("user-1", &ticket.id, HASH_A, Some(dec!(0.010000005)))
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmOutcome::Completed);
    }

    #[tokio::test]
    async fn test_scenario_e_unconfigured_reports_unavailable() {
        let mut oracle = MockDepositOracle::new();
        oracle
            .expect_verify()
            .times(1)
            .returning(|_| VerificationResult::unconfigured());
        let h = harness(oracle);
        let ticket = open_ticket(&h.store, "user-1").await;

        let outcome = h
            .coordinator
            .confirm("user-1", &ticket.id, HASH_A, None)
            .await
            .unwrap();
        assert_eq!(outcome, ConfirmOutcome::Unavailable);

        // Claimed, awaiting, and visible to the scheduler for retry
        let current = h.store.get(&ticket.id).await.unwrap().unwrap();
        assert_eq!(current.status, TicketStatus::AwaitingConfirmation);
        assert_eq!(h.store.awaiting_batch(50).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insufficient_confirmations_reports_pending() {
        let mut oracle = MockDepositOracle::new();
        oracle.expect_verify().times(1).returning(|_| confirmed(1));
        let h = harness(oracle);
        let ticket = open_ticket(&h.store, "user-1").await;

        let outcome = h
            .coordinator
            .confirm("user-1", &ticket.id, HASH_A, None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ConfirmOutcome::Pending {
                confirmations: 1,
                target: 3
            }
        );
    }

    #[test]
    fn test_hash_normalization() {
        assert!(normalize_tx_hash("  abc  ").is_err());
        assert!(normalize_tx_hash("has spaces in it here").is_err());
        assert_eq!(normalize_tx_hash(&format!(" {} ", HASH_A)).unwrap(), HASH_A);
        // 0x-prefixed EVM hashes pass as submitted
        let evm = format!("0x{}", HASH_A);
        assert_eq!(normalize_tx_hash(&evm).unwrap(), evm);
    }
}
