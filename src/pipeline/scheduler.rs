//! Reconciliation Scheduler
//!
//! Periodic re-polling of tickets stuck in AWAITING_CONFIRMATION so
//! settlement makes forward progress without user interaction. Each tick
//! takes a bounded batch ordered oldest-verified-first (a perpetually
//! erroring ticket cannot starve the others), drives every ticket through
//! the same finalizer the coordinator uses, and isolates per-ticket
//! failures so one bad item never aborts the rest.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

use super::finalizer::{FinalizeOutcome, LedgerFinalizer};
use crate::oracle::{DepositOracle, VerificationRequest};
use crate::storage::TicketStore;

/// Default polling interval
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
/// Default bound on tickets handled per tick
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Counters for one reconciliation tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub processed: usize,
    pub credited: usize,
    pub rejected: usize,
    pub progressing: usize,
    pub errors: usize,
    /// The tick ended early because the oracle is unconfigured
    pub stopped_unconfigured: bool,
}

impl TickSummary {
    pub fn touched(&self) -> bool {
        self.processed > 0 || self.errors > 0
    }
}

/// Periodic reconciliation worker
pub struct ReconciliationScheduler {
    store: Arc<dyn TicketStore>,
    oracle: Arc<dyn DepositOracle>,
    finalizer: Arc<LedgerFinalizer>,
    poll_interval: Duration,
    batch_size: usize,
}

impl ReconciliationScheduler {
    pub fn new(
        store: Arc<dyn TicketStore>,
        oracle: Arc<dyn DepositOracle>,
        finalizer: Arc<LedgerFinalizer>,
        poll_interval_secs: u64,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            oracle,
            finalizer,
            poll_interval: Duration::from_secs(if poll_interval_secs == 0 {
                DEFAULT_POLL_INTERVAL_SECS
            } else {
                poll_interval_secs
            }),
            batch_size: if batch_size == 0 {
                DEFAULT_BATCH_SIZE
            } else {
                batch_size
            },
        }
    }

    /// Run the scheduler loop (never returns). Ticks are sequential:
    /// each batch is fully processed before the next sleep, so ticks
    /// cannot overlap.
    pub async fn run(&self) {
        info!(
            target: "custodia::scheduler",
            interval_secs = self.poll_interval.as_secs(),
            batch_size = self.batch_size,
            "reconciliation scheduler started"
        );

        let mut ticker = interval(self.poll_interval);
        loop {
            ticker.tick().await;
            let summary = self.run_tick().await;
            if summary.touched() {
                info!(
                    target: "custodia::scheduler",
                    processed = summary.processed,
                    credited = summary.credited,
                    rejected = summary.rejected,
                    progressing = summary.progressing,
                    errors = summary.errors,
                    "reconciliation tick complete"
                );
            }
        }
    }

    /// Run a single reconciliation pass
    pub async fn run_tick(&self) -> TickSummary {
        let mut summary = TickSummary::default();

        let batch = match self.store.awaiting_batch(self.batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(target: "custodia::scheduler", error = %e, "failed to load reconciliation batch");
                summary.errors += 1;
                return summary;
            }
        };

        for ticket in batch {
            let tx_hash = match &ticket.tx_hash {
                Some(hash) => hash.clone(),
                // awaiting_batch filters these out; belt for the query
                None => continue,
            };

            let request = VerificationRequest {
                tx_hash,
                asset: ticket.asset,
                expected_amount: ticket.amount,
                expected_address: ticket.wallet_address.clone(),
                min_confirmations: ticket.confirmation_target,
            };

            let result = self.oracle.verify(&request).await;
            summary.processed += 1;

            match self.finalizer.apply(&ticket, &result).await {
                Ok(FinalizeOutcome::Credited) => summary.credited += 1,
                Ok(FinalizeOutcome::AlreadySettled) => {}
                Ok(FinalizeOutcome::Rejected { .. }) => summary.rejected += 1,
                Ok(FinalizeOutcome::Progressing { .. }) => summary.progressing += 1,
                Ok(FinalizeOutcome::Unavailable) => {
                    // No endpoint and no degraded mode: polling the rest of
                    // the batch is pointless until configuration changes.
                    // One log line for the whole tick, not one per ticket.
                    warn!(
                        target: "custodia::scheduler",
                        "verification oracle not configured; ending tick early"
                    );
                    summary.stopped_unconfigured = true;
                    return summary;
                }
                Err(e) => {
                    // Isolate this ticket's failure; the batch continues
                    error!(
                        target: "custodia::scheduler",
                        ticket = %ticket.id,
                        error = %e,
                        "reconciliation failed for ticket"
                    );
                    summary.errors += 1;
                }
            }
        }

        summary
    }
}
