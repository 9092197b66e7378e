//! Deposit Confirmation & Reconciliation Pipeline
//!
//! The settlement state machine for custodial deposits:
//!
//! ```text
//! PENDING → AWAITING_CONFIRMATION → COMPLETED | REJECTED
//! ```
//!
//! ## Components
//!
//! - **intake**: opens a PENDING ticket against an assigned system address
//! - **coordinator**: validates a user-submitted proof hash, claims it,
//!   drives one immediate verification attempt
//! - **finalizer**: the shared decision function turning an oracle result
//!   into a state transition and, when settling, the one balance credit
//! - **scheduler**: periodic re-polling of tickets awaiting confirmation
//!   so settlement progresses even if the user never returns

pub mod coordinator;
pub mod finalizer;
pub mod intake;
pub mod scheduler;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::storage::StorageError;
use crate::types::Asset;

/// Pipeline errors. Validation failures surface immediately and mutate
/// nothing; storage failures propagate.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("ticket not found: {0}")]
    NotFound(String),

    #[error("ticket {0} is not a deposit ticket")]
    NotADeposit(String),

    #[error("ticket {0} already has a transaction hash bound to it")]
    HashAlreadySet(String),

    #[error("transaction hash is already linked to another deposit")]
    HashAlreadyLinked(String),

    #[error("submitted amount {submitted} does not match expected amount {expected}")]
    AmountMismatch {
        expected: Decimal,
        submitted: Decimal,
    },

    #[error("invalid transaction hash: {0}")]
    InvalidTxHash(String),

    #[error("deposit amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("no active deposit address configured for {0}")]
    NoDepositAddress(Asset),

    #[error("ticket {id} was rejected: {reason}")]
    TicketRejected { id: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl PipelineError {
    /// Whether this error is the caller's fault (bad input or bad ticket
    /// state) rather than a service fault
    pub fn is_validation(&self) -> bool {
        !matches!(self, PipelineError::Storage(_))
    }
}

/// Result of one confirmation attempt as seen by the submitting user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The deposit settled and the balance was credited by this call
    Completed,
    /// The ticket was already COMPLETED; nothing changed (repeat
    /// submissions are safe)
    AlreadyCompleted,
    /// Claimed and verified, but not settled yet; the scheduler keeps
    /// polling
    Pending { confirmations: u32, target: u32 },
    /// Verification is temporarily unavailable (oracle unconfigured);
    /// retried automatically once configuration is fixed
    Unavailable,
    /// The proof was refused; the ticket is dead and a new one is needed
    Rejected { reason: String },
}

impl ConfirmOutcome {
    /// Stable wire label for API responses
    pub fn label(&self) -> &'static str {
        match self {
            ConfirmOutcome::Completed => "completed",
            ConfirmOutcome::AlreadyCompleted => "already_completed",
            ConfirmOutcome::Pending { .. } => "pending",
            ConfirmOutcome::Unavailable => "temporarily_unavailable",
            ConfirmOutcome::Rejected { .. } => "rejected",
        }
    }
}

pub use coordinator::DepositConfirmationCoordinator;
pub use finalizer::{FinalizeOutcome, LedgerFinalizer};
pub use intake::DepositIntake;
pub use scheduler::{ReconciliationScheduler, TickSummary};
