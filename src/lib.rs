//! Custodia - Custodial Deposit Confirmation & Reconciliation
//!
//! Users fund a custodial balance by sending crypto assets to an assigned
//! address; this service determines when the on-chain transfer is settled
//! and credits the balance exactly once.
//!
//! ## Components
//!
//! 1. **Intake** - opens a PENDING deposit ticket against a system address
//! 2. **Coordinator** - validates a submitted proof hash, claims it, and
//!    runs one immediate verification
//! 3. **Oracle client** - normalizes the external verification service's
//!    answers into a closed taxonomy
//! 4. **Finalizer** - the shared transition function and the only place a
//!    balance is ever credited
//! 5. **Scheduler** - periodic reconciliation of tickets still awaiting
//!    confirmation

pub mod api;
pub mod common;
pub mod config;
pub mod logging;
pub mod notify;
pub mod oracle;
pub mod pipeline;
pub mod storage;
pub mod types;

// Re-exports: configuration and errors
pub use common::{Result, ServiceError};
pub use config::{AppConfig, ConfigError};

// Re-exports: oracle client
pub use oracle::{
    BlockchainOracleClient, DepositOracle, OracleConfig, VerificationRequest, VerificationResult,
    VerificationStatus,
};

// Re-exports: storage
pub use storage::{MemoryTicketStore, SqliteTicketStore, StorageError, TicketStore};

// Re-exports: pipeline
pub use pipeline::{
    ConfirmOutcome, DepositConfirmationCoordinator, DepositIntake, FinalizeOutcome,
    LedgerFinalizer, PipelineError, ReconciliationScheduler, TickSummary,
};

// Re-exports: core types
pub use types::{Asset, DepositTicket, TicketKind, TicketStatus};
