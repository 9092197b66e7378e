//! Storage Trait Definitions
//!
//! Abstract storage interface for deposit tickets, wallet balances, and
//! system deposit addresses. Implementations use SQLite (production) or
//! in-memory state (testing). Ticket state is durable and keyed by ticket
//! id so reconciliation resumes correctly after a restart.
//!
//! Two operations carry the pipeline's correctness guarantees:
//! - `claim_tx_hash`: binds a proof hash to a PENDING ticket under the
//!   global uniqueness constraint on tx_hash.
//! - `finalize`: flips AWAITING_CONFIRMATION → COMPLETED and credits the
//!   user's balance in one transaction, guarded by a "not already
//!   terminal" predicate. The ticket id is the idempotency key: a ticket
//!   is credited at most once, no matter how many callers race.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;

use crate::types::{Asset, DepositTicket, PipelineStats};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Deposit ticket storage interface
///
/// Implementations:
/// - `SqliteTicketStore` - Production storage with SQLite
/// - `MemoryTicketStore` - In-memory storage for testing
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Insert a new ticket
    async fn insert(&self, ticket: &DepositTicket) -> StorageResult<()>;

    /// Get a ticket by ID
    async fn get(&self, id: &str) -> StorageResult<Option<DepositTicket>>;

    /// Find the ticket carrying a given transaction hash, if any
    async fn find_by_tx_hash(&self, tx_hash: &str) -> StorageResult<Option<DepositTicket>>;

    /// Atomically bind a proof hash to a PENDING ticket and move it to
    /// AWAITING_CONFIRMATION with confirmations reset to zero.
    ///
    /// Fails with `Duplicate` if any ticket already carries the hash,
    /// `InvalidState` if the ticket is not PENDING or already has a hash,
    /// `NotFound` if the ticket does not exist. Returns the claimed ticket.
    async fn claim_tx_hash(&self, id: &str, tx_hash: &str) -> StorageResult<DepositTicket>;

    /// Persist poll progress on an AWAITING_CONFIRMATION ticket.
    ///
    /// The stored confirmation count is monotonic; a lower observation
    /// never lowers it. A no-op on terminal tickets.
    async fn record_progress(
        &self,
        id: &str,
        confirmations: u32,
        note: Option<&str>,
    ) -> StorageResult<()>;

    /// Move an AWAITING_CONFIRMATION ticket to REJECTED (terminal).
    ///
    /// Returns false without mutation if the ticket was already terminal.
    async fn reject(&self, id: &str, reason: &str) -> StorageResult<bool>;

    /// Finalize a ticket: flip AWAITING_CONFIRMATION → COMPLETED and
    /// credit the owner's wallet balance by the ticket amount, in one
    /// transaction. Both writes commit together or not at all.
    ///
    /// Returns true if this call performed the credit, false if the
    /// ticket was already terminal (nothing written).
    async fn finalize(
        &self,
        id: &str,
        confirmations: u32,
        payload: Option<&serde_json::Value>,
        note: Option<&str>,
    ) -> StorageResult<bool>;

    /// Tickets still awaiting confirmation with a bound hash, oldest
    /// verification first, bounded by `limit`.
    async fn awaiting_batch(&self, limit: usize) -> StorageResult<Vec<DepositTicket>>;

    /// All tickets belonging to a user, newest first
    async fn list_for_user(&self, user_id: &str) -> StorageResult<Vec<DepositTicket>>;

    /// Current wallet balance for a user and asset (zero if never credited)
    async fn balance(&self, user_id: &str, asset: Asset) -> StorageResult<Decimal>;

    /// Active system deposit address for an asset, if one is configured
    async fn active_wallet(&self, asset: Asset) -> StorageResult<Option<String>>;

    /// Insert or replace the system deposit address for an asset
    async fn upsert_wallet(&self, asset: Asset, address: &str, active: bool) -> StorageResult<()>;

    /// Ticket counts by status
    async fn status_counts(&self) -> StorageResult<HashMap<String, u64>>;
}

/// Build pipeline stats from raw status counts
pub fn stats_from_counts(counts: &HashMap<String, u64>) -> PipelineStats {
    let get = |key: &str| counts.get(key).copied().unwrap_or(0);
    PipelineStats {
        total_tickets: counts.values().sum(),
        pending: get("pending"),
        awaiting_confirmation: get("awaiting_confirmation"),
        completed: get("completed"),
        rejected: get("rejected"),
    }
}
