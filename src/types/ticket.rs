//! Deposit Ticket Types
//!
//! Types for tracking a funding attempt through its settlement lifecycle:
//! pending → awaiting_confirmation → completed | rejected

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::asset::Asset;

/// Status of a ticket through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Created at intake, waiting for the user to submit a proof hash
    Pending,
    /// Proof hash claimed, waiting for enough confirmations
    AwaitingConfirmation,
    /// Settled and credited (terminal)
    Completed,
    /// Proof refused by verification (terminal)
    Rejected,
}

impl TicketStatus {
    /// Terminal states never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TicketStatus::Completed | TicketStatus::Rejected)
    }
}

impl Default for TicketStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::AwaitingConfirmation => write!(f, "awaiting_confirmation"),
            Self::Completed => write!(f, "completed"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "awaiting_confirmation" => Ok(Self::AwaitingConfirmation),
            "completed" => Ok(Self::Completed),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown ticket status: {}", other)),
        }
    }
}

/// Kind of ticket. Only deposit tickets run through the confirmation
/// pipeline; withdrawal tickets belong to another subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    Deposit,
    Withdrawal,
}

impl std::fmt::Display for TicketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deposit => write!(f, "deposit"),
            Self::Withdrawal => write!(f, "withdrawal"),
        }
    }
}

impl FromStr for TicketKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(Self::Deposit),
            "withdrawal" => Ok(Self::Withdrawal),
            other => Err(format!("unknown ticket kind: {}", other)),
        }
    }
}

/// A deposit ticket: the record of one funding attempt, from intake
/// through terminal settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositTicket {
    /// Unique ticket ID
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Ticket kind (the pipeline only processes deposits)
    pub kind: TicketKind,
    /// Deposited asset
    pub asset: Asset,
    /// Expected deposit amount
    pub amount: Decimal,
    /// System wallet address the user was told to send to
    pub wallet_address: String,
    /// On-chain transaction hash. Set once, globally unique, never
    /// overwritten.
    pub tx_hash: Option<String>,
    /// Current status
    pub status: TicketStatus,
    /// Confirmations observed so far. Never decreases while awaiting.
    pub confirmations: u32,
    /// Asset-specific minimum confirmations, fixed at intake
    pub confirmation_target: u32,
    /// Timestamp of the last verification attempt
    pub last_verified_at: Option<u64>,
    /// Latest note from the verification pipeline
    pub verification_notes: Option<String>,
    /// Raw oracle payload persisted at finalization
    pub verification_payload: Option<serde_json::Value>,
    /// Timestamp the ticket reached COMPLETED
    pub confirmed_at: Option<u64>,
    /// Timestamp the ticket was created
    pub created_at: u64,
    /// Timestamp of last update
    pub updated_at: u64,
}

/// Current unix time in seconds
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

impl DepositTicket {
    /// Create a new PENDING deposit ticket
    pub fn new(user_id: String, asset: Asset, amount: Decimal, wallet_address: String) -> Self {
        let now = unix_now();

        Self {
            id: format!("dep_{}", Uuid::new_v4().simple()),
            user_id,
            kind: TicketKind::Deposit,
            asset,
            amount,
            wallet_address,
            tx_hash: None,
            status: TicketStatus::Pending,
            confirmations: 0,
            confirmation_target: asset.confirmation_target(),
            last_verified_at: None,
            verification_notes: None,
            verification_payload: None,
            confirmed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Bind a proof hash and move to AWAITING_CONFIRMATION.
    ///
    /// Only valid on a PENDING ticket with no hash; callers enforce this
    /// (the stores additionally guard it with their own predicates).
    pub fn claim(&mut self, tx_hash: String) {
        self.tx_hash = Some(tx_hash);
        self.status = TicketStatus::AwaitingConfirmation;
        self.confirmations = 0;
        self.last_verified_at = Some(unix_now());
        self.touch();
    }

    /// Record poll progress while AWAITING_CONFIRMATION.
    ///
    /// Confirmations are monotonic: a lower observation never lowers the
    /// stored count.
    pub fn record_progress(&mut self, confirmations: u32, note: Option<String>) {
        self.confirmations = self.confirmations.max(confirmations);
        if note.is_some() {
            self.verification_notes = note;
        }
        self.last_verified_at = Some(unix_now());
        self.touch();
    }

    /// Mark as COMPLETED (terminal)
    pub fn complete(
        &mut self,
        confirmations: u32,
        payload: Option<serde_json::Value>,
        note: Option<String>,
    ) {
        let now = unix_now();
        self.status = TicketStatus::Completed;
        self.confirmations = self.confirmations.max(confirmations);
        self.verification_payload = payload;
        if note.is_some() {
            self.verification_notes = note;
        }
        self.confirmed_at = Some(now);
        self.last_verified_at = Some(now);
        self.touch();
    }

    /// Mark as REJECTED (terminal)
    pub fn reject(&mut self, reason: String) {
        self.status = TicketStatus::Rejected;
        self.verification_notes = Some(reason);
        self.last_verified_at = Some(unix_now());
        self.touch();
    }

    /// Whether the reconciliation scheduler should still poll this ticket
    pub fn needs_reconciliation(&self) -> bool {
        self.status == TicketStatus::AwaitingConfirmation && self.tx_hash.is_some()
    }

    fn touch(&mut self) {
        self.updated_at = unix_now();
    }
}

// =============================================================================
// API Request/Response Types
// =============================================================================

/// POST /api/deposits - Open a new deposit ticket
#[derive(Debug, Deserialize)]
pub struct CreateDepositRequest {
    pub user_id: String,
    pub asset: Asset,
    pub amount: Decimal,
}

/// POST /api/deposits/:id/confirm - Submit a transaction hash as proof
#[derive(Debug, Deserialize)]
pub struct ConfirmDepositRequest {
    pub user_id: String,
    pub tx_hash: String,
    /// Optional cross-check against the ticket's expected amount
    pub amount: Option<Decimal>,
}

/// Ticket state as returned by the API
#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub id: String,
    pub user_id: String,
    pub asset: Asset,
    pub amount: Decimal,
    pub wallet_address: String,
    pub tx_hash: Option<String>,
    pub status: String,
    pub confirmations: u32,
    pub confirmation_target: u32,
    pub verification_notes: Option<String>,
    pub confirmed_at: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl From<&DepositTicket> for TicketResponse {
    fn from(ticket: &DepositTicket) -> Self {
        Self {
            id: ticket.id.clone(),
            user_id: ticket.user_id.clone(),
            asset: ticket.asset,
            amount: ticket.amount,
            wallet_address: ticket.wallet_address.clone(),
            tx_hash: ticket.tx_hash.clone(),
            status: ticket.status.to_string(),
            confirmations: ticket.confirmations,
            confirmation_target: ticket.confirmation_target,
            verification_notes: ticket.verification_notes.clone(),
            confirmed_at: ticket.confirmed_at,
            created_at: ticket.created_at,
            updated_at: ticket.updated_at,
        }
    }
}

/// Response to POST /api/deposits/:id/confirm
#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub success: bool,
    pub outcome: String,
    pub message: Option<String>,
    pub ticket: Option<TicketResponse>,
}

/// Pipeline statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total_tickets: u64,
    pub pending: u64,
    pub awaiting_confirmation: u64,
    pub completed: u64,
    pub rejected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ticket_lifecycle() {
        let mut ticket = DepositTicket::new(
            "user-1".to_string(),
            Asset::Btc,
            dec!(0.01),
            "bc1q-system".to_string(),
        );

        assert_eq!(ticket.status, TicketStatus::Pending);
        assert_eq!(ticket.confirmation_target, 3);
        assert!(!ticket.needs_reconciliation());

        ticket.claim("a1b2c3d4e5f6".repeat(5));
        assert_eq!(ticket.status, TicketStatus::AwaitingConfirmation);
        assert_eq!(ticket.confirmations, 0);
        assert!(ticket.needs_reconciliation());

        ticket.record_progress(2, Some("2 of 3 confirmations".to_string()));
        assert_eq!(ticket.confirmations, 2);
        assert_eq!(ticket.status, TicketStatus::AwaitingConfirmation);

        ticket.complete(3, None, None);
        assert_eq!(ticket.status, TicketStatus::Completed);
        assert!(ticket.confirmed_at.is_some());
        assert!(ticket.status.is_terminal());
    }

    #[test]
    fn test_confirmations_monotonic() {
        let mut ticket = DepositTicket::new(
            "user-1".to_string(),
            Asset::Eth,
            dec!(1.5),
            "0xsystem".to_string(),
        );
        ticket.claim("0xabc123".to_string());

        ticket.record_progress(7, None);
        assert_eq!(ticket.confirmations, 7);

        // A stale or erroring poll reports fewer; the count must not drop
        ticket.record_progress(4, None);
        assert_eq!(ticket.confirmations, 7);

        ticket.record_progress(12, None);
        assert_eq!(ticket.confirmations, 12);
    }

    #[test]
    fn test_reject_is_terminal() {
        let mut ticket = DepositTicket::new(
            "user-2".to_string(),
            Asset::Trx,
            dec!(100),
            "T-system".to_string(),
        );
        ticket.claim("deadbeef00".to_string());
        ticket.reject("amount mismatch reported by oracle".to_string());

        assert_eq!(ticket.status, TicketStatus::Rejected);
        assert!(ticket.status.is_terminal());
        assert!(!ticket.needs_reconciliation());
    }

    #[test]
    fn test_status_display_roundtrip() {
        for status in [
            TicketStatus::Pending,
            TicketStatus::AwaitingConfirmation,
            TicketStatus::Completed,
            TicketStatus::Rejected,
        ] {
            assert_eq!(status.to_string().parse::<TicketStatus>().unwrap(), status);
        }
    }
}
