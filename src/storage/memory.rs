//! In-Memory Ticket Storage
//!
//! Storage for tests and development. State is lost on restart; the
//! claim and finalize guards behave exactly like the SQLite store, with
//! one write lock standing in for the database transaction.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{StorageError, StorageResult, TicketStore};
use crate::types::{Asset, DepositTicket, TicketStatus};

#[derive(Default)]
struct Inner {
    /// Tickets indexed by ID
    tickets: HashMap<String, DepositTicket>,
    /// Index: tx hash -> ticket ID
    by_hash: HashMap<String, String>,
    /// Wallet balances keyed by (user, asset)
    balances: HashMap<(String, Asset), Decimal>,
    /// System deposit addresses: asset -> (address, active)
    wallets: HashMap<Asset, (String, bool)>,
}

/// In-memory ticket store
#[derive(Clone, Default)]
pub struct MemoryTicketStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn insert(&self, ticket: &DepositTicket) -> StorageResult<()> {
        let mut inner = self.inner.write().await;

        if inner.tickets.contains_key(&ticket.id) {
            return Err(StorageError::Duplicate(ticket.id.clone()));
        }
        if let Some(hash) = &ticket.tx_hash {
            if inner.by_hash.contains_key(hash) {
                return Err(StorageError::Duplicate(hash.clone()));
            }
            inner.by_hash.insert(hash.clone(), ticket.id.clone());
        }

        inner.tickets.insert(ticket.id.clone(), ticket.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> StorageResult<Option<DepositTicket>> {
        let inner = self.inner.read().await;
        Ok(inner.tickets.get(id).cloned())
    }

    async fn find_by_tx_hash(&self, tx_hash: &str) -> StorageResult<Option<DepositTicket>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_hash
            .get(tx_hash)
            .and_then(|id| inner.tickets.get(id))
            .cloned())
    }

    async fn claim_tx_hash(&self, id: &str, tx_hash: &str) -> StorageResult<DepositTicket> {
        let mut inner = self.inner.write().await;

        if inner.by_hash.contains_key(tx_hash) {
            return Err(StorageError::Duplicate(tx_hash.to_string()));
        }

        let ticket = inner
            .tickets
            .get(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        if ticket.status != TicketStatus::Pending || ticket.tx_hash.is_some() {
            return Err(StorageError::InvalidState(format!(
                "ticket {} is {} and cannot claim a hash",
                id, ticket.status
            )));
        }

        inner.by_hash.insert(tx_hash.to_string(), id.to_string());
        match inner.tickets.get_mut(id) {
            Some(ticket) => {
                ticket.claim(tx_hash.to_string());
                Ok(ticket.clone())
            }
            None => Err(StorageError::NotFound(id.to_string())),
        }
    }

    async fn record_progress(
        &self,
        id: &str,
        confirmations: u32,
        note: Option<&str>,
    ) -> StorageResult<()> {
        let mut inner = self.inner.write().await;

        if let Some(ticket) = inner.tickets.get_mut(id) {
            if ticket.status == TicketStatus::AwaitingConfirmation {
                ticket.record_progress(confirmations, note.map(str::to_string));
            }
        }
        Ok(())
    }

    async fn reject(&self, id: &str, reason: &str) -> StorageResult<bool> {
        let mut inner = self.inner.write().await;

        match inner.tickets.get_mut(id) {
            Some(ticket) if ticket.status == TicketStatus::AwaitingConfirmation => {
                ticket.reject(reason.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finalize(
        &self,
        id: &str,
        confirmations: u32,
        payload: Option<&serde_json::Value>,
        note: Option<&str>,
    ) -> StorageResult<bool> {
        // One write lock covers both the status flip and the credit, the
        // same all-or-nothing window the SQLite transaction provides
        let mut inner = self.inner.write().await;

        let (user_id, asset, amount) = match inner.tickets.get_mut(id) {
            Some(ticket) if ticket.status == TicketStatus::AwaitingConfirmation => {
                ticket.complete(confirmations, payload.cloned(), note.map(str::to_string));
                (ticket.user_id.clone(), ticket.asset, ticket.amount)
            }
            _ => return Ok(false),
        };

        let balance = inner
            .balances
            .entry((user_id, asset))
            .or_insert(Decimal::ZERO);
        *balance += amount;

        Ok(true)
    }

    async fn awaiting_batch(&self, limit: usize) -> StorageResult<Vec<DepositTicket>> {
        let inner = self.inner.read().await;

        let mut batch: Vec<DepositTicket> = inner
            .tickets
            .values()
            .filter(|t| t.needs_reconciliation())
            .cloned()
            .collect();

        batch.sort_by_key(|t| (t.last_verified_at.unwrap_or(0), t.created_at));
        batch.truncate(limit);
        Ok(batch)
    }

    async fn list_for_user(&self, user_id: &str) -> StorageResult<Vec<DepositTicket>> {
        let inner = self.inner.read().await;

        let mut tickets: Vec<DepositTicket> = inner
            .tickets
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();

        tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tickets)
    }

    async fn balance(&self, user_id: &str, asset: Asset) -> StorageResult<Decimal> {
        let inner = self.inner.read().await;
        Ok(inner
            .balances
            .get(&(user_id.to_string(), asset))
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn active_wallet(&self, asset: Asset) -> StorageResult<Option<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .wallets
            .get(&asset)
            .filter(|(_, active)| *active)
            .map(|(address, _)| address.clone()))
    }

    async fn upsert_wallet(&self, asset: Asset, address: &str, active: bool) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        inner.wallets.insert(asset, (address.to_string(), active));
        Ok(())
    }

    async fn status_counts(&self) -> StorageResult<HashMap<String, u64>> {
        let inner = self.inner.read().await;

        let mut counts = HashMap::new();
        for ticket in inner.tickets.values() {
            *counts.entry(ticket.status.to_string()).or_insert(0u64) += 1;
        }
        Ok(counts)
    }
}
