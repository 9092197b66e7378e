//! SQLite Persistent Storage for the Deposit Pipeline
//!
//! Durable ticket and balance storage that survives service restarts.
//! Uses connection pooling via r2d2 for concurrent access.
//!
//! The claim and finalize guards live here as SQL predicates: a UNIQUE
//! index on tx_hash backs the claim, and the finalize transaction flips
//! the status and credits the balance together or not at all.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use super::traits::{StorageError, StorageResult, TicketStore};
use crate::types::ticket::unix_now;
use crate::types::{Asset, DepositTicket, TicketKind, TicketStatus};

/// SQLite-backed ticket store with connection pooling
pub struct SqliteTicketStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteTicketStore {
    /// Create a new store with the given database path
    ///
    /// Creates the database file and runs migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Get a connection from the pool
    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tickets (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'deposit',
                asset TEXT NOT NULL,
                amount TEXT NOT NULL,
                wallet_address TEXT NOT NULL,
                tx_hash TEXT UNIQUE,
                status TEXT NOT NULL DEFAULT 'pending',
                confirmations INTEGER NOT NULL DEFAULT 0,
                confirmation_target INTEGER NOT NULL,
                last_verified_at INTEGER,
                verification_notes TEXT,
                verification_payload TEXT,
                confirmed_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status);
            CREATE INDEX IF NOT EXISTS idx_tickets_user_id ON tickets(user_id);
            CREATE INDEX IF NOT EXISTS idx_tickets_last_verified ON tickets(last_verified_at);

            CREATE TABLE IF NOT EXISTS wallet_balances (
                user_id TEXT NOT NULL,
                asset TEXT NOT NULL,
                amount TEXT NOT NULL DEFAULT '0',
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, asset)
            );

            CREATE TABLE IF NOT EXISTS system_wallets (
                asset TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            );
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    /// Convert a database row to a DepositTicket
    fn row_to_ticket(row: &rusqlite::Row) -> rusqlite::Result<DepositTicket> {
        let kind_str: String = row.get("kind")?;
        let asset_str: String = row.get("asset")?;
        let amount_str: String = row.get("amount")?;
        let status_str: String = row.get("status")?;
        let payload_str: Option<String> = row.get("verification_payload")?;

        Ok(DepositTicket {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            kind: kind_str.parse().unwrap_or(TicketKind::Deposit),
            asset: asset_str.parse().unwrap_or(Asset::Btc),
            amount: Decimal::from_str(&amount_str).unwrap_or_default(),
            wallet_address: row.get("wallet_address")?,
            tx_hash: row.get("tx_hash")?,
            status: status_str.parse().unwrap_or(TicketStatus::Pending),
            confirmations: row.get::<_, i64>("confirmations")? as u32,
            confirmation_target: row.get::<_, i64>("confirmation_target")? as u32,
            last_verified_at: row
                .get::<_, Option<i64>>("last_verified_at")?
                .map(|v| v as u64),
            verification_notes: row.get("verification_notes")?,
            verification_payload: payload_str.and_then(|s| serde_json::from_str(&s).ok()),
            confirmed_at: row.get::<_, Option<i64>>("confirmed_at")?.map(|v| v as u64),
            created_at: row.get::<_, i64>("created_at")? as u64,
            updated_at: row.get::<_, i64>("updated_at")? as u64,
        })
    }

    fn map_unique_violation(e: rusqlite::Error, key: &str) -> StorageError {
        if let rusqlite::Error::SqliteFailure(ref err, _) = e {
            if err.extended_code == 1555 || err.extended_code == 2067 {
                return StorageError::Duplicate(key.to_string());
            }
        }
        StorageError::Database(e.to_string())
    }

    // Synchronous helpers for the trait implementation

    fn insert_sync(&self, ticket: &DepositTicket) -> StorageResult<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO tickets (
                id, user_id, kind, asset, amount, wallet_address,
                tx_hash, status, confirmations, confirmation_target,
                last_verified_at, verification_notes, verification_payload,
                confirmed_at, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8, ?9, ?10,
                ?11, ?12, ?13,
                ?14, ?15, ?16
            )
            "#,
            params![
                ticket.id,
                ticket.user_id,
                ticket.kind.to_string(),
                ticket.asset.to_string(),
                ticket.amount.to_string(),
                ticket.wallet_address,
                ticket.tx_hash,
                ticket.status.to_string(),
                ticket.confirmations as i64,
                ticket.confirmation_target as i64,
                ticket.last_verified_at.map(|v| v as i64),
                ticket.verification_notes,
                ticket
                    .verification_payload
                    .as_ref()
                    .map(|p| p.to_string()),
                ticket.confirmed_at.map(|v| v as i64),
                ticket.created_at as i64,
                ticket.updated_at as i64,
            ],
        )
        .map_err(|e| Self::map_unique_violation(e, &ticket.id))?;

        Ok(())
    }

    fn get_sync(&self, id: &str) -> StorageResult<Option<DepositTicket>> {
        let conn = self.conn()?;

        conn.query_row("SELECT * FROM tickets WHERE id = ?1", params![id], |row| {
            Self::row_to_ticket(row)
        })
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn find_by_tx_hash_sync(&self, tx_hash: &str) -> StorageResult<Option<DepositTicket>> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT * FROM tickets WHERE tx_hash = ?1",
            params![tx_hash],
            |row| Self::row_to_ticket(row),
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn claim_tx_hash_sync(&self, id: &str, tx_hash: &str) -> StorageResult<DepositTicket> {
        let now = unix_now() as i64;

        // Scope the pooled connection so it is returned before the reentrant
        // get_sync calls below acquire one; otherwise a single-connection pool
        // deadlocks on itself.
        let rows = {
            let conn = self.conn()?;
            conn.execute(
                r#"
            UPDATE tickets SET
                tx_hash = ?2,
                status = 'awaiting_confirmation',
                confirmations = 0,
                last_verified_at = ?3,
                updated_at = ?3
            WHERE id = ?1 AND status = 'pending' AND tx_hash IS NULL
            "#,
                params![id, tx_hash, now],
            )
            .map_err(|e| Self::map_unique_violation(e, tx_hash))?
        };

        if rows == 0 {
            // Distinguish a missing ticket from one that cannot be claimed
            return match self.get_sync(id)? {
                None => Err(StorageError::NotFound(id.to_string())),
                Some(t) => Err(StorageError::InvalidState(format!(
                    "ticket {} is {} and cannot claim a hash",
                    id, t.status
                ))),
            };
        }

        self.get_sync(id)?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    fn record_progress_sync(
        &self,
        id: &str,
        confirmations: u32,
        note: Option<&str>,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let now = unix_now() as i64;

        conn.execute(
            r#"
            UPDATE tickets SET
                confirmations = MAX(confirmations, ?2),
                verification_notes = COALESCE(?3, verification_notes),
                last_verified_at = ?4,
                updated_at = ?4
            WHERE id = ?1 AND status = 'awaiting_confirmation'
            "#,
            params![id, confirmations as i64, note, now],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn reject_sync(&self, id: &str, reason: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        let now = unix_now() as i64;

        let rows = conn
            .execute(
                r#"
            UPDATE tickets SET
                status = 'rejected',
                verification_notes = ?2,
                last_verified_at = ?3,
                updated_at = ?3
            WHERE id = ?1 AND status = 'awaiting_confirmation'
            "#,
                params![id, reason, now],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(rows > 0)
    }

    fn finalize_sync(
        &self,
        id: &str,
        confirmations: u32,
        payload: Option<&serde_json::Value>,
        note: Option<&str>,
    ) -> StorageResult<bool> {
        let mut conn = self.conn()?;
        let now = unix_now() as i64;

        let tx = conn
            .transaction()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        // Guarded status flip: the predicate re-checks "not already
        // terminal" inside the same transaction that credits the balance,
        // so a coordinator/scheduler race cannot double-credit.
        let rows = tx
            .execute(
                r#"
            UPDATE tickets SET
                status = 'completed',
                confirmations = MAX(confirmations, ?2),
                verification_payload = COALESCE(?3, verification_payload),
                verification_notes = COALESCE(?4, verification_notes),
                confirmed_at = ?5,
                last_verified_at = ?5,
                updated_at = ?5
            WHERE id = ?1 AND status = 'awaiting_confirmation'
            "#,
                params![
                    id,
                    confirmations as i64,
                    payload.map(|p| p.to_string()),
                    note,
                    now
                ],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if rows == 0 {
            // Already terminal (or never claimed); nothing written
            return Ok(false);
        }

        let (user_id, asset, amount_str): (String, String, String) = tx
            .query_row(
                "SELECT user_id, asset, amount FROM tickets WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let amount = Decimal::from_str(&amount_str)
            .map_err(|e| StorageError::InvalidData(format!("ticket {} amount: {}", id, e)))?;

        let current: Option<String> = tx
            .query_row(
                "SELECT amount FROM wallet_balances WHERE user_id = ?1 AND asset = ?2",
                params![user_id, asset],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let balance = match current {
            Some(raw) => Decimal::from_str(&raw)
                .map_err(|e| StorageError::InvalidData(format!("stored balance: {}", e)))?
                + amount,
            None => amount,
        };

        tx.execute(
            r#"
            INSERT INTO wallet_balances (user_id, asset, amount, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id, asset) DO UPDATE SET
                amount = excluded.amount,
                updated_at = excluded.updated_at
            "#,
            params![user_id, asset, balance.to_string(), now],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        tx.commit()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(true)
    }

    fn awaiting_batch_sync(&self, limit: usize) -> StorageResult<Vec<DepositTicket>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                r#"
            SELECT * FROM tickets
            WHERE status = 'awaiting_confirmation' AND tx_hash IS NOT NULL
            ORDER BY COALESCE(last_verified_at, 0) ASC, created_at ASC
            LIMIT ?1
            "#,
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let tickets = stmt
            .query_map(params![limit as i64], |row| Self::row_to_ticket(row))
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(tickets)
    }

    fn list_for_user_sync(&self, user_id: &str) -> StorageResult<Vec<DepositTicket>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT * FROM tickets WHERE user_id = ?1 ORDER BY created_at DESC")
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let tickets = stmt
            .query_map(params![user_id], |row| Self::row_to_ticket(row))
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(tickets)
    }

    fn balance_sync(&self, user_id: &str, asset: Asset) -> StorageResult<Decimal> {
        let conn = self.conn()?;

        let raw: Option<String> = conn
            .query_row(
                "SELECT amount FROM wallet_balances WHERE user_id = ?1 AND asset = ?2",
                params![user_id, asset.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        match raw {
            Some(s) => Decimal::from_str(&s)
                .map_err(|e| StorageError::InvalidData(format!("stored balance: {}", e))),
            None => Ok(Decimal::ZERO),
        }
    }

    fn active_wallet_sync(&self, asset: Asset) -> StorageResult<Option<String>> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT address FROM system_wallets WHERE asset = ?1 AND active = 1",
            params![asset.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn upsert_wallet_sync(&self, asset: Asset, address: &str, active: bool) -> StorageResult<()> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO system_wallets (asset, address, active)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(asset) DO UPDATE SET
                address = excluded.address,
                active = excluded.active
            "#,
            params![asset.to_string(), address, active as i64],
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn status_counts_sync(&self) -> StorageResult<HashMap<String, u64>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM tickets GROUP BY status")
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let mut counts = HashMap::new();
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| StorageError::Database(e.to_string()))?;

        for row in rows {
            let (status, count) = row.map_err(|e| StorageError::Database(e.to_string()))?;
            counts.insert(status, count as u64);
        }

        Ok(counts)
    }
}

#[async_trait]
impl TicketStore for SqliteTicketStore {
    async fn insert(&self, ticket: &DepositTicket) -> StorageResult<()> {
        self.insert_sync(ticket)
    }

    async fn get(&self, id: &str) -> StorageResult<Option<DepositTicket>> {
        self.get_sync(id)
    }

    async fn find_by_tx_hash(&self, tx_hash: &str) -> StorageResult<Option<DepositTicket>> {
        self.find_by_tx_hash_sync(tx_hash)
    }

    async fn claim_tx_hash(&self, id: &str, tx_hash: &str) -> StorageResult<DepositTicket> {
        self.claim_tx_hash_sync(id, tx_hash)
    }

    async fn record_progress(
        &self,
        id: &str,
        confirmations: u32,
        note: Option<&str>,
    ) -> StorageResult<()> {
        self.record_progress_sync(id, confirmations, note)
    }

    async fn reject(&self, id: &str, reason: &str) -> StorageResult<bool> {
        self.reject_sync(id, reason)
    }

    async fn finalize(
        &self,
        id: &str,
        confirmations: u32,
        payload: Option<&serde_json::Value>,
        note: Option<&str>,
    ) -> StorageResult<bool> {
        self.finalize_sync(id, confirmations, payload, note)
    }

    async fn awaiting_batch(&self, limit: usize) -> StorageResult<Vec<DepositTicket>> {
        self.awaiting_batch_sync(limit)
    }

    async fn list_for_user(&self, user_id: &str) -> StorageResult<Vec<DepositTicket>> {
        self.list_for_user_sync(user_id)
    }

    async fn balance(&self, user_id: &str, asset: Asset) -> StorageResult<Decimal> {
        self.balance_sync(user_id, asset)
    }

    async fn active_wallet(&self, asset: Asset) -> StorageResult<Option<String>> {
        self.active_wallet_sync(asset)
    }

    async fn upsert_wallet(&self, asset: Asset, address: &str, active: bool) -> StorageResult<()> {
        self.upsert_wallet_sync(asset, address, active)
    }

    async fn status_counts(&self) -> StorageResult<HashMap<String, u64>> {
        self.status_counts_sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn create_test_ticket(user: &str) -> DepositTicket {
        DepositTicket::new(
            user.to_string(),
            Asset::Btc,
            dec!(0.01),
            "bc1q-system".to_string(),
        )
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = SqliteTicketStore::in_memory().unwrap();
        let ticket = create_test_ticket("user-1");

        store.insert(&ticket).await.unwrap();

        let retrieved = store.get(&ticket.id).await.unwrap().unwrap();
        assert_eq!(retrieved.id, ticket.id);
        assert_eq!(retrieved.user_id, "user-1");
        assert_eq!(retrieved.amount, dec!(0.01));
        assert_eq!(retrieved.status, TicketStatus::Pending);
        assert_eq!(retrieved.confirmation_target, 3);
    }

    #[tokio::test]
    async fn test_claim_binds_hash_once() {
        let store = SqliteTicketStore::in_memory().unwrap();
        let ticket = create_test_ticket("user-1");
        store.insert(&ticket).await.unwrap();

        let claimed = store.claim_tx_hash(&ticket.id, "hash-1").await.unwrap();
        assert_eq!(claimed.status, TicketStatus::AwaitingConfirmation);
        assert_eq!(claimed.tx_hash.as_deref(), Some("hash-1"));
        assert_eq!(claimed.confirmations, 0);

        // Second claim on the same ticket fails: the predicate requires
        // PENDING with no hash
        let result = store.claim_tx_hash(&ticket.id, "hash-2").await;
        assert!(matches!(result, Err(StorageError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_claim_rejects_duplicate_hash_across_tickets() {
        let store = SqliteTicketStore::in_memory().unwrap();
        let first = create_test_ticket("user-1");
        let second = create_test_ticket("user-2");
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        store.claim_tx_hash(&first.id, "shared-hash").await.unwrap();

        let result = store.claim_tx_hash(&second.id, "shared-hash").await;
        assert!(matches!(result, Err(StorageError::Duplicate(_))));

        // The losing ticket is untouched
        let untouched = store.get(&second.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, TicketStatus::Pending);
        assert!(untouched.tx_hash.is_none());
    }

    #[tokio::test]
    async fn test_claim_missing_ticket() {
        let store = SqliteTicketStore::in_memory().unwrap();
        let result = store.claim_tx_hash("nope", "hash-x").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_finalize_credits_exactly_once() {
        let store = SqliteTicketStore::in_memory().unwrap();
        let ticket = create_test_ticket("user-1");
        store.insert(&ticket).await.unwrap();
        store.claim_tx_hash(&ticket.id, "hash-1").await.unwrap();

        let credited = store.finalize(&ticket.id, 3, None, None).await.unwrap();
        assert!(credited);

        let balance = store.balance("user-1", Asset::Btc).await.unwrap();
        assert_eq!(balance, dec!(0.01));

        // Replaying finalize finds a terminal ticket and writes nothing
        let again = store.finalize(&ticket.id, 5, None, None).await.unwrap();
        assert!(!again);

        let balance = store.balance("user-1", Asset::Btc).await.unwrap();
        assert_eq!(balance, dec!(0.01));

        let settled = store.get(&ticket.id).await.unwrap().unwrap();
        assert_eq!(settled.status, TicketStatus::Completed);
        assert!(settled.confirmed_at.is_some());
    }

    #[tokio::test]
    async fn test_finalize_accumulates_balance() {
        let store = SqliteTicketStore::in_memory().unwrap();

        for hash in ["h1", "h2"] {
            let ticket = create_test_ticket("user-1");
            store.insert(&ticket).await.unwrap();
            store.claim_tx_hash(&ticket.id, hash).await.unwrap();
            assert!(store.finalize(&ticket.id, 3, None, None).await.unwrap());
        }

        let balance = store.balance("user-1", Asset::Btc).await.unwrap();
        assert_eq!(balance, dec!(0.02));
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let store = SqliteTicketStore::in_memory().unwrap();
        let ticket = create_test_ticket("user-1");
        store.insert(&ticket).await.unwrap();
        store.claim_tx_hash(&ticket.id, "hash-1").await.unwrap();

        store.record_progress(&ticket.id, 2, Some("2/3")).await.unwrap();
        store.record_progress(&ticket.id, 1, Some("stale poll")).await.unwrap();

        let current = store.get(&ticket.id).await.unwrap().unwrap();
        assert_eq!(current.confirmations, 2);
        assert_eq!(current.verification_notes.as_deref(), Some("stale poll"));
    }

    #[tokio::test]
    async fn test_reject_is_terminal_and_excluded_from_batch() {
        let store = SqliteTicketStore::in_memory().unwrap();
        let ticket = create_test_ticket("user-1");
        store.insert(&ticket).await.unwrap();
        store.claim_tx_hash(&ticket.id, "hash-1").await.unwrap();

        assert_eq!(store.awaiting_batch(50).await.unwrap().len(), 1);

        assert!(store.reject(&ticket.id, "not found on chain").await.unwrap());
        assert!(store.awaiting_batch(50).await.unwrap().is_empty());

        // Rejecting again is a no-op
        assert!(!store.reject(&ticket.id, "again").await.unwrap());

        // Finalize after rejection writes nothing
        assert!(!store.finalize(&ticket.id, 9, None, None).await.unwrap());
        let balance = store.balance("user-1", Asset::Btc).await.unwrap();
        assert_eq!(balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_awaiting_batch_oldest_first() {
        let store = SqliteTicketStore::in_memory().unwrap();

        let a = create_test_ticket("user-a");
        let b = create_test_ticket("user-b");
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();
        store.claim_tx_hash(&a.id, "hash-a").await.unwrap();
        store.claim_tx_hash(&b.id, "hash-b").await.unwrap();

        // Touching A moves it behind B in the round-robin order
        store.record_progress(&a.id, 1, None).await.unwrap();
        {
            let conn = store.conn().unwrap();
            conn.execute(
                "UPDATE tickets SET last_verified_at = last_verified_at + 100 WHERE id = ?1",
                params![a.id],
            )
            .unwrap();
        }

        let batch = store.awaiting_batch(50).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, b.id);
        assert_eq!(batch[1].id, a.id);

        let limited = store.awaiting_batch(1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_system_wallets() {
        let store = SqliteTicketStore::in_memory().unwrap();

        assert!(store.active_wallet(Asset::Eth).await.unwrap().is_none());

        store.upsert_wallet(Asset::Eth, "0xsystem", true).await.unwrap();
        assert_eq!(
            store.active_wallet(Asset::Eth).await.unwrap().as_deref(),
            Some("0xsystem")
        );

        store.upsert_wallet(Asset::Eth, "0xsystem", false).await.unwrap();
        assert!(store.active_wallet(Asset::Eth).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_counts() {
        let store = SqliteTicketStore::in_memory().unwrap();

        let a = create_test_ticket("user-a");
        let b = create_test_ticket("user-b");
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();
        store.claim_tx_hash(&b.id, "hash-b").await.unwrap();

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.get("pending"), Some(&1));
        assert_eq!(counts.get("awaiting_confirmation"), Some(&1));
    }
}
