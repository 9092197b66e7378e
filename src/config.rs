//! Environment-based Configuration
//!
//! Configuration loading from environment variables. Secrets only ever
//! come from the environment, never from hardcoded values.
//!
//! # Environment Variables
//!
//! ## Verification Oracle
//! - `CUSTODIA_ORACLE_URL` - Verification endpoint URL. Unset puts the
//!   pipeline in degraded mode (see below).
//! - `CUSTODIA_ORACLE_SECRET` - Shared secret sent with every request
//! - `CUSTODIA_ORACLE_TIMEOUT_SECS` - Per-call timeout (default: 10)
//! - `CUSTODIA_ALLOW_UNVERIFIED` - Set to "1" to let deposits settle
//!   without oracle verification while no endpoint is configured
//!
//! ## Reconciliation
//! - `CUSTODIA_POLL_INTERVAL_SECS` - Scheduler interval (default: 60)
//! - `CUSTODIA_RECONCILE_BATCH` - Max tickets per tick (default: 50)
//!
//! ## Service
//! - `CUSTODIA_DB_PATH` - SQLite database path (default: data/custodia.db)
//! - `CUSTODIA_API_PORT` - REST API port (default: 3001)
//! - `CUSTODIA_NOTIFY_WEBHOOK` - Notification webhook URL (optional)
//! - `CUSTODIA_LOG_LEVEL` - trace|debug|info|warn|error (default: info)
//! - `CUSTODIA_LOG_JSON` - Set to "1" for JSON log output
//!
//! ## System Wallets
//! - `CUSTODIA_WALLET_<ASSET>` - Deposit address per asset, e.g.
//!   `CUSTODIA_WALLET_BTC`, `CUSTODIA_WALLET_ETH`. Assets without an
//!   address refuse intake.

use std::env;
use std::str::FromStr;
use thiserror::Error;

use crate::oracle::{OracleConfig, DEFAULT_ORACLE_TIMEOUT_SECS};
use crate::pipeline::scheduler::{DEFAULT_BATCH_SIZE, DEFAULT_POLL_INTERVAL_SECS};
use crate::types::Asset;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite database path
    pub database_path: String,

    /// REST API port
    pub api_port: u16,

    /// Verification oracle endpoint (None = degraded mode)
    pub oracle_endpoint: Option<String>,

    /// Shared secret for oracle requests
    pub oracle_secret: Option<String>,

    /// Oracle call timeout in seconds
    pub oracle_timeout_secs: u64,

    /// Permit deposits to settle unverified while the oracle is
    /// unconfigured
    pub allow_unverified_deposits: bool,

    /// Reconciliation poll interval in seconds
    pub poll_interval_secs: u64,

    /// Max tickets handled per reconciliation tick
    pub reconcile_batch_size: usize,

    /// Notification webhook URL
    pub notify_webhook: Option<String>,

    /// System deposit addresses by asset
    pub wallet_addresses: Vec<(Asset, String)>,

    /// Log level
    pub log_level: String,

    /// Emit JSON logs
    pub log_json: bool,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_path =
            env::var("CUSTODIA_DB_PATH").unwrap_or_else(|_| "data/custodia.db".to_string());

        let api_port = parse_or_default("CUSTODIA_API_PORT", 3001u16)?;

        let oracle_endpoint = env::var("CUSTODIA_ORACLE_URL").ok().filter(|v| !v.is_empty());
        let oracle_secret = env::var("CUSTODIA_ORACLE_SECRET").ok().filter(|v| !v.is_empty());
        let oracle_timeout_secs =
            parse_or_default("CUSTODIA_ORACLE_TIMEOUT_SECS", DEFAULT_ORACLE_TIMEOUT_SECS)?;

        let allow_unverified_deposits = flag("CUSTODIA_ALLOW_UNVERIFIED");

        let poll_interval_secs =
            parse_or_default("CUSTODIA_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        let reconcile_batch_size = parse_or_default("CUSTODIA_RECONCILE_BATCH", DEFAULT_BATCH_SIZE)?;

        let notify_webhook = env::var("CUSTODIA_NOTIFY_WEBHOOK").ok().filter(|v| !v.is_empty());

        let mut wallet_addresses = Vec::new();
        for asset in Asset::ALL {
            let var = format!("CUSTODIA_WALLET_{}", asset.code());
            if let Ok(address) = env::var(&var) {
                if !address.is_empty() {
                    wallet_addresses.push((asset, address));
                }
            }
        }

        let log_level = env::var("CUSTODIA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_json = flag("CUSTODIA_LOG_JSON");

        Ok(Self {
            database_path,
            api_port,
            oracle_endpoint,
            oracle_secret,
            oracle_timeout_secs,
            allow_unverified_deposits,
            poll_interval_secs,
            reconcile_batch_size,
            notify_webhook,
            wallet_addresses,
            log_level,
            log_json,
        })
    }

    /// Oracle client settings derived from this config
    pub fn oracle_config(&self) -> OracleConfig {
        OracleConfig {
            endpoint: self.oracle_endpoint.clone(),
            shared_secret: self.oracle_secret.clone(),
            timeout_secs: self.oracle_timeout_secs,
        }
    }

    /// Log a configuration summary (hiding sensitive values)
    pub fn log_summary(&self) {
        tracing::info!(
            target: "custodia::config",
            database = %self.database_path,
            api_port = self.api_port,
            oracle_configured = self.oracle_endpoint.is_some(),
            allow_unverified = self.allow_unverified_deposits,
            poll_interval_secs = self.poll_interval_secs,
            batch_size = self.reconcile_batch_size,
            wallets = self.wallet_addresses.len(),
            "configuration loaded"
        );

        if self.oracle_endpoint.is_none() {
            if self.allow_unverified_deposits {
                tracing::warn!(
                    target: "custodia::config",
                    "no oracle endpoint; deposits will settle UNVERIFIED (degraded mode)"
                );
            } else {
                tracing::warn!(
                    target: "custodia::config",
                    "no oracle endpoint; deposits will wait until one is configured"
                );
            }
        }
    }
}

/// Parse an env var, falling back to a default when unset. A set but
/// unparseable value is a configuration error, not a silent default.
fn parse_or_default<T: FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(var.to_string(), raw)),
        Err(_) => Ok(default),
    }
}

fn flag(var: &str) -> bool {
    env::var(var)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
