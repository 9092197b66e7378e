//! Blockchain Verification Oracle Client
//!
//! Calls the external verification endpoint and normalizes its answer into
//! a closed result taxonomy. Verification failure is data, not an error:
//! `verify` never returns `Err` and never panics, so a caller can act on
//! the result for many tickets without aborting a batch.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use crate::types::Asset;

/// Default per-call timeout for oracle requests
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 10;

/// Header carrying the shared secret, when one is configured
const SECRET_HEADER: &str = "x-oracle-secret";

/// Closed taxonomy of oracle answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Transaction found and confirmed on-chain
    Confirmed,
    /// Transaction seen but not yet settled (also the default for any
    /// unrecognized oracle reply: fail toward "not yet", never toward a
    /// false confirmation)
    Pending,
    /// Transaction unknown to the chain
    NotFound,
    /// Transaction exists but amount or destination does not match
    Mismatch,
    /// The oracle could not be reached or answered garbage
    Error,
    /// No oracle endpoint configured. A first-class state: the system can
    /// run in a documented degraded mode.
    Unconfigured,
}

/// What the oracle is asked to check
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    pub tx_hash: String,
    pub asset: Asset,
    pub expected_amount: Decimal,
    pub expected_address: String,
    pub min_confirmations: u32,
}

/// Normalized oracle answer
#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub status: VerificationStatus,
    pub confirmations: Option<u32>,
    pub amount: Option<Decimal>,
    pub to_address: Option<String>,
    pub message: Option<String>,
    /// Raw oracle payload, persisted onto the ticket at finalization
    pub raw: Option<Value>,
}

impl VerificationResult {
    pub fn unconfigured() -> Self {
        Self {
            status: VerificationStatus::Unconfigured,
            confirmations: None,
            amount: None,
            to_address: None,
            message: Some("verification endpoint not configured".to_string()),
            raw: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: VerificationStatus::Error,
            confirmations: None,
            amount: None,
            to_address: None,
            message: Some(message.into()),
            raw: None,
        }
    }

    /// One-line note for the ticket's verification log
    pub fn note(&self) -> String {
        match (&self.message, self.confirmations) {
            (Some(msg), Some(confs)) => format!("{:?}: {} ({} confirmations)", self.status, msg, confs),
            (Some(msg), None) => format!("{:?}: {}", self.status, msg),
            (None, Some(confs)) => format!("{:?} ({} confirmations)", self.status, confs),
            (None, None) => format!("{:?}", self.status),
        }
    }
}

/// Seam for the verification oracle, mockable in tests
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DepositOracle: Send + Sync {
    async fn verify(&self, request: &VerificationRequest) -> VerificationResult;
}

/// Oracle client configuration
#[derive(Debug, Clone, Default)]
pub struct OracleConfig {
    /// Verification endpoint URL. None puts the pipeline in degraded mode.
    pub endpoint: Option<String>,
    /// Shared secret sent with every request
    pub shared_secret: Option<String>,
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
}

/// HTTP client for the external verification oracle
#[derive(Debug, Clone)]
pub struct BlockchainOracleClient {
    client: Client,
    endpoint: Option<String>,
    shared_secret: Option<String>,
}

impl BlockchainOracleClient {
    pub fn new(config: OracleConfig) -> Self {
        let timeout = if config.timeout_secs == 0 {
            DEFAULT_ORACLE_TIMEOUT_SECS
        } else {
            config.timeout_secs
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .unwrap_or_default();

        Self {
            client,
            endpoint: config.endpoint.map(|e| e.trim_end_matches('/').to_string()),
            shared_secret: config.shared_secret,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn post_verification(
        &self,
        endpoint: &str,
        request: &VerificationRequest,
    ) -> Result<VerificationResult, String> {
        let mut req = self.client.post(endpoint).json(request);
        if let Some(secret) = &self.shared_secret {
            req = req.header(SECRET_HEADER, secret);
        }

        let resp = req.send().await.map_err(|e| format!("request failed: {}", e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("oracle returned HTTP {}", status));
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| format!("unparseable oracle response: {}", e))?;

        Ok(parse_payload(payload))
    }
}

#[async_trait]
impl DepositOracle for BlockchainOracleClient {
    async fn verify(&self, request: &VerificationRequest) -> VerificationResult {
        let endpoint = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => return VerificationResult::unconfigured(),
        };

        match self.post_verification(&endpoint, request).await {
            Ok(result) => result,
            Err(message) => VerificationResult::error(message),
        }
    }
}

/// Normalize a raw oracle payload.
///
/// Unknown or missing status strings become PENDING. Non-numeric
/// confirmation or amount fields are treated as absent, never as fatal.
fn parse_payload(payload: Value) -> VerificationResult {
    let status = parse_status(payload.get("status").and_then(Value::as_str));
    let confirmations = parse_confirmations(payload.get("confirmations"));
    let amount = parse_amount(payload.get("amount"));
    let to_address = payload
        .get("toAddress")
        .and_then(Value::as_str)
        .map(str::to_string);
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string);

    VerificationResult {
        status,
        confirmations,
        amount,
        to_address,
        message,
        raw: Some(payload),
    }
}

fn parse_status(raw: Option<&str>) -> VerificationStatus {
    match raw.map(|s| s.trim().to_lowercase()).as_deref() {
        Some("confirmed") | Some("success") => VerificationStatus::Confirmed,
        Some("not_found") | Some("notfound") => VerificationStatus::NotFound,
        Some("mismatch") => VerificationStatus::Mismatch,
        Some("error") | Some("failed") => VerificationStatus::Error,
        // "pending", anything unrecognized, and a missing status all land
        // here: never default to a confirmation
        _ => VerificationStatus::Pending,
    }
}

fn parse_confirmations(raw: Option<&Value>) -> Option<u32> {
    match raw {
        Some(Value::Number(n)) => n.as_u64().map(|v| v.min(u32::MAX as u64) as u32),
        Some(Value::String(s)) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

fn parse_amount(raw: Option<&Value>) -> Option<Decimal> {
    match raw {
        Some(Value::String(s)) => Decimal::from_str(s.trim()).ok(),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}
