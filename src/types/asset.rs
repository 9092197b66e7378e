//! Supported deposit assets and their settlement policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error for unrecognized asset codes
#[derive(Debug, Error)]
#[error("unsupported asset: {0}")]
pub struct UnknownAsset(pub String);

/// Currencies the custody service accepts deposits in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
    Btc,
    Eth,
    Usdt,
    Sol,
    Bnb,
    Trx,
}

impl Asset {
    /// All supported assets, for wallet seeding and iteration
    pub const ALL: [Asset; 6] = [
        Asset::Btc,
        Asset::Eth,
        Asset::Usdt,
        Asset::Sol,
        Asset::Bnb,
        Asset::Trx,
    ];

    /// Minimum confirmations before a deposit in this asset is treated
    /// as safely settled. Fixed onto the ticket at intake time.
    pub fn confirmation_target(&self) -> u32 {
        match self {
            Asset::Btc => 3,
            Asset::Eth => 12,
            Asset::Usdt => 12,
            Asset::Sol => 32,
            Asset::Bnb => 12,
            Asset::Trx => 20,
        }
    }

    /// Canonical uppercase ticker code
    pub fn code(&self) -> &'static str {
        match self {
            Asset::Btc => "BTC",
            Asset::Eth => "ETH",
            Asset::Usdt => "USDT",
            Asset::Sol => "SOL",
            Asset::Bnb => "BNB",
            Asset::Trx => "TRX",
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Asset {
    type Err = UnknownAsset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BTC" => Ok(Asset::Btc),
            "ETH" => Ok(Asset::Eth),
            "USDT" => Ok(Asset::Usdt),
            "SOL" => Ok(Asset::Sol),
            "BNB" => Ok(Asset::Bnb),
            "TRX" => Ok(Asset::Trx),
            other => Err(UnknownAsset(other.to_string())),
        }
    }
}
