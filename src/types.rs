//! Core domain types shared across the bot.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

/// Which outcome a wager backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetSide {
    Bull,
    Bear,
}

impl fmt::Display for BetSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetSide::Bull => write!(f, "bull"),
            BetSide::Bear => write!(f, "bear"),
        }
    }
}

/// A single bet observed on the remote event feed.
///
/// Ephemeral: decoded from each inbound log, dropped after the
/// replication decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetObservation {
    pub sender: Address,
    pub epoch: u64,
    pub amount: U256,
    pub side: BetSide,
}

/// Point-in-time view of a remote round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundInfo {
    pub close_timestamp: u64,
}

/// A durable record of a placed bet awaiting reward settlement.
///
/// At most one open record exists per `(epoch, wallet)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingClaim {
    pub epoch: u64,
    pub wallet: Address,
    pub created_at: u64,
}

impl PendingClaim {
    pub fn new(epoch: u64, wallet: Address) -> Self {
        Self {
            epoch,
            wallet,
            created_at: unix_now(),
        }
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
