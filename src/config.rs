//! Configuration and credential management.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ethers::types::{Address, U256};

/// What to do when the scaled stake truncates to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroStakePolicy {
    /// Drop the event without submitting (default).
    Skip,
    /// Submit the zero-value bet anyway.
    Submit,
}

impl FromStr for ZeroStakePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(ZeroStakePolicy::Skip),
            "submit" => Ok(ZeroStakePolicy::Submit),
            other => bail!("Invalid ZERO_STAKE policy: {} (expected skip|submit)", other),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket endpoint for the event-subscription connection.
    pub listener_ws_url: String,
    /// WebSocket endpoint for the transaction-submission connection.
    pub sender_ws_url: String,
    /// Prediction contract address.
    pub prediction_contract: Address,
    /// Account whose bets are mirrored.
    pub target_address: Address,
    /// Signing key for the sender connection. Optional only in dry-run mode.
    pub private_key: Option<String>,
    pub chain_id: u64,
    /// Default stake for manual bets, in wei.
    pub bet_amount: U256,
    /// Observed stakes are divided by this (integer truncation).
    pub mirror_divisor: u64,
    pub zero_stake: ZeroStakePolicy,
    /// Fixed gas ceiling for bet submissions.
    pub bet_gas_limit: u64,
    pub heartbeat_interval: Duration,
    pub watchdog_window: Duration,
    pub claim_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// Unconditional full-restart period.
    pub restart_interval: Duration,
    pub claims_file: PathBuf,
    pub dry_run: bool,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Missing credentials or addresses are fatal and non-retryable.
    pub fn from_env() -> Result<Self> {
        crate::paths::load_dotenv();

        let listener_ws_url = std::env::var("WSS_ENDPOINT_LISTENER")
            .or_else(|_| std::env::var("WSS_ENDPOINTS_CALL"))
            .context("WSS_ENDPOINT_LISTENER is not set")?;
        let sender_ws_url = std::env::var("WSS_ENDPOINT_SENDER")
            .or_else(|_| std::env::var("WSS_ENDPOINTS_TX"))
            .context("WSS_ENDPOINT_SENDER is not set")?;

        let prediction_contract: Address = required("PREDICTION_CONTRACT")?
            .parse()
            .context("PREDICTION_CONTRACT is not a valid address")?;
        let target_address: Address = required("TARGET_ADDRESS")?
            .parse()
            .context("TARGET_ADDRESS is not a valid address")?;

        let dry_run = parse_bool_env("DRY_RUN");

        let private_key = std::env::var("PRIVATE_KEY").ok();
        if private_key.is_none() && !dry_run {
            bail!("PRIVATE_KEY is required unless DRY_RUN=1");
        }

        let bet_amount = match std::env::var("BET_AMOUNT_WEI") {
            Ok(v) => U256::from_dec_str(v.trim())
                .context("BET_AMOUNT_WEI is not a valid decimal amount")?,
            // 0.001 native units
            Err(_) => U256::from(1_000_000_000_000_000u64),
        };

        let mirror_divisor = env_u64("MIRROR_DIVISOR", 10)?;
        if mirror_divisor == 0 {
            bail!("MIRROR_DIVISOR must be greater than zero");
        }

        let zero_stake = match std::env::var("ZERO_STAKE") {
            Ok(v) => v.parse()?,
            Err(_) => ZeroStakePolicy::Skip,
        };

        Ok(Self {
            listener_ws_url,
            sender_ws_url,
            prediction_contract,
            target_address,
            private_key,
            chain_id: env_u64("CHAIN_ID", 56)?,
            bet_amount,
            mirror_divisor,
            zero_stake,
            bet_gas_limit: env_u64("BET_GAS_LIMIT", 500_000)?,
            heartbeat_interval: Duration::from_secs(env_u64("HEARTBEAT_INTERVAL_SECS", 30)?),
            watchdog_window: Duration::from_secs(env_u64("WATCHDOG_WINDOW_SECS", 900)?),
            claim_interval: Duration::from_secs(env_u64("CLAIM_INTERVAL_SECS", 600)?),
            max_reconnect_attempts: env_u64("MAX_RECONNECT_ATTEMPTS", 10)? as u32,
            reconnect_base_delay: Duration::from_secs(env_u64("RECONNECT_BASE_DELAY_SECS", 30)?),
            reconnect_max_delay: Duration::from_secs(env_u64("RECONNECT_MAX_DELAY_SECS", 300)?),
            restart_interval: Duration::from_secs(
                env_u64("RESTART_INTERVAL_HOURS", 24)? * 3600,
            ),
            claims_file: std::env::var("CLAIMS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| crate::paths::resolve_data_file("pending_claims.json")),
            dry_run,
            telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_chat_id: std::env::var("TELEGRAM_CHAT_ID").ok(),
        })
    }
}

fn required(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{} is not set", name))
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .with_context(|| format!("{} is not a valid integer", name)),
        Err(_) => Ok(default),
    }
}

fn parse_bool_env(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v == "true" || v == "yes")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_stake_policy_parses() {
        assert_eq!("skip".parse::<ZeroStakePolicy>().unwrap(), ZeroStakePolicy::Skip);
        assert_eq!("SUBMIT".parse::<ZeroStakePolicy>().unwrap(), ZeroStakePolicy::Submit);
        assert!("maybe".parse::<ZeroStakePolicy>().is_err());
    }
}
