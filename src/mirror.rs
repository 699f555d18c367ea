//! Bet replication engine.
//!
//! Filters the remote feed for the tracked account, converts a matching
//! wager into a scaled copy, submits it, and records the resulting
//! pending-claim obligation.

use std::sync::Arc;

use anyhow::{Context, Result};
use ethers::types::U256;
use tracing::{debug, info};

use crate::chain::SenderConnection;
use crate::config::{Config, ZeroStakePolicy};
use crate::notify::Notifier;
use crate::store::ClaimStore;
use crate::types::{BetObservation, BetSide, PendingClaim};

/// What the engine decided for one feed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// Event did not originate from the tracked account.
    NotTarget,
    /// A pending claim for this round already exists; nothing submitted.
    Duplicate { epoch: u64 },
    /// Scaled stake truncated to zero and policy says skip.
    ZeroStakeSkipped { epoch: u64 },
    /// Dry-run mode; no transaction submitted.
    DryRun { epoch: u64 },
    /// Bet submitted and pending claim recorded.
    Mirrored { epoch: u64, amount: U256 },
}

pub struct MirrorEngine {
    config: Arc<Config>,
    store: Arc<dyn ClaimStore>,
    notifier: Arc<dyn Notifier>,
}

impl MirrorEngine {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ClaimStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            store,
            notifier,
        }
    }

    /// Scale an observed stake down by the configured divisor.
    /// Integer division: truncation, not rounding.
    pub fn scaled_stake(&self, observed: U256) -> U256 {
        observed / U256::from(self.config.mirror_divisor)
    }

    /// Decide and, when warranted, replicate one observed bet.
    ///
    /// Submission failures are reported and returned as errors; the caller
    /// keeps processing subsequent events either way. A failed bet never
    /// creates a pending claim.
    pub async fn handle_event(
        &self,
        sender: &dyn SenderConnection,
        obs: &BetObservation,
    ) -> Result<MirrorOutcome> {
        // Address comparison is byte equality; both sides were normalized
        // at parse time, which covers the case-insensitive requirement.
        if obs.sender != self.config.target_address {
            debug!(
                "[MIRROR] Ignoring {} bet from {:?} on epoch {}",
                obs.side, obs.sender, obs.epoch
            );
            return Ok(MirrorOutcome::NotTarget);
        }

        self.notifier.notify(&format!(
            "Target {} bet detected: epoch {}, stake {}",
            obs.side, obs.epoch, obs.amount
        ));

        let amount = self.scaled_stake(obs.amount);
        if amount.is_zero() && self.config.zero_stake == ZeroStakePolicy::Skip {
            info!("[MIRROR] Scaled stake is zero for epoch {}; skipping", obs.epoch);
            return Ok(MirrorOutcome::ZeroStakeSkipped { epoch: obs.epoch });
        }

        let wallet = sender.wallet();
        if self.store.contains(obs.epoch, wallet).await? {
            info!(
                "[MIRROR] Already replicated epoch {}; ignoring duplicate event",
                obs.epoch
            );
            return Ok(MirrorOutcome::Duplicate { epoch: obs.epoch });
        }

        if self.config.dry_run {
            self.notifier.notify(&format!(
                "[dry-run] Would place {} bet of {} on epoch {}",
                obs.side, amount, obs.epoch
            ));
            return Ok(MirrorOutcome::DryRun { epoch: obs.epoch });
        }

        self.submit(sender, obs.epoch, obs.side, amount).await?;
        Ok(MirrorOutcome::Mirrored {
            epoch: obs.epoch,
            amount,
        })
    }

    /// Submit a bet, then record exactly one pending claim for it.
    /// Shared by the feed path and the manual-override path.
    pub async fn submit(
        &self,
        sender: &dyn SenderConnection,
        epoch: u64,
        side: BetSide,
        amount: U256,
    ) -> Result<()> {
        if let Err(e) = sender.place_bet(epoch, side, amount).await {
            self.notifier.notify(&format!(
                "Error placing {} bet on epoch {}: {:#}",
                side, epoch, e
            ));
            return Err(e);
        }

        let wallet = sender.wallet();
        self.store
            .create(PendingClaim::new(epoch, wallet))
            .await
            .with_context(|| {
                format!(
                    "bet placed on epoch {} but recording the pending claim failed",
                    epoch
                )
            })?;

        self.notifier.notify(&format!(
            "Successfully placed {} bet of {} on epoch {}",
            side, amount, epoch
        ));
        Ok(())
    }
}
