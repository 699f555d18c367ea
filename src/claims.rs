//! Claim reconciliation engine.
//!
//! Periodically scans pending obligations, determines which rounds are
//! closed/claimable/refundable/dead, submits one batched settlement call,
//! and prunes settled or unrecoverable entries.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::chain::SenderConnection;
use crate::config::Config;
use crate::notify::Notifier;
use crate::store::ClaimStore;
use crate::types::PendingClaim;

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Epochs claimed and removed from the store.
    pub settled: Vec<u64>,
    /// Epochs whose round has not closed yet; retained.
    pub not_closed: Vec<u64>,
    /// Closed epochs with no recoverable value; deleted.
    pub deleted: Vec<u64>,
    /// Eligible epochs whose batched settlement call failed; retained.
    pub failed: Vec<u64>,
    /// Eligible epochs not submitted because of dry-run mode; retained.
    pub dry_run: Vec<u64>,
    /// Per-epoch query faults; retained and retried next pass.
    pub errors: Vec<(u64, String)>,
}

impl ReconcileReport {
    /// Human-readable summary for the notification collaborator.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        if !self.settled.is_empty() {
            lines.push(format!(
                "Successfully claimed rewards for epochs: {}",
                join(&self.settled)
            ));
        }
        if !self.failed.is_empty() {
            lines.push(format!(
                "Claim call failed; epochs left pending: {}",
                join(&self.failed)
            ));
        }
        if !self.dry_run.is_empty() {
            lines.push(format!(
                "[dry-run] Would claim epochs: {}",
                join(&self.dry_run)
            ));
        }
        if !self.not_closed.is_empty() {
            lines.push(format!("Rounds not yet closed: {}", join(&self.not_closed)));
        }
        if !self.deleted.is_empty() {
            lines.push(format!(
                "Rounds with no rewards (deleted): {}",
                join(&self.deleted)
            ));
        }
        for (epoch, error) in &self.errors {
            lines.push(format!("Error checking round {}: {}", epoch, error));
        }
        if lines.is_empty() {
            lines.push("No claimable rewards found".to_string());
        }
        lines.join("\n")
    }
}

fn join(epochs: &[u64]) -> String {
    epochs
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

enum Classification {
    NotClosed,
    Dead,
    Eligible,
}

pub struct ClaimEngine {
    config: Arc<Config>,
    store: Arc<dyn ClaimStore>,
    notifier: Arc<dyn Notifier>,
}

impl ClaimEngine {
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

    /// Run one reconciliation pass at time `now` (unix seconds).
    ///
    /// Every pass re-queries fresh round state. A query fault on one epoch
    /// is isolated and never aborts the pass for the others. A batch
    /// settlement failure leaves the full input set untouched.
    pub async fn reconcile(
        &self,
        sender: &dyn SenderConnection,
        now: u64,
    ) -> Result<ReconcileReport> {
        let wallet = sender.wallet();
        let pending = self.store.find(wallet).await?;

        if pending.is_empty() {
            info!("[CLAIM] No pending claims found");
            self.notifier.notify("No pending claims found");
            return Ok(ReconcileReport::default());
        }

        let mut report = ReconcileReport::default();
        let mut batch: Vec<u64> = Vec::new();
        let mut dead: Vec<u64> = Vec::new();

        for claim in &pending {
            match self.classify(sender, claim, now).await {
                Ok(Classification::NotClosed) => report.not_closed.push(claim.epoch),
                Ok(Classification::Dead) => dead.push(claim.epoch),
                Ok(Classification::Eligible) => batch.push(claim.epoch),
                Err(e) => {
                    warn!("[CLAIM] Error checking round {}: {:#}", claim.epoch, e);
                    report.errors.push((claim.epoch, format!("{:#}", e)));
                }
            }
        }

        if !dead.is_empty() {
            self.store.delete_many(&dead, wallet).await?;
            report.deleted = dead;
        }

        if !batch.is_empty() {
            if self.config.dry_run {
                info!("[CLAIM] [dry-run] Would claim epochs: {}", join(&batch));
                report.dry_run = batch;
            } else {
                match sender.claim(&batch).await {
                    Ok(()) => {
                        self.store.delete_many(&batch, wallet).await?;
                        report.settled = batch;
                    }
                    Err(e) => {
                        warn!("[CLAIM] Batch claim failed: {:#}", e);
                        self.notifier.notify(&format!("Claim error: {:#}", e));
                        report.failed = batch;
                    }
                }
            }
        }

        self.notifier.notify(&report.summary());
        Ok(report)
    }

    async fn classify(
        &self,
        sender: &dyn SenderConnection,
        claim: &PendingClaim,
        now: u64,
    ) -> Result<Classification> {
        let round = sender.round(claim.epoch).await?;
        if now <= round.close_timestamp {
            return Ok(Classification::NotClosed);
        }

        let claimable = sender.claimable(claim.epoch, claim.wallet).await?;
        if claimable {
            return Ok(Classification::Eligible);
        }
        let refundable = sender.refundable(claim.epoch, claim.wallet).await?;
        if refundable {
            return Ok(Classification::Eligible);
        }
        Ok(Classification::Dead)
    }
}
