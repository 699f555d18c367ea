//! Durable pending-claim storage.
//!
//! The store is the single source of truth for outstanding claim
//! obligations; the engines hold no cache across restarts.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::types::Address;
use tokio::sync::RwLock;
use tracing::warn;

use crate::types::PendingClaim;

/// Create/find/bulk-delete operations keyed by `(epoch, wallet)`.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Record a new pending claim. Creating a record that already exists
    /// is a no-op, preserving the one-open-claim-per-round invariant.
    async fn create(&self, claim: PendingClaim) -> Result<()>;

    /// All pending claims owned by `wallet`.
    async fn find(&self, wallet: Address) -> Result<Vec<PendingClaim>>;

    /// Whether a pending claim exists for `(epoch, wallet)`.
    async fn contains(&self, epoch: u64, wallet: Address) -> Result<bool>;

    /// Remove every claim whose epoch is in `epochs` and is owned by `wallet`.
    async fn delete_many(&self, epochs: &[u64], wallet: Address) -> Result<()>;
}

/// In-memory store, used for dry-run mode and tests.
#[derive(Default)]
pub struct MemoryClaimStore {
    claims: RwLock<Vec<PendingClaim>>,
}

impl MemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClaimStore for MemoryClaimStore {
    async fn create(&self, claim: PendingClaim) -> Result<()> {
        let mut claims = self.claims.write().await;
        if !claims
            .iter()
            .any(|c| c.epoch == claim.epoch && c.wallet == claim.wallet)
        {
            claims.push(claim);
        }
        Ok(())
    }

    async fn find(&self, wallet: Address) -> Result<Vec<PendingClaim>> {
        let claims = self.claims.read().await;
        Ok(claims.iter().filter(|c| c.wallet == wallet).cloned().collect())
    }

    async fn contains(&self, epoch: u64, wallet: Address) -> Result<bool> {
        let claims = self.claims.read().await;
        Ok(claims.iter().any(|c| c.epoch == epoch && c.wallet == wallet))
    }

    async fn delete_many(&self, epochs: &[u64], wallet: Address) -> Result<()> {
        let mut claims = self.claims.write().await;
        claims.retain(|c| c.wallet != wallet || !epochs.contains(&c.epoch));
        Ok(())
    }
}

/// JSON-file-backed store, persisted on every mutation.
pub struct JsonClaimStore {
    path: PathBuf,
    claims: RwLock<Vec<PendingClaim>>,
}

impl JsonClaimStore {
    /// Load existing claims from `path`. A missing file starts empty; an
    /// unreadable file is reported and treated as empty rather than
    /// blocking startup.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let claims = match std::fs::read_to_string(&path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(claims) => claims,
                Err(e) => {
                    warn!("[STORE] Failed to parse {}: {} - starting empty", path.display(), e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self {
            path,
            claims: RwLock::new(claims),
        }
    }

    fn save(&self, claims: &[PendingClaim]) -> Result<()> {
        let json = serde_json::to_string_pretty(claims)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

#[async_trait]
impl ClaimStore for JsonClaimStore {
    async fn create(&self, claim: PendingClaim) -> Result<()> {
        let mut claims = self.claims.write().await;
        if claims
            .iter()
            .any(|c| c.epoch == claim.epoch && c.wallet == claim.wallet)
        {
            return Ok(());
        }
        claims.push(claim);
        self.save(&claims)
    }

    async fn find(&self, wallet: Address) -> Result<Vec<PendingClaim>> {
        let claims = self.claims.read().await;
        Ok(claims.iter().filter(|c| c.wallet == wallet).cloned().collect())
    }

    async fn contains(&self, epoch: u64, wallet: Address) -> Result<bool> {
        let claims = self.claims.read().await;
        Ok(claims.iter().any(|c| c.epoch == epoch && c.wallet == wallet))
    }

    async fn delete_many(&self, epochs: &[u64], wallet: Address) -> Result<()> {
        let mut claims = self.claims.write().await;
        claims.retain(|c| c.wallet != wallet || !epochs.contains(&c.epoch));
        self.save(&claims)
    }
}
