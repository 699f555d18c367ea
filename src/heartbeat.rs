//! Heartbeat probing for connection health.
//!
//! A transport can report "connected" while its data path is wedged; the
//! periodic round-trip probe is the only mechanism that notices a feed
//! that went silent without an explicit close or error event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::connection::ConnectionManager;
use crate::supervisor::ControlMsg;
use crate::types::unix_now;

pub struct HeartbeatProber {
    manager: Arc<ConnectionManager>,
    control_tx: mpsc::UnboundedSender<ControlMsg>,
    last_activity: Arc<AtomicU64>,
    interval: Duration,
}

impl HeartbeatProber {
    pub fn new(
        manager: Arc<ConnectionManager>,
        control_tx: mpsc::UnboundedSender<ControlMsg>,
        last_activity: Arc<AtomicU64>,
        interval: Duration,
    ) -> Self {
        Self {
            manager,
            control_tx,
            last_activity,
            interval,
        }
    }

    /// Run one probe. A healthy probe counts as activity; a failed probe
    /// requests a rebuild. Returns whether the probe succeeded.
    pub async fn probe_once(&self) -> bool {
        match self.manager.verify().await {
            Ok(()) => {
                debug!("[HEARTBEAT] Both connections active");
                self.last_activity.store(unix_now(), Ordering::Release);
                true
            }
            Err(e) => {
                warn!("[HEARTBEAT] Probe failed: {:#}", e);
                let _ = self
                    .control_tx
                    .send(ControlMsg::Rebuild(format!("heartbeat failed: {}", e)));
                false
            }
        }
    }

    /// Start the fixed-interval probe loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; the connections were just
            // established, so skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.probe_once().await;
            }
        })
    }
}
