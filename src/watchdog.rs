//! Inactivity watchdog.
//!
//! Recovers from states where both connections report healthy but the
//! subscription has silently detached: if nothing has happened for the
//! configured window, a full stop-then-start cycle is requested rather
//! than an incremental rebuild, since the root cause is unknown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::supervisor::ControlMsg;
use crate::types::unix_now;

const CHECK_INTERVAL: Duration = Duration::from_secs(60);

pub struct Watchdog {
    control_tx: mpsc::UnboundedSender<ControlMsg>,
    last_activity: Arc<AtomicU64>,
    window: Duration,
}

impl Watchdog {
    pub fn new(
        control_tx: mpsc::UnboundedSender<ControlMsg>,
        last_activity: Arc<AtomicU64>,
        window: Duration,
    ) -> Self {
        Self {
            control_tx,
            last_activity,
            window,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CHECK_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let last = self.last_activity.load(Ordering::Acquire);
                let now = unix_now();
                if tripped(last, now, self.window) {
                    let inactive_mins = now.saturating_sub(last) / 60;
                    warn!(
                        "[WATCHDOG] No activity for {} minutes; forcing restart",
                        inactive_mins
                    );
                    let _ = self.control_tx.send(ControlMsg::Restart(format!(
                        "no activity for {} minutes",
                        inactive_mins
                    )));
                    // Avoid a second trigger while the restart is underway.
                    self.last_activity.store(now, Ordering::Release);
                }
            }
        })
    }
}

/// Whether the inactivity window has been exceeded.
pub fn tripped(last_activity: u64, now: u64, window: Duration) -> bool {
    now.saturating_sub(last_activity) > window.as_secs()
}
