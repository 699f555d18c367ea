//! Connection lifecycle management.
//!
//! Owns the listener and sender connections, tears them down and rebuilds
//! them with bounded exponential backoff, and re-attaches the event
//! subscription after every rebuild. No other component retains a
//! connection handle across a rebuild.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chain::{Connector, ListenerConnection, SenderConnection};
use crate::config::Config;
use crate::notify::Notifier;
use crate::supervisor::ControlMsg;
use crate::types::BetObservation;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Stopped,
    Connecting,
    Connected,
    Rebuilding,
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    notifier: Arc<dyn Notifier>,
    config: Arc<Config>,
    listener: RwLock<Option<Arc<dyn ListenerConnection>>>,
    sender: RwLock<Option<Arc<dyn SenderConnection>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    state: std::sync::Mutex<ConnState>,
    attempts: AtomicU32,
    /// Held for the duration of a rebuild; concurrent triggers coalesce
    /// into the in-flight attempt instead of starting a second one.
    rebuild_gate: Mutex<()>,
    events_tx: mpsc::UnboundedSender<BetObservation>,
    control_tx: mpsc::UnboundedSender<ControlMsg>,
}

impl ConnectionManager {
    /// Returns the manager plus the long-lived event channel that survives
    /// rebuilds. Each established listener pumps into the same channel.
    pub fn new(
        connector: Arc<dyn Connector>,
        notifier: Arc<dyn Notifier>,
        config: Arc<Config>,
        control_tx: mpsc::UnboundedSender<ControlMsg>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<BetObservation>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            connector,
            notifier,
            config,
            listener: RwLock::new(None),
            sender: RwLock::new(None),
            pump: Mutex::new(None),
            state: std::sync::Mutex::new(ConnState::Stopped),
            attempts: AtomicU32::new(0),
            rebuild_gate: Mutex::new(()),
            events_tx,
            control_tx,
        });
        (manager, events_rx)
    }

    pub fn state(&self) -> ConnState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(ConnState::Stopped)
    }

    fn set_state(&self, next: ConnState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    pub async fn listener(&self) -> Option<Arc<dyn ListenerConnection>> {
        self.listener.read().await.clone()
    }

    pub async fn sender(&self) -> Option<Arc<dyn SenderConnection>> {
        self.sender.read().await.clone()
    }

    /// Build both connections and attach the feed subscription.
    pub async fn establish(&self) -> Result<()> {
        self.set_state(ConnState::Connecting);

        let listener = self.connector.connect_listener().await?;
        let sender = self.connector.connect_sender().await?;
        let mut feed = listener.subscribe_bets().await?;

        // Forward decoded events into the permanent channel. When the
        // subscription dies the feed closes and we raise a transport fault.
        let events_tx = self.events_tx.clone();
        let control_tx = self.control_tx.clone();
        let pump = tokio::spawn(async move {
            while let Some(obs) = feed.recv().await {
                if events_tx.send(obs).is_err() {
                    return;
                }
            }
            warn!("[CONN] Listener event stream closed");
            let _ = control_tx.send(ControlMsg::Rebuild(
                "listener event stream closed".to_string(),
            ));
        });

        if let Some(old) = self.pump.lock().await.replace(pump) {
            old.abort();
        }
        *self.listener.write().await = Some(listener);
        *self.sender.write().await = Some(sender);

        self.set_state(ConnState::Connected);
        info!("[CONN] Both connections established");
        Ok(())
    }

    /// Release all handles. Teardown failures are logged and swallowed,
    /// never fatal.
    pub async fn teardown(&self) {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        if let Some(listener) = self.listener.write().await.take() {
            listener.close().await;
        }
        if let Some(sender) = self.sender.write().await.take() {
            sender.close().await;
        }
        debug!("[CONN] Connections torn down");
    }

    /// Issue the cheap round-trip probe on both connections. Healthy only
    /// if both succeed; a single transport-level "connected" flag is not
    /// trusted.
    pub async fn verify(&self) -> Result<()> {
        let listener = self
            .listener()
            .await
            .ok_or_else(|| anyhow!("listener connection not established"))?;
        let sender = self
            .sender()
            .await
            .ok_or_else(|| anyhow!("sender connection not established"))?;

        let (listener_epoch, _) =
            tokio::try_join!(listener.current_epoch(), sender.current_epoch())?;
        debug!("[CONN] Health check passed (epoch {})", listener_epoch);
        Ok(())
    }

    /// Probe each connection independently for the status surface.
    pub async fn probe_each(&self) -> (bool, bool) {
        let listener_ok = match self.listener().await {
            Some(l) => l.current_epoch().await.is_ok(),
            None => false,
        };
        let sender_ok = match self.sender().await {
            Some(s) => s.current_epoch().await.is_ok(),
            None => false,
        };
        (listener_ok, sender_ok)
    }

    /// Full teardown-and-recreate cycle with bounded exponential backoff.
    ///
    /// Idempotent under concurrent triggers: if a rebuild is already in
    /// flight this returns immediately. Exhausting the attempt budget
    /// returns an error; the supervisor treats that as terminal.
    pub async fn rebuild(&self, reason: &str) -> Result<()> {
        let _gate = match self.rebuild_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => {
                debug!("[CONN] Rebuild already in progress; coalescing ({})", reason);
                return Ok(());
            }
        };

        warn!("[CONN] Rebuilding connections: {}", reason);
        self.notifier
            .notify(&format!("Connection fault ({}). Reconnecting...", reason));
        self.set_state(ConnState::Rebuilding);

        let max_attempts = self.config.max_reconnect_attempts;
        for attempt in 1..=max_attempts {
            self.attempts.store(attempt, Ordering::Release);
            self.teardown().await;

            let result = match self.establish().await {
                Ok(()) => self.verify().await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    self.attempts.store(0, Ordering::Release);
                    self.set_state(ConnState::Connected);
                    info!("[CONN] Reconnection successful (attempt {})", attempt);
                    self.notifier.notify("Reconnection successful");
                    return Ok(());
                }
                Err(e) => {
                    self.set_state(ConnState::Rebuilding);
                    warn!(
                        "[CONN] Reconnection attempt {}/{} failed: {:#}",
                        attempt, max_attempts, e
                    );
                    if attempt < max_attempts {
                        let delay = backoff_delay(
                            attempt,
                            self.config.reconnect_base_delay,
                            self.config.reconnect_max_delay,
                        );
                        self.notifier.notify(&format!(
                            "Reconnection attempt {}/{} failed. Trying again in {}s...",
                            attempt,
                            max_attempts,
                            delay.as_secs()
                        ));
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.teardown().await;
        self.set_state(ConnState::Stopped);
        bail!("Max reconnection attempts ({}) exceeded", max_attempts)
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }
}

/// Exponential backoff seeded at `base`, growing by 1.5x per attempt,
/// capped at `cap`.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 1.5_f64.powi(attempt.saturating_sub(1) as i32);
    let delay = base.as_secs_f64() * factor;
    Duration::from_secs_f64(delay.min(cap.as_secs_f64()))
}
