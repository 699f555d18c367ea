//! Bot supervision.
//!
//! `AutoBot` owns the connection manager, both engines, and every timer
//! task. All fault signals funnel into a single control loop so that
//! rebuilds are serialized and bursts of simultaneous triggers collapse
//! into one recovery cycle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use ethers::types::{Address, U256};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::chain::Connector;
use crate::claims::ClaimEngine;
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::heartbeat::HeartbeatProber;
use crate::mirror::{MirrorEngine, MirrorOutcome};
use crate::notify::Notifier;
use crate::store::ClaimStore;
use crate::types::{unix_now, BetObservation, BetSide};
use crate::watchdog::Watchdog;

/// Pause between the stop and start halves of a full restart.
const RESTART_PAUSE: Duration = Duration::from_secs(5);

/// Signals handled by the supervisor's control loop.
#[derive(Debug)]
pub enum ControlMsg {
    /// Tear down and recreate both connections.
    Rebuild(String),
    /// Full stop-then-start cycle.
    Restart(String),
    /// Run a reconciliation pass now.
    Reconcile,
    /// Exit the control loop.
    Shutdown,
}

/// Operator-facing status snapshot. Connection health is probed live,
/// not read from a cached flag.
#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    pub running: bool,
    pub listener_connected: bool,
    pub sender_connected: bool,
    pub wallet: Option<Address>,
    pub last_epoch: Option<u64>,
    pub pending_claims: usize,
    pub dry_run: bool,
}

pub struct AutoBot {
    inner: Arc<BotInner>,
}

struct BotInner {
    config: Arc<Config>,
    manager: Arc<ConnectionManager>,
    store: Arc<dyn ClaimStore>,
    notifier: Arc<dyn Notifier>,
    mirror: MirrorEngine,
    claims: ClaimEngine,
    running: AtomicBool,
    last_activity: Arc<AtomicU64>,
    /// Most recently observed epoch; 0 means none yet.
    last_epoch: AtomicU64,
    /// Serializes all mutating calls (bet submission vs. claim settlement)
    /// so they never race on the wallet's transaction sequence.
    tx_lock: Mutex<()>,
    control_tx: mpsc::UnboundedSender<ControlMsg>,
    timers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    core_tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl AutoBot {
    /// Wire up the bot. Must be called within a tokio runtime: the event
    /// and control loops are spawned here and live until `shutdown`.
    pub fn new(
        config: Arc<Config>,
        connector: Arc<dyn Connector>,
        store: Arc<dyn ClaimStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (manager, events_rx) = ConnectionManager::new(
            connector,
            notifier.clone(),
            config.clone(),
            control_tx.clone(),
        );

        let inner = Arc::new(BotInner {
            mirror: MirrorEngine::new(config.clone(), store.clone(), notifier.clone()),
            claims: ClaimEngine::new(config.clone(), store.clone(), notifier.clone()),
            config,
            manager,
            store,
            notifier,
            running: AtomicBool::new(false),
            last_activity: Arc::new(AtomicU64::new(unix_now())),
            last_epoch: AtomicU64::new(0),
            tx_lock: Mutex::new(()),
            control_tx,
            timers: std::sync::Mutex::new(Vec::new()),
            core_tasks: std::sync::Mutex::new(Vec::new()),
        });

        let event_task = tokio::spawn(event_loop(inner.clone(), events_rx));
        let control_task = tokio::spawn(control_loop(inner.clone(), control_rx));
        if let Ok(mut core) = inner.core_tasks.lock() {
            core.push(event_task);
            core.push(control_task);
        }

        Self { inner }
    }

    /// Establish connections and start all supervision timers.
    ///
    /// A connection failure here is routed through the rebuild path rather
    /// than aborting: only configuration faults are fatal, and those were
    /// rejected when the `Config` was built.
    pub async fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            self.inner.notifier.notify("Bot is already running");
            return Ok(());
        }

        self.inner.notifier.notify("Bot starting...");
        self.inner.touch_activity();

        match self.inner.manager.establish().await {
            Ok(()) => {
                self.inner.notifier.notify(&format!(
                    "Bot started successfully at {}. Monitoring prediction events...",
                    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
                ));
            }
            Err(e) => {
                warn!("[MAIN] Initial connection failed: {:#}", e);
                let _ = self
                    .inner
                    .control_tx
                    .send(ControlMsg::Rebuild(format!("initial connection failed: {}", e)));
            }
        }

        self.inner.spawn_timers();
        Ok(())
    }

    /// Cancel all timers, then release the connections.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.notifier.notify("Bot stopping...");
        self.inner.halt_timers();
        self.inner.manager.teardown().await;
        self.inner.notifier.notify("Bot stopped");
    }

    /// Stop and dismantle the event/control loops. The bot cannot be
    /// started again afterwards.
    pub async fn shutdown(&self) {
        self.stop().await;
        let _ = self.inner.control_tx.send(ControlMsg::Shutdown);
        if let Ok(mut core) = self.inner.core_tasks.lock() {
            for task in core.drain(..) {
                task.abort();
            }
        }
    }

    pub async fn status(&self) -> BotStatus {
        let (listener_connected, sender_connected) = self.inner.manager.probe_each().await;
        let wallet = self.inner.manager.sender().await.map(|s| s.wallet());
        let pending_claims = match wallet {
            Some(w) => self
                .inner
                .store
                .find(w)
                .await
                .map(|claims| claims.len())
                .unwrap_or(0),
            None => 0,
        };
        let last_epoch = match self.inner.last_epoch.load(Ordering::Acquire) {
            0 => None,
            epoch => Some(epoch),
        };
        BotStatus {
            running: self.inner.running.load(Ordering::SeqCst),
            listener_connected,
            sender_connected,
            wallet,
            last_epoch,
            pending_claims,
            dry_run: self.inner.config.dry_run,
        }
    }

    /// Manual bet override. Uses the configured default stake when
    /// `amount` is not given.
    pub async fn place_bet(
        &self,
        epoch: u64,
        amount: Option<U256>,
        side: BetSide,
    ) -> Result<()> {
        if !self.inner.running.load(Ordering::SeqCst) {
            bail!("Bot is not running");
        }
        let amount = amount.unwrap_or(self.inner.config.bet_amount);

        if self.inner.config.dry_run {
            self.inner.notifier.notify(&format!(
                "[dry-run] Would place manual {} bet of {} on epoch {}",
                side, amount, epoch
            ));
            return Ok(());
        }

        let _guard = self.inner.tx_lock.lock().await;
        let sender = self
            .inner
            .manager
            .sender()
            .await
            .ok_or_else(|| anyhow!("sender connection not established"))?;
        self.inner
            .mirror
            .submit(sender.as_ref(), epoch, side, amount)
            .await?;
        self.inner.touch_activity();
        Ok(())
    }

    /// Request a reconciliation pass outside the regular cadence.
    pub fn reconcile_now(&self) {
        let _ = self.inner.control_tx.send(ControlMsg::Reconcile);
    }
}

impl BotInner {
    fn touch_activity(&self) {
        self.last_activity.store(unix_now(), Ordering::Release);
    }

    fn spawn_timers(self: &Arc<Self>) {
        let heartbeat = HeartbeatProber::new(
            self.manager.clone(),
            self.control_tx.clone(),
            self.last_activity.clone(),
            self.config.heartbeat_interval,
        )
        .spawn();

        let watchdog = Watchdog::new(
            self.control_tx.clone(),
            self.last_activity.clone(),
            self.config.watchdog_window,
        )
        .spawn();

        let reconcile = {
            let inner = self.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(inner.config.claim_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    inner.run_reconcile().await;
                }
            })
        };

        let restart = {
            let control_tx = self.control_tx.clone();
            let period = self.config.restart_interval;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(period).await;
                    info!("[MAIN] Scheduled restart timer fired");
                    let _ = control_tx.send(ControlMsg::Restart("scheduled restart".to_string()));
                }
            })
        };

        if let Ok(mut timers) = self.timers.lock() {
            timers.extend([heartbeat, watchdog, reconcile, restart]);
        }
    }

    fn halt_timers(&self) {
        if let Ok(mut timers) = self.timers.lock() {
            for timer in timers.drain(..) {
                timer.abort();
            }
        }
    }

    async fn run_reconcile(&self) {
        let _guard = self.tx_lock.lock().await;
        let Some(sender) = self.manager.sender().await else {
            debug!("[CLAIM] Skipping reconciliation: sender not connected");
            return;
        };
        match self.claims.reconcile(sender.as_ref(), unix_now()).await {
            Ok(report) => {
                if !report.settled.is_empty() {
                    self.touch_activity();
                }
            }
            Err(e) => {
                error!("[CLAIM] Reconciliation pass failed: {:#}", e);
                self.notifier
                    .notify(&format!("Error claiming rewards: {:#}", e));
            }
        }
    }

    /// Full stop-then-start cycle, keeping the event and control loops
    /// alive across it.
    async fn restart(self: &Arc<Self>, reason: &str) {
        self.notifier
            .notify(&format!("Performing full restart: {}", reason));
        self.halt_timers();
        {
            let _guard = self.tx_lock.lock().await;
            self.manager.teardown().await;
            tokio::time::sleep(RESTART_PAUSE).await;
            self.touch_activity();

            match self.manager.establish().await {
                Ok(()) => self.notifier.notify("Restart complete"),
                Err(e) => {
                    warn!("[MAIN] Restart connection failed: {:#}", e);
                    let _ = self
                        .control_tx
                        .send(ControlMsg::Rebuild(format!("restart failed: {}", e)));
                }
            }
        }
        self.spawn_timers();
    }

    /// Irrecoverable fault: stop everything and tell the operator.
    async fn terminal_stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.halt_timers();
        self.manager.teardown().await;
        self.notifier.notify("Bot stopped");
    }
}

/// Single consumer of the feed channel. Events are handled to completion,
/// one at a time, which serializes replication per connection.
async fn event_loop(
    inner: Arc<BotInner>,
    mut events_rx: mpsc::UnboundedReceiver<BetObservation>,
) {
    while let Some(obs) = events_rx.recv().await {
        if !inner.running.load(Ordering::SeqCst) {
            continue;
        }
        inner.touch_activity();
        inner.last_epoch.store(obs.epoch, Ordering::Release);

        // The lock is shared with the rebuild path, so no submission can
        // start while connections are being torn down or replaced.
        let _guard = inner.tx_lock.lock().await;

        // Never replicate on a known-bad connection: a submission on a
        // stale transport risks an unobservable duplicate or loss.
        if let Err(e) = inner.manager.verify().await {
            warn!("[MAIN] Dropping event for epoch {}: {:#}", obs.epoch, e);
            let _ = inner
                .control_tx
                .send(ControlMsg::Rebuild(format!("health check failed: {}", e)));
            continue;
        }
        // Fetched under the lock: always the handle the manager owns now.
        let Some(sender) = inner.manager.sender().await else {
            continue;
        };
        match inner.mirror.handle_event(sender.as_ref(), &obs).await {
            Ok(MirrorOutcome::Mirrored { epoch, amount }) => {
                info!("[MIRROR] Replicated epoch {} with stake {}", epoch, amount);
                inner.touch_activity();
            }
            Ok(_) => {}
            Err(e) => {
                // Already notified by the engine; a failed bet must never
                // block future events.
                error!("[MIRROR] Replication failed for epoch {}: {:#}", obs.epoch, e);
            }
        }
    }
    debug!("[MAIN] Event loop finished");
}

async fn control_loop(inner: Arc<BotInner>, mut control_rx: mpsc::UnboundedReceiver<ControlMsg>) {
    let mut backlog: VecDeque<ControlMsg> = VecDeque::new();
    loop {
        let msg = match backlog.pop_front() {
            Some(msg) => msg,
            None => match control_rx.recv().await {
                Some(msg) => msg,
                None => break,
            },
        };

        match msg {
            ControlMsg::Shutdown => break,
            _ if !inner.running.load(Ordering::SeqCst) => continue,
            ControlMsg::Rebuild(reason) => {
                // Holding the transaction lock across the rebuild keeps
                // every submission out of the teardown window.
                let rebuild_result = {
                    let _guard = inner.tx_lock.lock().await;
                    inner.manager.rebuild(&reason).await
                };
                match rebuild_result {
                    Ok(()) => {
                        inner.touch_activity();
                        // Faults that piled up while rebuilding are covered
                        // by the cycle that just completed.
                        while let Ok(queued) = control_rx.try_recv() {
                            match queued {
                                ControlMsg::Rebuild(r) => {
                                    debug!("[MAIN] Coalesced rebuild trigger: {}", r)
                                }
                                other => backlog.push_back(other),
                            }
                        }
                    }
                    Err(e) => {
                        error!("[MAIN] {:#}", e);
                        inner
                            .notifier
                            .notify(&format!("{:#}. Stopping bot.", e));
                        inner.terminal_stop().await;
                    }
                }
            }
            ControlMsg::Restart(reason) => inner.restart(&reason).await,
            ControlMsg::Reconcile => inner.run_reconcile().await,
        }
    }
    debug!("[MAIN] Control loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::SenderConnection;
    use crate::store::MemoryClaimStore;
    use crate::testutil::{target_bet, test_config, CollectingNotifier, FakeConnector};

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    fn make_bot(
        connector: Arc<FakeConnector>,
        config: crate::config::Config,
    ) -> (AutoBot, Arc<MemoryClaimStore>, Arc<CollectingNotifier>) {
        let store = Arc::new(MemoryClaimStore::new());
        let notifier = Arc::new(CollectingNotifier::default());
        let bot = AutoBot::new(
            Arc::new(config),
            connector,
            store.clone(),
            notifier.clone(),
        );
        (bot, store, notifier)
    }

    #[tokio::test]
    async fn mirrors_a_target_bet_end_to_end() {
        let connector = Arc::new(FakeConnector::default());
        let (bot, store, _) = make_bot(connector.clone(), test_config());

        bot.start().await.unwrap();
        connector.listener().push_bet(target_bet(7, 1000));
        settle().await;

        let sender = connector.sender();
        assert_eq!(
            sender.bets(),
            vec![(7, BetSide::Bull, U256::from(100))]
        );
        assert!(store.contains(7, sender.wallet()).await.unwrap());

        // A second event for the same epoch yields no further submission.
        connector.listener().push_bet(target_bet(7, 1000));
        settle().await;
        assert_eq!(sender.bets().len(), 1);

        let status = bot.status().await;
        assert!(status.running);
        assert!(status.listener_connected && status.sender_connected);
        assert_eq!(status.last_epoch, Some(7));
        assert_eq!(status.pending_claims, 1);

        bot.shutdown().await;
        let status = bot.status().await;
        assert!(!status.running);
        assert!(!status.listener_connected && !status.sender_connected);
    }

    #[tokio::test]
    async fn replication_resumes_on_the_rebuilt_connection() {
        let connector = Arc::new(FakeConnector::default());
        let (bot, store, _) = make_bot(connector.clone(), test_config());

        bot.start().await.unwrap();
        let stale = connector.sender();

        // Wedge the current sender and hand out a fresh one on reconnect.
        connector.rotate_senders(true);
        stale.fail_epoch_queries(true);
        connector.listener().push_bet(target_bet(7, 1000));
        settle().await;

        // The event observed on the bad connection is dropped; nothing is
        // ever submitted through the replaced handle.
        assert!(stale.bets().is_empty());

        connector.listener().push_bet(target_bet(8, 1000));
        settle().await;

        let fresh = connector.sender();
        assert!(!Arc::ptr_eq(&stale, &fresh));
        assert_eq!(fresh.bets(), vec![(8, BetSide::Bull, U256::from(100))]);
        assert!(store.contains(8, fresh.wallet()).await.unwrap());
        bot.shutdown().await;
    }

    #[tokio::test]
    async fn manual_place_bet_records_a_pending_claim() {
        let connector = Arc::new(FakeConnector::default());
        let (bot, store, _) = make_bot(connector.clone(), test_config());

        bot.start().await.unwrap();
        bot.place_bet(5, None, BetSide::Bear).await.unwrap();

        let sender = connector.sender();
        let bets = sender.bets();
        assert_eq!(bets.len(), 1);
        assert_eq!(bets[0].0, 5);
        assert_eq!(bets[0].1, BetSide::Bear);
        assert_eq!(bets[0].2, test_config().bet_amount);
        assert!(store.contains(5, sender.wallet()).await.unwrap());

        bot.shutdown().await;
    }

    #[tokio::test]
    async fn place_bet_requires_a_running_bot() {
        let connector = Arc::new(FakeConnector::default());
        let (bot, _, _) = make_bot(connector, test_config());

        let err = bot.place_bet(5, None, BetSide::Bull).await.unwrap_err();
        assert!(err.to_string().contains("not running"));
        bot.shutdown().await;
    }

    #[tokio::test]
    async fn exhausted_reconnects_stop_the_bot_with_a_terminal_notice() {
        let connector = Arc::new(FakeConnector::default());
        connector.fail_connects(u32::MAX);
        let mut config = test_config();
        config.max_reconnect_attempts = 2;
        let (bot, _, notifier) = make_bot(connector, config);

        bot.start().await.unwrap();
        settle().await;

        assert!(!bot.status().await.running);
        assert!(notifier
            .messages()
            .iter()
            .any(|m| m.contains("Max reconnection attempts")));
        bot.shutdown().await;
    }

    #[tokio::test]
    async fn reconcile_now_settles_eligible_claims() {
        let connector = Arc::new(FakeConnector::default());
        let (bot, store, _) = make_bot(connector.clone(), test_config());
        let sender = connector.sender();

        store
            .create(crate::types::PendingClaim::new(3, sender.wallet()))
            .await
            .unwrap();
        sender.set_round(3, crate::types::RoundInfo { close_timestamp: 1 });
        sender.set_claimable(3);

        bot.start().await.unwrap();
        bot.reconcile_now();
        settle().await;

        assert_eq!(sender.claim_calls(), vec![vec![3]]);
        assert!(!store.contains(3, sender.wallet()).await.unwrap());
        bot.shutdown().await;
    }
}
