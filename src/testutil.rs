//! Shared fakes for unit tests: an in-memory connector pair plus a
//! collecting notifier. Production code never touches this module.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use ethers::types::{Address, U256};
use tokio::sync::mpsc;

use crate::chain::{Connector, ListenerConnection, SenderConnection};
use crate::config::{Config, ZeroStakePolicy};
use crate::notify::Notifier;
use crate::types::{BetObservation, BetSide, RoundInfo};

/// The mirrored account used across tests.
pub const TARGET: Address = Address::repeat_byte(0x42);

pub fn test_config() -> Config {
    Config {
        listener_ws_url: "ws://127.0.0.1:8546".to_string(),
        sender_ws_url: "ws://127.0.0.1:8547".to_string(),
        prediction_contract: Address::repeat_byte(0x01),
        target_address: TARGET,
        private_key: None,
        chain_id: 56,
        bet_amount: U256::from(1_000_000u64),
        mirror_divisor: 10,
        zero_stake: ZeroStakePolicy::Skip,
        bet_gas_limit: 500_000,
        heartbeat_interval: Duration::from_secs(30),
        watchdog_window: Duration::from_secs(900),
        claim_interval: Duration::from_secs(600),
        max_reconnect_attempts: 10,
        reconnect_base_delay: Duration::from_millis(1),
        reconnect_max_delay: Duration::from_millis(5),
        restart_interval: Duration::from_secs(24 * 3600),
        claims_file: std::env::temp_dir().join("mirrorbet-test-claims.json"),
        dry_run: false,
        telegram_bot_token: None,
        telegram_chat_id: None,
    }
}

/// A bull bet from the tracked account.
pub fn target_bet(epoch: u64, amount: u64) -> BetObservation {
    BetObservation {
        sender: TARGET,
        epoch,
        amount: U256::from(amount),
        side: BetSide::Bull,
    }
}

#[derive(Default)]
pub struct CollectingNotifier {
    messages: Mutex<Vec<String>>,
}

impl CollectingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }
}

pub struct FakeListener {
    epoch: AtomicU64,
    fail_epoch: AtomicBool,
    fail_subscribe: AtomicBool,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<BetObservation>>>,
}

impl Default for FakeListener {
    fn default() -> Self {
        Self {
            epoch: AtomicU64::new(100),
            fail_epoch: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl FakeListener {
    pub fn fail_epoch_queries(&self, fail: bool) {
        self.fail_epoch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscribes(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Deliver an event to every live subscription.
    pub fn push_bet(&self, obs: BetObservation) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(obs.clone()).is_ok());
    }
}

#[async_trait]
impl ListenerConnection for FakeListener {
    async fn current_epoch(&self) -> Result<u64> {
        if self.fail_epoch.load(Ordering::SeqCst) {
            bail!("listener rpc down");
        }
        Ok(self.epoch.load(Ordering::SeqCst))
    }

    async fn subscribe_bets(&self) -> Result<mpsc::UnboundedReceiver<BetObservation>> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            bail!("log subscription refused");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        Ok(rx)
    }

    async fn close(&self) {
        self.subscribers.lock().unwrap().clear();
    }
}

pub struct FakeSender {
    wallet: Address,
    epoch: AtomicU64,
    fail_epoch: AtomicBool,
    fail_bet: AtomicBool,
    fail_claim: AtomicBool,
    bets: Mutex<Vec<(u64, BetSide, U256)>>,
    claim_calls: Mutex<Vec<Vec<u64>>>,
    rounds: Mutex<HashMap<u64, RoundInfo>>,
    round_faults: Mutex<HashSet<u64>>,
    claimable: Mutex<HashSet<u64>>,
    refundable: Mutex<HashSet<u64>>,
}

impl Default for FakeSender {
    fn default() -> Self {
        Self {
            wallet: Address::repeat_byte(0xAA),
            epoch: AtomicU64::new(100),
            fail_epoch: AtomicBool::new(false),
            fail_bet: AtomicBool::new(false),
            fail_claim: AtomicBool::new(false),
            bets: Mutex::new(Vec::new()),
            claim_calls: Mutex::new(Vec::new()),
            rounds: Mutex::new(HashMap::new()),
            round_faults: Mutex::new(HashSet::new()),
            claimable: Mutex::new(HashSet::new()),
            refundable: Mutex::new(HashSet::new()),
        }
    }
}

impl FakeSender {
    pub fn bets(&self) -> Vec<(u64, BetSide, U256)> {
        self.bets.lock().unwrap().clone()
    }

    pub fn claim_calls(&self) -> Vec<Vec<u64>> {
        self.claim_calls.lock().unwrap().clone()
    }

    pub fn fail_epoch_queries(&self, fail: bool) {
        self.fail_epoch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_bets(&self, fail: bool) {
        self.fail_bet.store(fail, Ordering::SeqCst);
    }

    pub fn fail_claims(&self, fail: bool) {
        self.fail_claim.store(fail, Ordering::SeqCst);
    }

    pub fn set_round(&self, epoch: u64, round: RoundInfo) {
        self.rounds.lock().unwrap().insert(epoch, round);
    }

    pub fn fail_round_query(&self, epoch: u64) {
        self.round_faults.lock().unwrap().insert(epoch);
    }

    pub fn set_claimable(&self, epoch: u64) {
        self.claimable.lock().unwrap().insert(epoch);
    }

    pub fn set_refundable(&self, epoch: u64) {
        self.refundable.lock().unwrap().insert(epoch);
    }
}

#[async_trait]
impl SenderConnection for FakeSender {
    fn wallet(&self) -> Address {
        self.wallet
    }

    async fn current_epoch(&self) -> Result<u64> {
        if self.fail_epoch.load(Ordering::SeqCst) {
            bail!("sender rpc down");
        }
        Ok(self.epoch.load(Ordering::SeqCst))
    }

    async fn round(&self, epoch: u64) -> Result<RoundInfo> {
        if self.round_faults.lock().unwrap().contains(&epoch) {
            bail!("rounds({}) query timed out", epoch);
        }
        match self.rounds.lock().unwrap().get(&epoch) {
            Some(round) => Ok(round.clone()),
            None => bail!("unknown round {}", epoch),
        }
    }

    async fn claimable(&self, epoch: u64, _wallet: Address) -> Result<bool> {
        Ok(self.claimable.lock().unwrap().contains(&epoch))
    }

    async fn refundable(&self, epoch: u64, _wallet: Address) -> Result<bool> {
        Ok(self.refundable.lock().unwrap().contains(&epoch))
    }

    async fn place_bet(&self, epoch: u64, side: BetSide, amount: U256) -> Result<()> {
        if self.fail_bet.load(Ordering::SeqCst) {
            bail!("execution reverted");
        }
        self.bets.lock().unwrap().push((epoch, side, amount));
        Ok(())
    }

    async fn claim(&self, epochs: &[u64]) -> Result<()> {
        if self.fail_claim.load(Ordering::SeqCst) {
            bail!("claim reverted");
        }
        self.claim_calls.lock().unwrap().push(epochs.to_vec());
        Ok(())
    }

    async fn close(&self) {}
}

/// Connector handing out one shared listener/sender pair. Connect calls
/// are counted, can be made to fail, and can be delayed to widen race
/// windows in coalescing tests.
pub struct FakeConnector {
    listener: Arc<FakeListener>,
    sender: Mutex<Arc<FakeSender>>,
    rotate_senders: AtomicBool,
    connects: AtomicU32,
    fail_remaining: AtomicU32,
    connect_delay: Mutex<Duration>,
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self {
            listener: Arc::new(FakeListener::default()),
            sender: Mutex::new(Arc::new(FakeSender::default())),
            rotate_senders: AtomicBool::new(false),
            connects: AtomicU32::new(0),
            fail_remaining: AtomicU32::new(0),
            connect_delay: Mutex::new(Duration::ZERO),
        }
    }
}

impl FakeConnector {
    pub fn listener(&self) -> Arc<FakeListener> {
        self.listener.clone()
    }

    /// The sender most recently handed out.
    pub fn sender(&self) -> Arc<FakeSender> {
        self.sender.lock().unwrap().clone()
    }

    /// Hand out a fresh sender on every connect instead of reusing one.
    pub fn rotate_senders(&self, rotate: bool) {
        self.rotate_senders.store(rotate, Ordering::SeqCst);
    }

    /// Total connect calls, listener and sender combined.
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Make the next `n` connect calls fail.
    pub fn fail_connects(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    async fn connect_prelude(&self) -> Result<()> {
        let delay = *self.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            bail!("connection refused");
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect_listener(&self) -> Result<Arc<dyn ListenerConnection>> {
        self.connect_prelude().await?;
        Ok(self.listener.clone())
    }

    async fn connect_sender(&self) -> Result<Arc<dyn SenderConnection>> {
        self.connect_prelude().await?;
        let mut current = self.sender.lock().unwrap();
        if self.rotate_senders.load(Ordering::SeqCst) {
            *current = Arc::new(FakeSender::default());
        }
        Ok(current.clone())
    }
}
