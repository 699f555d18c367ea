//! Remote ledger access.
//!
//! The prediction contract is reached over two independent WebSocket
//! connections: a *listener* that carries the event subscription and a
//! *sender* that carries signed transactions. Both sides are expressed as
//! traits so the supervisor and engines can be exercised against fakes.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use ethers::abi::RawLog;
use ethers::contract::{abigen, EthLogDecode};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Middleware, Provider, Ws};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Filter, U256, U64};
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::types::{BetObservation, BetSide, RoundInfo};

abigen!(
    PancakePrediction,
    r#"[
        event BetBull(address indexed sender, uint256 indexed epoch, uint256 amount)
        event BetBear(address indexed sender, uint256 indexed epoch, uint256 amount)
        function betBull(uint256 epoch) payable
        function betBear(uint256 epoch) payable
        function claim(uint256[] epochs)
        function currentEpoch() view returns (uint256)
        function claimable(uint256 epoch, address user) view returns (bool)
        function refundable(uint256 epoch, address user) view returns (bool)
        function rounds(uint256 epoch) view returns (uint256 epoch, uint256 startTimestamp, uint256 lockTimestamp, uint256 closeTimestamp, int256 lockPrice, int256 closePrice, uint256 lockOracleId, uint256 closeOracleId, uint256 totalAmount, uint256 bullAmount, uint256 bearAmount, uint256 rewardBaseCalAmount, uint256 rewardAmount, bool oracleCalled)
    ]"#
);

/// The event-subscription side of the ledger.
#[async_trait]
pub trait ListenerConnection: Send + Sync {
    /// Cheap round-trip used as the liveness probe.
    async fn current_epoch(&self) -> Result<u64>;

    /// Subscribe to the contract's bet events. The returned channel closes
    /// when the underlying subscription dies.
    async fn subscribe_bets(&self) -> Result<mpsc::UnboundedReceiver<BetObservation>>;

    /// Release the subscription and transport handles.
    async fn close(&self);
}

/// The transaction-submission side of the ledger.
#[async_trait]
pub trait SenderConnection: Send + Sync {
    fn wallet(&self) -> Address;

    /// Cheap round-trip used as the liveness probe.
    async fn current_epoch(&self) -> Result<u64>;

    async fn round(&self, epoch: u64) -> Result<RoundInfo>;

    async fn claimable(&self, epoch: u64, wallet: Address) -> Result<bool>;

    async fn refundable(&self, epoch: u64, wallet: Address) -> Result<bool>;

    /// Submit a bet and await finality of the transaction.
    async fn place_bet(&self, epoch: u64, side: BetSide, amount: U256) -> Result<()>;

    /// Submit one batched settlement call covering all `epochs`.
    async fn claim(&self, epochs: &[u64]) -> Result<()>;

    async fn close(&self);
}

/// Builds fresh connections. Every rebuild goes through here so that no
/// stale handle survives a teardown.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect_listener(&self) -> Result<Arc<dyn ListenerConnection>>;
    async fn connect_sender(&self) -> Result<Arc<dyn SenderConnection>>;
}

/// Production connector backed by ethers WebSocket providers.
pub struct EthersConnector {
    config: Arc<Config>,
}

impl EthersConnector {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for EthersConnector {
    async fn connect_listener(&self) -> Result<Arc<dyn ListenerConnection>> {
        let provider = Provider::<Ws>::connect(&self.config.listener_ws_url)
            .await
            .context("Failed to connect listener WebSocket")?;
        let provider = Arc::new(provider);
        let contract =
            PancakePrediction::new(self.config.prediction_contract, provider.clone());
        info!("[CONN] Listener connected to {}", self.config.listener_ws_url);
        Ok(Arc::new(EthersListener {
            provider,
            contract,
            address: self.config.prediction_contract,
            tasks: std::sync::Mutex::new(Vec::new()),
        }))
    }

    async fn connect_sender(&self) -> Result<Arc<dyn SenderConnection>> {
        let provider = Provider::<Ws>::connect(&self.config.sender_ws_url)
            .await
            .context("Failed to connect sender WebSocket")?;

        let wallet: LocalWallet = match &self.config.private_key {
            Some(key) => key
                .trim()
                .trim_start_matches("0x")
                .parse()
                .context("PRIVATE_KEY is not a valid signing key")?,
            // Dry-run never submits, but the sender side still needs an
            // address for queries and claim bookkeeping.
            None => LocalWallet::new(&mut ethers::core::rand::thread_rng()),
        };
        let wallet = wallet.with_chain_id(self.config.chain_id);
        let wallet_address = wallet.address();

        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        let contract = PancakePrediction::new(self.config.prediction_contract, client);
        info!(
            "[CONN] Sender connected to {} (wallet {:?})",
            self.config.sender_ws_url, wallet_address
        );
        Ok(Arc::new(EthersSender {
            contract,
            wallet_address,
            gas_limit: self.config.bet_gas_limit,
        }))
    }
}

struct EthersListener {
    provider: Arc<Provider<Ws>>,
    contract: PancakePrediction<Provider<Ws>>,
    address: Address,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

#[async_trait]
impl ListenerConnection for EthersListener {
    async fn current_epoch(&self) -> Result<u64> {
        let epoch = self
            .contract
            .current_epoch()
            .call()
            .await
            .context("currentEpoch query failed on listener")?;
        Ok(epoch.as_u64())
    }

    async fn subscribe_bets(&self) -> Result<mpsc::UnboundedReceiver<BetObservation>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let provider = self.provider.clone();
        let address = self.address;

        // The subscription stream borrows the provider, so it lives inside
        // the pump task. The subscribe outcome is reported back through the
        // oneshot so a rejected subscription fails the establish attempt
        // instead of surfacing later as a closed channel.
        let handle = tokio::spawn(async move {
            let filter = Filter::new().address(address);
            let mut stream = match provider.subscribe_logs(&filter).await {
                Ok(s) => {
                    let _ = ready_tx.send(Ok(()));
                    s
                }
                Err(e) => {
                    error!("[CONN] Log subscription failed: {}", e);
                    let _ = ready_tx.send(Err(anyhow!("log subscription failed: {}", e)));
                    return;
                }
            };

            while let Some(log) = stream.next().await {
                let raw = RawLog::from(log);
                let obs = if let Ok(ev) = BetBullFilter::decode_log(&raw) {
                    BetObservation {
                        sender: ev.sender,
                        epoch: ev.epoch.as_u64(),
                        amount: ev.amount,
                        side: BetSide::Bull,
                    }
                } else if let Ok(ev) = BetBearFilter::decode_log(&raw) {
                    BetObservation {
                        sender: ev.sender,
                        epoch: ev.epoch.as_u64(),
                        amount: ev.amount,
                        side: BetSide::Bear,
                    }
                } else {
                    continue;
                };
                if tx.send(obs).is_err() {
                    break;
                }
            }
            info!("[CONN] Listener log stream ended");
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(handle);
        }
        ready_rx
            .await
            .context("Subscription task exited before reporting its outcome")??;
        Ok(rx)
    }

    async fn close(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for handle in tasks.drain(..) {
                handle.abort();
            }
        }
    }
}

struct EthersSender {
    contract: PancakePrediction<SignerMiddleware<Provider<Ws>, LocalWallet>>,
    wallet_address: Address,
    gas_limit: u64,
}

impl EthersSender {
    fn check_receipt(receipt: Option<ethers::types::TransactionReceipt>) -> Result<()> {
        match receipt {
            Some(r) if r.status == Some(U64::from(1)) => Ok(()),
            Some(r) => bail!("Transaction reverted: {:?}", r.transaction_hash),
            None => bail!("Transaction dropped from the mempool"),
        }
    }
}

#[async_trait]
impl SenderConnection for EthersSender {
    fn wallet(&self) -> Address {
        self.wallet_address
    }

    async fn current_epoch(&self) -> Result<u64> {
        let epoch = self
            .contract
            .current_epoch()
            .call()
            .await
            .context("currentEpoch query failed on sender")?;
        Ok(epoch.as_u64())
    }

    async fn round(&self, epoch: u64) -> Result<RoundInfo> {
        let round = self
            .contract
            .rounds(U256::from(epoch))
            .call()
            .await
            .with_context(|| format!("rounds({}) query failed", epoch))?;
        Ok(RoundInfo {
            close_timestamp: round.3.as_u64(),
        })
    }

    async fn claimable(&self, epoch: u64, wallet: Address) -> Result<bool> {
        self.contract
            .claimable(U256::from(epoch), wallet)
            .call()
            .await
            .with_context(|| format!("claimable({}) query failed", epoch))
    }

    async fn refundable(&self, epoch: u64, wallet: Address) -> Result<bool> {
        self.contract
            .refundable(U256::from(epoch), wallet)
            .call()
            .await
            .with_context(|| format!("refundable({}) query failed", epoch))
    }

    async fn place_bet(&self, epoch: u64, side: BetSide, amount: U256) -> Result<()> {
        let call = match side {
            BetSide::Bull => self.contract.bet_bull(U256::from(epoch)),
            BetSide::Bear => self.contract.bet_bear(U256::from(epoch)),
        };
        let call = call.value(amount).gas(self.gas_limit);

        let pending = call
            .send()
            .await
            .with_context(|| format!("{} bet submission failed for epoch {}", side, epoch))?;
        let receipt = pending
            .await
            .with_context(|| format!("Awaiting bet receipt failed for epoch {}", epoch))?;
        Self::check_receipt(receipt)
    }

    async fn claim(&self, epochs: &[u64]) -> Result<()> {
        let epochs: Vec<U256> = epochs.iter().map(|&e| U256::from(e)).collect();
        let call = self.contract.claim(epochs);
        let pending = call
            .send()
            .await
            .context("claim submission failed")?;
        let receipt = pending.await.context("Awaiting claim receipt failed")?;
        Self::check_receipt(receipt)
    }

    async fn close(&self) {
        // Dropping the contract releases the underlying provider.
        info!("[CONN] Sender connection closed");
    }
}
