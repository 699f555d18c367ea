use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use mirrorbet::chain::EthersConnector;
use mirrorbet::config::Config;
use mirrorbet::notify::{LogNotifier, Notifier, TelegramNotifier};
use mirrorbet::store::{ClaimStore, JsonClaimStore, MemoryClaimStore};
use mirrorbet::supervisor::AutoBot;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(Config::from_env().context("Failed to load configuration")?);
    info!(
        "[MAIN] Starting mirrorbet (target {:?}, contract {:?}, dry_run={})",
        config.target_address, config.prediction_contract, config.dry_run
    );

    let notifier: Arc<dyn Notifier> = match (&config.telegram_bot_token, &config.telegram_chat_id)
    {
        (Some(token), Some(chat_id)) => {
            Arc::new(TelegramNotifier::new(token.clone(), chat_id.clone()))
        }
        _ => {
            info!("[MAIN] Telegram credentials not set; notifications go to the log only");
            Arc::new(LogNotifier)
        }
    };

    let store: Arc<dyn ClaimStore> = if config.dry_run {
        Arc::new(MemoryClaimStore::new())
    } else {
        Arc::new(JsonClaimStore::load_from(&config.claims_file))
    };

    let connector = Arc::new(EthersConnector::new(config.clone()));
    let bot = AutoBot::new(config, connector, store, notifier);
    bot.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("[MAIN] Shutdown signal received");
    bot.shutdown().await;
    Ok(())
}
