//! Channel subsystem for messaging platform integrations.
//!
//! Each platform implements the [`Channel`] trait defined in [`traits`], which
//! provides a uniform interface for sending messages, listening for incoming
//! messages, health checking, and typing indicators.
//!
//! [`start_channels`] wires the Telegram channel to the conversation
//! orchestrator: a supervised listener feeds a bounded-parallel dispatch loop,
//! and the listener is restarted with exponential backoff when it fails.

pub mod telegram;
pub mod traits;

pub use telegram::TelegramChannel;
pub use traits::{Channel, ChannelMessage};

use crate::config::Config;
use crate::conversation::ConversationOrchestrator;
use crate::providers::{self, Provider};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Initial backoff for listener restarts.
const CHANNEL_INITIAL_BACKOFF_SECS: u64 = 2;
/// Upper bound for listener restart backoff.
const CHANNEL_MAX_BACKOFF_SECS: u64 = 60;
const CHANNEL_MESSAGE_QUEUE_CAPACITY: usize = 100;
const CHANNEL_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state handed to every dispatch worker.
pub struct ChannelRuntimeContext {
    pub channel: Arc<dyn Channel>,
    pub orchestrator: Arc<ConversationOrchestrator>,
}

/// Run `ch.listen` until `shutdown` fires, restarting it with exponential
/// backoff whenever it returns.
pub fn spawn_supervised_listener(
    ch: Arc<dyn Channel>,
    tx: tokio::sync::mpsc::Sender<ChannelMessage>,
    initial_backoff_secs: u64,
    max_backoff_secs: u64,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = initial_backoff_secs.max(1);
        let max_backoff = max_backoff_secs.max(backoff);

        loop {
            let result = tokio::select! {
                () = shutdown.cancelled() => break,
                result = ch.listen(tx.clone()) => result,
            };

            if tx.is_closed() {
                break;
            }

            match result {
                Ok(()) => {
                    tracing::warn!("Channel {} exited unexpectedly; restarting", ch.name());
                    // Clean exit: reset backoff
                    backoff = initial_backoff_secs.max(1);
                }
                Err(e) => {
                    tracing::error!("Channel {} error: {e}; restarting", ch.name());
                }
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(Duration::from_secs(backoff)) => {}
            }
            // Double backoff AFTER sleeping so first error uses initial_backoff
            backoff = backoff.saturating_mul(2).min(max_backoff);
        }

        tracing::info!("Channel {} listener stopped", ch.name());
    })
}

fn log_worker_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(error) = result {
        tracing::error!("Channel message worker crashed: {error}");
    }
}

async fn process_channel_message(ctx: Arc<ChannelRuntimeContext>, msg: ChannelMessage) {
    tracing::debug!(
        channel = %msg.channel,
        sender = %msg.sender,
        id = %msg.id,
        "Processing inbound message"
    );
    if let Err(e) = ctx
        .orchestrator
        .handle_message(ctx.channel.as_ref(), &msg)
        .await
    {
        tracing::error!("{e:#}");
    }
}

/// Consume inbound messages, handling up to `max_in_flight_messages` at once.
///
/// Returns once the sender side is closed and every in-flight worker has
/// finished.
pub async fn run_message_dispatch_loop(
    mut rx: tokio::sync::mpsc::Receiver<ChannelMessage>,
    ctx: Arc<ChannelRuntimeContext>,
    max_in_flight_messages: usize,
) {
    let semaphore = Arc::new(tokio::sync::Semaphore::new(max_in_flight_messages.max(1)));
    let mut workers = tokio::task::JoinSet::new();

    while let Some(msg) = rx.recv().await {
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let worker_ctx = Arc::clone(&ctx);
        workers.spawn(async move {
            let _permit = permit;
            process_channel_message(worker_ctx, msg).await;
        });

        while let Some(result) = workers.try_join_next() {
            log_worker_join_result(result);
        }
    }

    while let Some(result) = workers.join_next().await {
        log_worker_join_result(result);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelHealthState {
    Healthy,
    Unhealthy,
    Timeout,
}

fn classify_health_result(
    result: &std::result::Result<bool, tokio::time::error::Elapsed>,
) -> ChannelHealthState {
    match result {
        Ok(true) => ChannelHealthState::Healthy,
        Ok(false) => ChannelHealthState::Unhealthy,
        Err(_) => ChannelHealthState::Timeout,
    }
}

/// Check credentials, Telegram reachability and Gemini reachability.
pub async fn doctor_channels(config: Config) -> Result<()> {
    println!("🩺 gemrelay doctor");
    println!();

    let missing = config.missing_credentials();
    for name in &missing {
        println!("  ❌ {name:<9} not set");
    }

    let mut healthy = 0_u32;
    let mut unhealthy = u32::try_from(missing.len()).unwrap_or(u32::MAX);
    let mut timeout = 0_u32;

    if let Ok(telegram) = TelegramChannel::from_config(&config) {
        let result =
            tokio::time::timeout(CHANNEL_HEALTH_CHECK_TIMEOUT, telegram.health_check()).await;
        match classify_health_result(&result) {
            ChannelHealthState::Healthy => {
                healthy += 1;
                match telegram.fetch_bot_username().await {
                    Ok(username) => println!("  ✅ {:<9} healthy (@{username})", "Telegram"),
                    Err(_) => println!("  ✅ {:<9} healthy", "Telegram"),
                }
            }
            ChannelHealthState::Unhealthy => {
                unhealthy += 1;
                println!("  ❌ {:<9} unhealthy (auth/config/network)", "Telegram");
            }
            ChannelHealthState::Timeout => {
                timeout += 1;
                println!("  ⏱️  {:<9} timed out (>10s)", "Telegram");
            }
        }
    }

    if let Ok(provider) = providers::create_provider(&config) {
        match tokio::time::timeout(CHANNEL_HEALTH_CHECK_TIMEOUT, provider.warmup()).await {
            Ok(Ok(())) => {
                healthy += 1;
                println!("  ✅ {:<9} model {} reachable", "Gemini", config.gemini.model);
            }
            Ok(Err(e)) => {
                unhealthy += 1;
                println!("  ❌ {:<9} {e}", "Gemini");
            }
            Err(_) => {
                timeout += 1;
                println!("  ⏱️  {:<9} timed out (>10s)", "Gemini");
            }
        }
    }

    println!();
    println!("Summary: {healthy} healthy, {unhealthy} unhealthy, {timeout} timed out");
    Ok(())
}

/// Cancel `shutdown` on Ctrl-C.
fn spawn_ctrl_c_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested; draining in-flight messages"),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {e}"),
        }
        shutdown.cancel();
    });
}

/// Start the Telegram channel and relay messages until Ctrl-C.
pub async fn start_channels(config: Config) -> Result<()> {
    let missing = config.missing_credentials();
    if !missing.is_empty() {
        anyhow::bail!(
            "Missing required configuration: {}. Set them in the environment, a .env file, or config.toml.",
            missing.join(", ")
        );
    }

    let provider: Arc<dyn Provider> = providers::create_provider(&config)?;
    if let Err(e) = provider.warmup().await {
        tracing::warn!("Provider warmup failed (non-fatal): {e}");
    }

    let channel: Arc<dyn Channel> = Arc::new(TelegramChannel::from_config(&config)?);
    if !channel.health_check().await {
        tracing::warn!("Telegram health check failed; will keep retrying in the listener");
    }

    let max_in_flight_messages = config.conversation.max_in_flight_messages;
    let config = Arc::new(config);
    let ctx = Arc::new(ChannelRuntimeContext {
        channel: Arc::clone(&channel),
        orchestrator: Arc::new(ConversationOrchestrator::new(config, provider)),
    });

    let shutdown = CancellationToken::new();
    spawn_ctrl_c_handler(shutdown.clone());

    let (tx, rx) = tokio::sync::mpsc::channel::<ChannelMessage>(CHANNEL_MESSAGE_QUEUE_CAPACITY);
    let listener = spawn_supervised_listener(
        channel,
        tx,
        CHANNEL_INITIAL_BACKOFF_SECS,
        CHANNEL_MAX_BACKOFF_SECS,
        shutdown,
    );

    tracing::info!(
        max_in_flight_messages,
        "gemrelay started; press Ctrl-C to stop"
    );
    run_message_dispatch_loop(rx, ctx, max_in_flight_messages).await;

    if let Err(e) = listener.await {
        tracing::error!("Channel listener task failed: {e}");
    }
    tracing::info!("gemrelay stopped");
    Ok(())
}
