//! Tasty Stream Binary
//!
//! Streams dxFeed quotes and tastytrade account updates to the log.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin tasty-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Market data
//! - `DXFEED_TOKEN`: Streaming token (enables the dxFeed client)
//! - `DXFEED_URL`: Endpoint (default: `wss://tasty-live-web.dxfeed.com/live/cometd`)
//! - `DXFEED_SUBSCRIPTIONS`: e.g. `Quote:AAPL,Quote:TSLA`
//! - `DXFEED_HEARTBEAT_INTERVAL_SECS`: Keep-alive interval (default: 10)
//! - `DXFEED_DATA_CHANNELS`: Data channels (default: `/service/data,/data`)
//! - `DXFEED_RECONNECT_INITIAL_MS`, `DXFEED_RECONNECT_MAX_MS`,
//!   `DXFEED_RECONNECT_MULTIPLIER`: Enable reconnect when all are set
//! - `DXFEED_RECONNECT_MAX_ATTEMPTS`, `DXFEED_RECONNECT_JITTER`: Optional
//!
//! ## Account streamer
//! - `TASTYTRADE_SESSION_TOKEN`: Session token
//! - `ACCOUNT_NUMBERS`: Accounts to connect (enables the account streamer)
//! - `ACCOUNT_STREAMER_URL`: Endpoint (default: `wss://streamer.tastyworks.com`)
//! - `ACCOUNT_HEARTBEAT_INTERVAL_SECS`: Keep-alive interval (default: 30)
//! - `ACCOUNT_READY_TIMEOUT_SECS`: Time allowed to connect (default: 10)
//! - `TASTYTRADE_USER_EXTERNAL_ID`: Subscribe to user-level messages
//!
//! ## Process
//! - `TASTY_STREAM_METRICS_PORT`: Prometheus metrics port (default: 0, disabled)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: `tasty_stream=info`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt;
use tasty_stream::infrastructure::tastytrade::account::AccountEventStream;
use tasty_stream::infrastructure::tastytrade::dxfeed::MarketEventStream;
use tasty_stream::{
    AccountEvent, AccountStreamer, DxFeedClient, MarketEvent, StreamConfig, init_metrics,
    init_telemetry,
};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = init_telemetry().context("failed to initialize telemetry")?;

    tracing::info!("Starting tasty-stream");

    let config = StreamConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let metrics_port = (config.metrics_port != 0).then_some(config.metrics_port);
    let _metrics_handle = init_metrics(metrics_port).context("failed to initialize metrics")?;

    if config.dxfeed.token.is_none() && !config.account_enabled() {
        anyhow::bail!(
            "nothing to stream: set DXFEED_TOKEN, or TASTYTRADE_SESSION_TOKEN with ACCOUNT_NUMBERS"
        );
    }

    let shutdown_token = CancellationToken::new();
    let mut tasks = JoinSet::new();

    let dxfeed_client = if config.dxfeed.token.is_some() {
        let (client, events) =
            DxFeedClient::new(config.dxfeed_config()?, shutdown_token.child_token());
        let client = Arc::new(client);

        for subscription in &config.dxfeed.subscriptions {
            client.subscribe(&subscription.event_type, &subscription.symbol)?;
        }

        tasks.spawn(handle_market_events(events));
        let run_client = Arc::clone(&client);
        tasks.spawn(async move {
            if let Err(e) = run_client.run().await {
                tracing::error!(error = %e, "dxFeed client error");
            }
        });
        Some(client)
    } else {
        tracing::info!("DXFEED_TOKEN not set, market data disabled");
        None
    };

    let account_streamer = if config.account_enabled() {
        Some(start_account_streamer(&config, &mut tasks).await?)
    } else {
        tracing::info!("Account streamer disabled");
        None
    };

    tracing::info!("tasty-stream ready");

    await_shutdown(shutdown_token).await;

    if let Some(client) = &dxfeed_client {
        client.close();
    }
    if let Some(streamer) = &account_streamer {
        streamer.close();
    }

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Shutdown timed out, aborting remaining tasks");
        tasks.abort_all();
    }

    tracing::info!("tasty-stream stopped");
    Ok(())
}

async fn start_account_streamer(
    config: &StreamConfig,
    tasks: &mut JoinSet<()>,
) -> anyhow::Result<Arc<AccountStreamer>> {
    let (streamer, events) = AccountStreamer::new(config.account_config()?);
    let streamer = Arc::new(streamer);

    let connection = streamer.connect();
    tasks.spawn(async move {
        match connection.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Account streamer error"),
            Err(e) => tracing::error!(error = %e, "Account streamer task failed"),
            Ok(Ok(())) => {}
        }
    });
    tasks.spawn(handle_account_events(events));

    streamer
        .wait_for_connection(config.account.ready_timeout)
        .await
        .context("account streamer did not connect")?;

    let heartbeat = streamer.start_heartbeat(config.account.heartbeat_interval)?;
    tasks.spawn(async move {
        if let Err(e) = heartbeat.join().await {
            tracing::warn!(error = %e, "Account heartbeat stopped");
        }
    });

    streamer.connect_accounts(&config.account.account_numbers)?;
    streamer.public_watchlists_subscribe()?;
    streamer.quote_alerts_subscribe()?;
    if let Some(external_id) = &config.account.user_external_id {
        streamer.user_message_subscribe(external_id)?;
    }

    Ok(streamer)
}

/// Log events from the dxFeed client.
async fn handle_market_events(mut events: MarketEventStream) {
    while let Some(event) = events.next().await {
        match event {
            MarketEvent::HandshakeCompleted { client_id } => {
                tracing::info!(client_id = %client_id, "dxFeed connected");
            }
            MarketEvent::HandshakeRejected { error } => {
                tracing::error!(error = ?error, "dxFeed handshake rejected");
            }
            MarketEvent::Subscribed { id } => {
                tracing::debug!(id = ?id, "dxFeed subscription acknowledged");
            }
            MarketEvent::SubscriptionRejected { id, error } => {
                tracing::warn!(id = ?id, error = ?error, "dxFeed subscription rejected");
            }
            MarketEvent::Quote(quote) => {
                tracing::info!(
                    symbol = %quote.symbol,
                    bid = quote.bid_price,
                    ask = quote.ask_price,
                    bid_size = ?quote.bid_size,
                    ask_size = ?quote.ask_size,
                    "Quote"
                );
            }
            MarketEvent::Data {
                event_type,
                payload,
            } => {
                tracing::info!(event_type = %event_type, payload = %payload, "Market data");
            }
            MarketEvent::HeartbeatFailed { error } => {
                tracing::warn!(error = %error, "dxFeed heartbeat failed");
            }
            MarketEvent::Reconnecting { attempt } => {
                tracing::info!(attempt, "dxFeed reconnecting");
            }
            MarketEvent::Disconnected { error } => {
                tracing::warn!(error = ?error, "dxFeed disconnected");
            }
        }
    }
}

/// Log events from the account streamer.
async fn handle_account_events(mut events: AccountEventStream) {
    while let Some(event) = events.next().await {
        match event {
            AccountEvent::Message(message) => {
                tracing::info!(message = %message, "Account update");
            }
            AccountEvent::Disconnected { error: None } => {
                tracing::info!("Account stream closed");
            }
            AccountEvent::Disconnected { error: Some(error) } => {
                tracing::warn!(error = %error, "Account stream disconnected");
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        dxfeed_enabled = config.dxfeed.token.is_some(),
        account_enabled = config.account_enabled(),
        subscriptions = config.dxfeed.subscriptions.len(),
        accounts = config.account.account_numbers.len(),
        reconnect = config.dxfeed.reconnect.is_some(),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        dxfeed_url = %config.dxfeed.url,
        account_url = %config.account.url,
        "WebSocket endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
