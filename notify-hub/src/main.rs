use std::sync::Arc;

use anyhow::Context;
use notify_hub::config::NotifyConfig;
use notify_hub::logging;
use notify_hub::notification::{DomainEvent, EventToNotificationTranslator, NotificationManager};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Forward newline-delimited JSON domain events from stdin to `tx`.
///
/// Meant for piped input: a blocked terminal read delays process exit.
async fn read_events(tx: broadcast::Sender<DomainEvent>, token: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match serde_json::from_str::<DomainEvent>(&line) {
                Ok(event) => {
                    let _ = tx.send(event);
                }
                Err(e) => warn!("Ignoring malformed event: {}", e),
            },
            Ok(None) => {
                debug!("Event input closed");
                break;
            }
            Err(e) => {
                warn!("Failed to read event input: {}", e);
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let log_dir = std::env::var("NOTIFY_LOG_DIR").ok();
    let (_logging, _guard) = logging::init_logging(log_dir.as_deref())?;

    let config = NotifyConfig::from_env().context("failed to load notification config")?;
    if !config.enabled {
        info!("Notification dispatch is disabled, exiting");
        return Ok(());
    }

    let event_buffer = config.event_buffer;
    let manager = Arc::new(NotificationManager::with_config(config));
    info!(channels = ?manager.channels(), "notify-hub initialized");
    manager.start();

    let token = CancellationToken::new();
    let (event_tx, event_rx) = broadcast::channel(event_buffer);
    let translator = Arc::new(EventToNotificationTranslator::new(Arc::clone(&manager)));
    let listener = translator.listen(event_rx, token.clone());
    let reader = if std::env::var("NOTIFY_EVENTS_STDIN").is_ok_and(|v| v == "1" || v == "true") {
        info!("Reading domain events from stdin");
        Some(tokio::spawn(read_events(event_tx, token.clone())))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    token.cancel();
    if let Some(reader) = reader {
        let _ = reader.await;
    }
    let _ = listener.await;
    manager.stop().await;

    let stats = manager.get_stats();
    info!(
        sent = stats.total_sent,
        failed = stats.total_failed,
        "notify-hub stopped"
    );
    Ok(())
}
