use crate::collector::bridge::{self, SessionBridge};
use crate::collector::client::HttpTransport;
use crate::collector::manager::QueueController;
use crate::collector::store::{FileStore, SharedStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::mpsc;

pub mod collector;

/// Overrides the directory holding the persistent store
pub const DATA_DIR_ENV: &str = "HEALTH_EXPORT_DATA_DIR";

/// How long outstanding deliveries may run after the device link closes
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

/**
 * Resolve the store location
 * {data_dir}/health-export/store.json unless overridden by HEALTH_EXPORT_DATA_DIR
 */
pub fn store_path() -> Result<PathBuf, String> {
    let data_dir = match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) => PathBuf::from(dir),
        None => dirs::data_dir()
            .ok_or_else(|| "Failed to resolve app data directory".to_string())?
            .join("health-export"),
    };
    Ok(data_dir.join("store.json"))
}

/**
 * Run the relay until the device link (stdin) closes
 * App messages are read from stdin and notifications written to stdout,
 * one JSON object per line; logs go to stderr
 */
pub fn run() -> Result<(), String> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let file_store = FileStore::open(store_path()?)?;
    log::info!("Using store {}", file_store.path().display());
    let store: SharedStore = Arc::new(file_store);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start async runtime: {}", e))?;

    runtime.block_on(async move {
        let transport = Arc::new(HttpTransport::new()?);
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (controller, events) = QueueController::new(store, transport, notify_tx);
        let handle = controller.handle();

        let mut controller_task = tokio::spawn(controller.run(events));
        let writer_task = tokio::spawn(bridge::forward_notifications(notify_rx, tokio::io::stdout()));

        let session = SessionBridge::new(handle.clone());
        if let Err(e) = session.read_messages(BufReader::new(tokio::io::stdin())).await {
            log::error!("{}", e);
        }

        if let Err(e) = handle.drain() {
            log::debug!("Drain not delivered: {}", e);
        }

        match tokio::time::timeout(DRAIN_TIMEOUT, &mut controller_task).await {
            Ok(joined) => {
                joined.map_err(|e| format!("Queue controller task failed: {}", e))?;
            }
            Err(_) => {
                // Undelivered records stay persisted for the next session
                log::warn!(
                    "Deliveries still outstanding after {}s, stopping",
                    DRAIN_TIMEOUT.as_secs()
                );
                if let Err(e) = handle.shutdown() {
                    log::debug!("Shutdown not delivered: {}", e);
                }
                controller_task
                    .await
                    .map_err(|e| format!("Queue controller task failed: {}", e))?;
            }
        }
        writer_task
            .await
            .map_err(|e| format!("Notification writer task failed: {}", e))??;

        log::info!("Graceful shutdown complete");
        Ok(())
    })
}
