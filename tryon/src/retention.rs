//! Background deletion of expired result images.
//!
//! Only runs when `results.retention` is configured. Each tick removes files in the results
//! directory whose modification time is older than the retention period.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ResultsConfig;
use crate::storage::FileStore;

/// Spawn the sweeper if retention is enabled. Stops when `shutdown` is cancelled.
pub fn spawn_sweeper(store: FileStore, config: &ResultsConfig, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
    let retention = config.retention?;
    let interval = config.sweep_interval;
    info!(
        retention = ?retention,
        interval = ?interval,
        "Starting result retention sweeper"
    );
    Some(tokio::spawn(run_sweeper(store, retention, interval, shutdown)))
}

async fn run_sweeper(store: FileStore, retention: Duration, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Result retention sweeper shutting down");
                break;
            }
            _ = ticker.tick() => {
                match store.sweep_results(retention).await {
                    Ok(0) => debug!("No expired results"),
                    Ok(removed) => info!(removed, "Removed expired results"),
                    Err(e) => error!(error = %e, dir = %store.results_dir().display(), "Result sweep failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use tempfile::TempDir;

    fn store(root: &TempDir) -> FileStore {
        FileStore::new(&StorageConfig {
            static_dir: root.path().join("static"),
            results_dir: root.path().join("results"),
            scratch_dir: root.path().join("scratch"),
        })
    }

    #[tokio::test]
    async fn test_disabled_without_retention() {
        let root = TempDir::new().unwrap();
        let handle = spawn_sweeper(store(&root), &ResultsConfig::default(), CancellationToken::new());
        assert!(handle.is_none());
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_and_stops() {
        let root = TempDir::new().unwrap();
        let store = store(&root);
        store.ensure_dirs().await.unwrap();
        let expired = store.results_dir().join("result_old.webp");
        std::fs::write(&expired, b"old").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let config = ResultsConfig {
            retention: Some(Duration::ZERO),
            sweep_interval: Duration::from_millis(10),
        };
        let shutdown = CancellationToken::new();
        let handle = spawn_sweeper(store, &config, shutdown.clone()).unwrap();

        for _ in 0..100 {
            if !expired.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!expired.exists());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop after cancellation")
            .unwrap();
    }
}
