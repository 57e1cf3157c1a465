//! Store file watcher implementation
//!
//! Polls a fingerprint (mtime + length, including the WAL sidecar) of the
//! store's backing file and publishes a change event when it moves.
//! Polling is the detection mechanism; a short debounce window collapses
//! write bursts into one notification.

use std::path::PathBuf;
use std::time::SystemTime;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::broker::{ChangeBroker, ChangeEvent};

use super::config::WatcherConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
    wal_len: u64,
}

/// Watches the store's backing file and feeds the change broker
pub struct StoreWatcher {
    config: WatcherConfig,
    path: PathBuf,
    broker: ChangeBroker,
    last: Option<Fingerprint>,
}

impl StoreWatcher {
    /// Create a new watcher over the given store file
    pub fn new(config: WatcherConfig, path: impl Into<PathBuf>, broker: ChangeBroker) -> Self {
        Self {
            config,
            path: path.into(),
            broker,
            last: None,
        }
    }

    fn read_fingerprint(&self) -> std::io::Result<Fingerprint> {
        let meta = std::fs::metadata(&self.path)?;
        // SQLite's sidecar is the file name plus "-wal".
        let wal = PathBuf::from(format!("{}-wal", self.path.display()));
        let wal_len = std::fs::metadata(&wal).map(|m| m.len()).unwrap_or(0);
        Ok(Fingerprint {
            modified: meta.modified().ok(),
            len: meta.len(),
            wal_len,
        })
    }

    /// Check for a change and publish if the fingerprint moved.
    /// The first check only records the baseline.
    pub fn check_once(&mut self) -> std::io::Result<bool> {
        let current = self.read_fingerprint()?;

        let Some(last) = &self.last else {
            debug!(path = %self.path.display(), "initial store fingerprint");
            self.last = Some(current);
            return Ok(false);
        };

        if *last != current {
            debug!(path = %self.path.display(), "store file changed");
            self.last = Some(current);
            return Ok(true);
        }

        Ok(false)
    }

    /// Run the watcher lane until the shutdown channel closes
    ///
    /// I/O errors are published as `WatcherError` and the lane continues.
    pub async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            path = %self.path.display(),
            interval_ms = self.config.poll_interval_ms,
            "store watcher started"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.check_once() {
                        Ok(true) => {
                            // Absorb the write burst before notifying.
                            tokio::time::sleep(self.config.debounce()).await;
                            if let Err(e) = self.check_once() {
                                error!(error = %e, "store fingerprint re-read failed");
                            }
                            self.broker.publish(ChangeEvent::StoreChanged);
                        }
                        Ok(false) => {}
                        Err(e) => {
                            error!(error = %e, path = %self.path.display(), "store watch failed");
                            self.broker.publish(ChangeEvent::WatcherError {
                                message: e.to_string(),
                            });
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        info!("store watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn touch(path: &std::path::Path, contents: &[u8]) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(contents).unwrap();
        file.sync_all().unwrap();
    }

    #[tokio::test]
    async fn test_first_check_sets_baseline() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state.db");
        touch(&path, b"initial");

        let broker = ChangeBroker::new();
        let mut watcher = StoreWatcher::new(WatcherConfig::default(), &path, broker);

        assert!(!watcher.check_once().unwrap());
    }

    #[tokio::test]
    async fn test_detects_append() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state.db");
        touch(&path, b"initial");

        let broker = ChangeBroker::new();
        let mut watcher = StoreWatcher::new(WatcherConfig::default(), &path, broker);
        watcher.check_once().unwrap();

        touch(&path, b"more");
        assert!(watcher.check_once().unwrap());
        // No further change
        assert!(!watcher.check_once().unwrap());
    }

    #[tokio::test]
    async fn test_detects_wal_sidecar_growth() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state.db");
        touch(&path, b"db");

        let broker = ChangeBroker::new();
        let mut watcher = StoreWatcher::new(WatcherConfig::default(), &path, broker);
        watcher.check_once().unwrap();

        touch(&dir.path().join("state.db-wal"), b"frames");
        assert!(watcher.check_once().unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let broker = ChangeBroker::new();
        let mut watcher = StoreWatcher::new(
            WatcherConfig::default(),
            dir.path().join("absent.db"),
            broker,
        );
        assert!(watcher.check_once().is_err());
    }

    #[tokio::test]
    async fn test_run_publishes_on_change_and_stops() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state.db");
        touch(&path, b"initial");

        let broker = ChangeBroker::new();
        let mut stream = broker.subscribe();

        let config = WatcherConfig {
            poll_interval_ms: 10,
            debounce_ms: 1,
        };
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let watcher = StoreWatcher::new(config, &path, broker.clone());
        let lane = tokio::spawn(watcher.run(shutdown_rx));

        // Give the watcher a tick to record its baseline, then mutate.
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        touch(&path, b"external write");

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), stream.recv())
            .await
            .expect("watcher should publish within the timeout");
        assert_eq!(event, Some(ChangeEvent::StoreChanged));

        shutdown_tx.send(()).await.unwrap();
        lane.await.unwrap();
    }
}
