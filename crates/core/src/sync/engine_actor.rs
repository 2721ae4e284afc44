//! Task that owns the [`ReconciliationEngine`] and applies commands serially.

use async_trait::async_trait;
use log::{debug, error, warn};
use tokio::sync::{mpsc, oneshot, watch};

use super::cache::CacheReader;
use super::config::SyncConfig;
use super::engine::{ApplyOutcome, ReconciliationEngine, SnapshotOutcome};
use super::events::StreamEvent;
use super::snapshot_loader::Snapshot;
use super::subscriber::StreamSink;
use crate::errors::{Error, FetchError, Result};
use crate::remote::Table;

/// Observable state of a session's cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// A snapshot fetch is in flight.
    pub loading: bool,
    /// Message of the last terminal fetch failure, cleared by the next fetch.
    pub error: Option<String>,
    /// Set when a change channel failed; the cache may be missing updates
    /// until the next refresh.
    pub stream_degraded: Option<String>,
    /// Bumped on every change to the cache contents.
    pub revision: u64,
}

enum Command {
    BeginFetch {
        generation: u64,
        ack: oneshot::Sender<()>,
    },
    Snapshot {
        generation: u64,
        snapshot: Box<Snapshot>,
        ack: oneshot::Sender<SnapshotOutcome>,
    },
    FetchFailed {
        generation: u64,
        error: FetchError,
        ack: oneshot::Sender<bool>,
    },
    FetchCancelled {
        generation: u64,
        ack: oneshot::Sender<bool>,
    },
    Stream {
        event: StreamEvent,
        ack: oneshot::Sender<ApplyOutcome>,
    },
    StreamDegraded {
        table: Table,
        error: Error,
    },
}

/// Handle for sending work to the engine actor.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    reader: CacheReader,
    status: watch::Receiver<SyncStatus>,
}

impl EngineHandle {
    pub fn reader(&self) -> &CacheReader {
        &self.reader
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    /// Starts fetch `generation`, superseding any fetch still in flight.
    pub async fn begin_fetch(&self, generation: u64) -> Result<()> {
        self.request(|ack| Command::BeginFetch { generation, ack })
            .await
    }

    pub async fn apply_snapshot(
        &self,
        generation: u64,
        snapshot: Snapshot,
    ) -> Result<SnapshotOutcome> {
        self.request(|ack| Command::Snapshot {
            generation,
            snapshot: Box::new(snapshot),
            ack,
        })
        .await
    }

    /// Reports a terminal fetch failure. Returns `false` if the fetch had
    /// already been superseded.
    pub async fn fail_fetch(&self, generation: u64, error: FetchError) -> Result<bool> {
        self.request(|ack| Command::FetchFailed {
            generation,
            error,
            ack,
        })
        .await
    }

    /// Closes fetch `generation` after its task was aborted, so the status
    /// leaves `loading`. Returns `false` if it was no longer in flight.
    pub async fn cancel_fetch(&self, generation: u64) -> Result<bool> {
        self.request(|ack| Command::FetchCancelled { generation, ack })
            .await
    }

    /// Non-blocking [`EngineHandle::cancel_fetch`] for teardown paths that
    /// cannot await.
    pub fn try_cancel_fetch(&self, generation: u64) {
        let (ack, _) = oneshot::channel();
        if self
            .tx
            .try_send(Command::FetchCancelled { generation, ack })
            .is_err()
        {
            debug!("Could not cancel fetch {}: engine mailbox unavailable", generation);
        }
    }

    pub async fn apply(&self, event: StreamEvent) -> Result<ApplyOutcome> {
        self.request(|ack| Command::Stream { event, ack }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(build(ack_tx))
            .await
            .map_err(|_| Error::SessionClosed)?;
        ack_rx.await.map_err(|_| Error::SessionClosed)
    }
}

#[async_trait]
impl StreamSink for EngineHandle {
    async fn deliver(&self, event: StreamEvent) -> Result<()> {
        self.apply(event).await.map(|_| ())
    }

    async fn degraded(&self, table: Table, error: Error) {
        if self
            .tx
            .send(Command::StreamDegraded { table, error })
            .await
            .is_err()
        {
            debug!("Engine stopped before stream degradation on '{}' was recorded", table);
        }
    }
}

/// Spawns the engine actor. It stops once every [`EngineHandle`] is dropped.
///
/// Must be called from within a tokio runtime.
pub fn spawn_engine(config: &SyncConfig) -> EngineHandle {
    let mut engine = ReconciliationEngine::new(config.replay_buffer_capacity);
    let reader = engine.reader();
    let (status_tx, status_rx) = watch::channel(SyncStatus::default());
    let (tx, mut rx) = mpsc::channel::<Command>(config.mailbox_capacity.max(1));

    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                Command::BeginFetch { generation, ack } => {
                    engine.begin_fetch(generation);
                    status_tx.send_modify(|status| {
                        status.loading = true;
                        status.error = None;
                    });
                    let _ = ack.send(());
                }
                Command::Snapshot {
                    generation,
                    snapshot,
                    ack,
                } => {
                    let outcome = engine.apply_snapshot(generation, *snapshot);
                    if let SnapshotOutcome::Applied { .. } = outcome {
                        status_tx.send_modify(|status| {
                            status.loading = false;
                            status.error = None;
                            status.revision += 1;
                        });
                    }
                    let _ = ack.send(outcome);
                }
                Command::FetchFailed {
                    generation,
                    error: fetch_error,
                    ack,
                } => {
                    let current = engine.fail_fetch(generation);
                    if current {
                        error!("Snapshot fetch {} failed: {}", generation, fetch_error);
                        status_tx.send_modify(|status| {
                            status.loading = false;
                            status.error = Some(fetch_error.to_string());
                        });
                    }
                    let _ = ack.send(current);
                }
                Command::FetchCancelled { generation, ack } => {
                    let current = engine.cancel_fetch(generation);
                    if current {
                        status_tx.send_modify(|status| status.loading = false);
                    }
                    let _ = ack.send(current);
                }
                Command::Stream { event, ack } => {
                    let outcome = engine.apply(event);
                    if outcome.changed_cache() {
                        status_tx.send_modify(|status| status.revision += 1);
                    }
                    let _ = ack.send(outcome);
                }
                Command::StreamDegraded { table, error } => {
                    warn!("Change stream for '{}' degraded: {}", table, error);
                    status_tx.send_modify(|status| {
                        status.stream_degraded = Some(format!("{}: {}", table, error));
                    });
                }
            }
        }
        debug!("Engine actor stopped");
    });

    EngineHandle {
        tx,
        reader,
        status: status_rx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RemoteError;
    use crate::limits::OwnerProfile;

    fn empty_snapshot() -> Snapshot {
        Snapshot {
            profile: OwnerProfile {
                plan: "Pro".to_string(),
                total_credits: 0,
                used_credits: 0,
                credits_left: 0,
                trial_ends_at: None,
                subscription_ends_at: None,
            },
            audiences: Vec::new(),
            leads: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_status_follows_fetch_lifecycle() {
        let handle = spawn_engine(&SyncConfig::default());
        assert!(!handle.status().loading);

        handle.begin_fetch(1).await.unwrap();
        assert!(handle.status().loading);

        let outcome = handle.apply_snapshot(1, empty_snapshot()).await.unwrap();
        assert_eq!(outcome, SnapshotOutcome::Applied { replayed: 0 });
        let status = handle.status();
        assert!(!status.loading);
        assert_eq!(status.revision, 1);
        assert_eq!(handle.reader().lead_limit().unwrap().total, 15_000);
    }

    #[tokio::test]
    async fn test_terminal_failure_clears_loading_and_sets_error() {
        let handle = spawn_engine(&SyncConfig::default());
        handle.begin_fetch(1).await.unwrap();

        let failure = FetchError::Terminal {
            attempts: 3,
            last: RemoteError::new("503", "unavailable"),
        };
        assert!(handle.fail_fetch(1, failure).await.unwrap());

        let status = handle.status();
        assert!(!status.loading);
        assert!(status.error.unwrap().contains("after 3 attempts"));

        handle.begin_fetch(2).await.unwrap();
        assert_eq!(handle.status().error, None);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_clears_loading_and_discards_late_snapshot() {
        let handle = spawn_engine(&SyncConfig::default());
        handle.begin_fetch(1).await.unwrap();

        assert!(handle.cancel_fetch(1).await.unwrap());
        let status = handle.status();
        assert!(!status.loading);
        assert_eq!(status.error, None);

        assert!(!handle.cancel_fetch(1).await.unwrap());
        assert_eq!(
            handle.apply_snapshot(1, empty_snapshot()).await.unwrap(),
            SnapshotOutcome::Superseded
        );
    }

    #[tokio::test]
    async fn test_degraded_stream_is_published() {
        let handle = spawn_engine(&SyncConfig::default());
        let mut rx = handle.watch();

        handle
            .degraded(Table::Leads, Error::Subscription("channel closed".to_string()))
            .await;
        rx.changed().await.unwrap();

        assert_eq!(
            rx.borrow().stream_degraded.as_deref(),
            Some("leads: Subscription error: channel closed")
        );
    }
}
