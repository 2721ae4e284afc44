use std::time::Duration;

/// Configuration for a sync session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Snapshot attempts before the fetch is reported as failed.
    pub max_fetch_attempts: u32,
    /// Fixed pause between snapshot attempts.
    pub retry_delay: Duration,
    /// Stream events kept for replay on top of an in-flight snapshot.
    pub replay_buffer_capacity: usize,
    /// Engine mailbox size.
    pub mailbox_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_fetch_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            replay_buffer_capacity: 10_000,
            mailbox_capacity: 1024,
        }
    }
}
