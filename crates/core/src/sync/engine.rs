//! Reconciliation of snapshots and stream events into the local cache.
//!
//! The engine is the only writer of its [`LocalCache`]. It is driven by a
//! single task (see [`super::engine_actor`]), so snapshot application and
//! event application never interleave.
//!
//! Derived audience fields are never written here: `leads` and
//! `total_leads` are projected on read, so audience and lead events touch
//! disjoint state and need no cross-channel ordering.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use log::{debug, info, warn};

use super::cache::{write_cache, CacheReader, LocalCache};
use super::events::{AudienceEvent, ChangeEvent, LeadEvent, StreamEvent};
use super::snapshot_loader::Snapshot;

/// What applying a single event did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    /// Insert for an id already present; replaced in place.
    Replaced,
    Updated,
    Removed,
    /// Update or delete for an id the cache has not seen.
    Ignored,
}

impl ApplyOutcome {
    pub fn changed_cache(self) -> bool {
        !matches!(self, ApplyOutcome::Ignored)
    }
}

/// Result of offering a snapshot to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Applied { replayed: usize },
    /// A newer fetch was started after this one; the snapshot was dropped.
    Superseded,
}

pub struct ReconciliationEngine {
    cache: Arc<RwLock<LocalCache>>,
    /// Generation of the fetch whose result is still awaited
    pending_fetch: Option<u64>,
    /// Events applied while `pending_fetch` is set
    replay: VecDeque<StreamEvent>,
    replay_capacity: usize,
}

impl ReconciliationEngine {
    pub fn new(replay_capacity: usize) -> Self {
        Self {
            cache: Arc::new(RwLock::new(LocalCache::new())),
            pending_fetch: None,
            replay: VecDeque::new(),
            replay_capacity,
        }
    }

    /// Read handle on the cache this engine writes.
    pub fn reader(&self) -> CacheReader {
        CacheReader::new(Arc::clone(&self.cache))
    }

    pub fn pending_fetch(&self) -> Option<u64> {
        self.pending_fetch
    }

    /// Marks `generation` as the only fetch whose result may be applied.
    pub fn begin_fetch(&mut self, generation: u64) {
        if let Some(previous) = self.pending_fetch.replace(generation) {
            debug!(
                "Fetch generation {} supersedes in-flight generation {}",
                generation, previous
            );
        }
        self.replay.clear();
    }

    /// Replaces both collections with the snapshot, then re-applies the
    /// events that arrived while it was being fetched.
    pub fn apply_snapshot(&mut self, generation: u64, snapshot: Snapshot) -> SnapshotOutcome {
        if self.pending_fetch != Some(generation) {
            info!(
                "Discarding snapshot from superseded fetch generation {} (current: {:?})",
                generation, self.pending_fetch
            );
            return SnapshotOutcome::Superseded;
        }
        self.pending_fetch = None;
        let replay = std::mem::take(&mut self.replay);

        let mut cache = write_cache(&self.cache);
        cache.replace_all(snapshot);
        let replayed = replay.len();
        for event in replay {
            Self::apply_to(&mut cache, event);
        }

        info!(
            "Applied snapshot generation {}: {} audiences, {} leads ({} events replayed)",
            generation,
            cache.audience_count(),
            cache.lead_count(),
            replayed
        );
        SnapshotOutcome::Applied { replayed }
    }

    /// Closes a failed fetch. Returns `false` when the fetch had already
    /// been superseded, in which case its failure is irrelevant.
    pub fn fail_fetch(&mut self, generation: u64) -> bool {
        if !self.close_fetch(generation) {
            debug!(
                "Ignoring failure of superseded fetch generation {}",
                generation
            );
            return false;
        }
        true
    }

    /// Closes a fetch whose task was aborted. The cache keeps its contents.
    pub fn cancel_fetch(&mut self, generation: u64) -> bool {
        let cancelled = self.close_fetch(generation);
        if cancelled {
            debug!("Cancelled fetch generation {}", generation);
        }
        cancelled
    }

    fn close_fetch(&mut self, generation: u64) -> bool {
        if self.pending_fetch != Some(generation) {
            return false;
        }
        self.pending_fetch = None;
        self.replay.clear();
        true
    }

    /// Applies one stream event.
    pub fn apply(&mut self, event: StreamEvent) -> ApplyOutcome {
        if self.pending_fetch.is_some() && self.replay_capacity > 0 {
            if self.replay.len() >= self.replay_capacity {
                warn!(
                    "Replay buffer full ({} events), dropping oldest",
                    self.replay_capacity
                );
                self.replay.pop_front();
            }
            self.replay.push_back(event.clone());
        }

        let mut cache = write_cache(&self.cache);
        Self::apply_to(&mut cache, event)
    }

    fn apply_to(cache: &mut LocalCache, event: StreamEvent) -> ApplyOutcome {
        match event {
            StreamEvent::Audience(event) => Self::apply_audience(cache, event),
            StreamEvent::Lead(event) => Self::apply_lead(cache, event),
        }
    }

    fn apply_audience(cache: &mut LocalCache, event: AudienceEvent) -> ApplyOutcome {
        match event {
            ChangeEvent::Insert(record) => {
                debug!("Audience insert: {}", record.id);
                if cache.upsert_audience_front(record) {
                    ApplyOutcome::Inserted
                } else {
                    ApplyOutcome::Replaced
                }
            }
            ChangeEvent::Update(record) => {
                if cache.patch_audience(&record.id, record.name, record.description) {
                    debug!("Audience update: {}", record.id);
                    ApplyOutcome::Updated
                } else {
                    warn!("Audience update for unknown id '{}', ignoring", record.id);
                    ApplyOutcome::Ignored
                }
            }
            ChangeEvent::Delete(key) => {
                if cache.remove_audience(&key.id) {
                    debug!("Audience delete: {}", key.id);
                    ApplyOutcome::Removed
                } else {
                    warn!("Audience delete for unknown id '{}', ignoring", key.id);
                    ApplyOutcome::Ignored
                }
            }
        }
    }

    fn apply_lead(cache: &mut LocalCache, event: LeadEvent) -> ApplyOutcome {
        match event {
            ChangeEvent::Insert(lead) => {
                debug!("Lead insert: {}", lead.id);
                if cache.upsert_lead_front(lead) {
                    ApplyOutcome::Inserted
                } else {
                    ApplyOutcome::Replaced
                }
            }
            ChangeEvent::Update(lead) => {
                let id = lead.id.clone();
                if cache.replace_lead(lead) {
                    debug!("Lead update: {}", id);
                    ApplyOutcome::Updated
                } else {
                    warn!("Lead update for unknown id '{}', ignoring", id);
                    ApplyOutcome::Ignored
                }
            }
            ChangeEvent::Delete(key) => {
                if cache.remove_lead(&key.id) {
                    debug!("Lead delete: {}", key.id);
                    ApplyOutcome::Removed
                } else {
                    warn!("Lead delete for unknown id '{}', ignoring", key.id);
                    ApplyOutcome::Ignored
                }
            }
        }
    }
}
