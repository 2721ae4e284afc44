//! In-memory remote store and change stream shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};

use leadsync_core::errors::RemoteError;
use leadsync_core::remote::{
    ChangeChannel, ChangeStream, QueryFilter, RawChange, RemoteStore, RowFilter, Table,
};
use leadsync_core::sync::SyncStatus;
use leadsync_core::{LeadSession, SyncConfig};

type Feed = mpsc::UnboundedSender<Result<RawChange, RemoteError>>;

struct Subscriber {
    table: Table,
    filter: RowFilter,
    feed: Feed,
}

#[derive(Default)]
struct State {
    profiles: Vec<Value>,
    audiences: VecDeque<Value>,
    leads: VecDeque<Value>,
    failing_reads: u32,
    lead_reads: u32,
    /// Next lead read for an owner waits until the gate opens
    gates: HashMap<String, watch::Receiver<bool>>,
    subscribers: Vec<Subscriber>,
    next_id: u64,
    clock: i64,
}

/// Supabase-like backend held entirely in memory.
///
/// Writes are echoed to matching subscribers the way the realtime service
/// would, which is the only way sessions learn about them.
#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
    unsubscribed: Arc<Mutex<Vec<Table>>>,
}

/// Releases a held read when opened or dropped.
pub struct ReadGate {
    tx: watch::Sender<bool>,
}

impl ReadGate {
    pub fn open(&self) {
        self.tx.send_replace(true);
    }
}

impl Drop for ReadGate {
    fn drop(&mut self) {
        self.open();
    }
}

impl InMemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_profile(&self, owner_id: &str, plan: &str) {
        self.state.lock().unwrap().profiles.push(json!({
            "id": owner_id,
            "plan": plan,
            "total_credits": 1000,
            "used_credits": 10,
            "credits_left": 990,
            "trial_ends_at": null,
            "subscription_end_at": null
        }));
    }

    /// Stores an audience without notifying subscribers.
    pub fn seed_audience(&self, owner_id: &str, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let row = state.stamp(json!({ "user_id": owner_id, "name": name, "description": null }));
        let id = row["id"].as_str().unwrap_or_default().to_string();
        state.audiences.push_front(row);
        id
    }

    /// Stores a lead without notifying subscribers.
    pub fn seed_lead(&self, owner_id: &str, audience_id: &str, full_name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let row = state.stamp(lead_payload(owner_id, audience_id, full_name));
        let id = row["id"].as_str().unwrap_or_default().to_string();
        state.leads.push_front(row);
        id
    }

    /// Makes the next `count` lead reads fail.
    pub fn fail_next_reads(&self, count: u32) {
        self.state.lock().unwrap().failing_reads = count;
    }

    pub fn lead_reads(&self) -> u32 {
        self.state.lock().unwrap().lead_reads
    }

    /// Holds the next lead read for `owner_id` until the returned gate opens.
    /// The read returns the rows present when it was issued.
    pub fn hold_next_read(&self, owner_id: &str) -> ReadGate {
        let (tx, rx) = watch::channel(false);
        self.state
            .lock()
            .unwrap()
            .gates
            .insert(owner_id.to_string(), rx);
        ReadGate { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .subscribers
            .iter()
            .filter(|s| !s.feed.is_closed())
            .count()
    }

    pub async fn wait_for_subscribers(&self, count: usize) {
        wait_until(|| self.subscriber_count() >= count).await;
    }

    /// Sends a raw notification on every open `table` channel.
    pub fn emit(&self, table: Table, change: RawChange) {
        let state = self.state.lock().unwrap();
        for subscriber in state.subscribers.iter().filter(|s| s.table == table) {
            let _ = subscriber.feed.send(Ok(change.clone()));
        }
    }

    /// Reports an error on every open `table` channel.
    pub fn break_channel(&self, table: Table) {
        let state = self.state.lock().unwrap();
        for subscriber in state.subscribers.iter().filter(|s| s.table == table) {
            let _ = subscriber
                .feed
                .send(Err(RemoteError::new("realtime", "CHANNEL_ERROR")));
        }
    }

    pub fn unsubscribed(&self) -> Vec<Table> {
        self.unsubscribed.lock().unwrap().clone()
    }

    fn notify(&self, state: &State, table: Table, change: RawChange) {
        let row = change.new.as_ref().or(change.old.as_ref());
        for subscriber in state.subscribers.iter().filter(|s| s.table == table) {
            let visible = match row {
                Some(row) => change.kind == leadsync_core::remote::ChangeKind::Delete
                    || matches(row, &subscriber.filter),
                None => false,
            };
            if visible {
                let _ = subscriber.feed.send(Ok(change.clone()));
            }
        }
    }
}

impl State {
    fn stamp(&mut self, mut row: Value) -> Value {
        self.next_id += 1;
        self.clock += 1;
        let prefix = if row.get("full_name").is_some() { "lead" } else { "aud" };
        let created_at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
            + chrono::Duration::seconds(self.clock);
        row["id"] = json!(format!("{}-{}", prefix, self.next_id));
        row["created_at"] = json!(created_at.to_rfc3339());
        row
    }

    fn rows(&self, table: Table) -> Vec<Value> {
        match table {
            Table::Profiles => self.profiles.clone(),
            Table::Audiences => self.audiences.iter().cloned().collect(),
            Table::Leads => self.leads.iter().cloned().collect(),
        }
    }

    fn rows_mut(&mut self, table: Table) -> Option<&mut VecDeque<Value>> {
        match table {
            Table::Profiles => None,
            Table::Audiences => Some(&mut self.audiences),
            Table::Leads => Some(&mut self.leads),
        }
    }
}

pub fn lead_payload(owner_id: &str, audience_id: &str, full_name: &str) -> Value {
    json!({
        "user_id": owner_id,
        "audience_id": audience_id,
        "full_name": full_name,
        "profile_url": format!("https://linkedin.com/in/{}", full_name.to_lowercase().replace(' ', "")),
        "headline": null,
        "source_operation": "profile_scrape"
    })
}

fn matches(row: &Value, filter: &RowFilter) -> bool {
    row.get(&filter.column).and_then(Value::as_str) == Some(filter.value.as_str())
}

fn matches_all(row: &Value, filter: &QueryFilter) -> bool {
    filter.filters.iter().all(|f| matches(row, f))
}

#[async_trait]
impl RemoteStore for InMemoryBackend {
    async fn query(&self, table: Table, filter: &QueryFilter) -> Result<Vec<Value>, RemoteError> {
        let (rows, gate) = {
            let mut state = self.state.lock().unwrap();
            let mut gate = None;
            if table == Table::Leads {
                state.lead_reads += 1;
                if state.failing_reads > 0 {
                    state.failing_reads -= 1;
                    return Err(RemoteError::new("503", "upstream unavailable"));
                }
                if let Some(owner) = filter.filters.first().map(|f| f.value.clone()) {
                    gate = state.gates.remove(&owner);
                }
            }
            let rows: Vec<Value> = state
                .rows(table)
                .into_iter()
                .filter(|row| matches_all(row, filter))
                .collect();
            (rows, gate)
        };

        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|open| *open).await;
        }
        Ok(rows)
    }

    async fn insert(&self, table: Table, rows: Vec<Value>) -> Result<Vec<Value>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            if table == Table::Audiences {
                let taken = state.audiences.iter().any(|existing| {
                    existing["user_id"] == row["user_id"] && existing["name"] == row["name"]
                });
                if taken {
                    return Err(RemoteError::new(
                        "23505",
                        "duplicate key value violates unique constraint \"audiences_user_id_name_key\"",
                    ));
                }
            }
            let row = state.stamp(row);
            match state.rows_mut(table) {
                Some(rows) => rows.push_front(row.clone()),
                None => return Err(RemoteError::new("42501", "permission denied")),
            }
            stored.push(row);
        }
        for row in &stored {
            self.notify(&state, table, RawChange::insert(row.clone()));
        }
        Ok(stored)
    }

    async fn update(
        &self,
        table: Table,
        filter: &QueryFilter,
        patch: Value,
    ) -> Result<Vec<Value>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        if table == Table::Audiences {
            if let Some(name) = patch.get("name") {
                let taken = state.audiences.iter().any(|existing| {
                    existing["name"] == *name
                        && !matches_all(existing, filter)
                        && filter
                            .filters
                            .iter()
                            .any(|f| f.column == "user_id" && existing["user_id"] == f.value.as_str())
                });
                if taken {
                    return Err(RemoteError::new(
                        "23505",
                        "duplicate key value violates unique constraint \"audiences_user_id_name_key\"",
                    ));
                }
            }
        }
        let mut updated = Vec::new();
        if let Some(rows) = state.rows_mut(table) {
            for row in rows.iter_mut().filter(|row| matches_all(row, filter)) {
                if let (Some(target), Some(fields)) = (row.as_object_mut(), patch.as_object()) {
                    for (key, value) in fields {
                        target.insert(key.clone(), value.clone());
                    }
                }
                updated.push(row.clone());
            }
        }
        for row in &updated {
            self.notify(&state, table, RawChange::update(row.clone()));
        }
        Ok(updated)
    }

    async fn delete(&self, table: Table, filter: &QueryFilter) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        let mut removed = Vec::new();
        if let Some(rows) = state.rows_mut(table) {
            rows.retain(|row| {
                if matches_all(row, filter) {
                    removed.push(json!({ "id": row["id"].clone() }));
                    false
                } else {
                    true
                }
            });
        }
        for old in removed {
            self.notify(&state, table, RawChange::delete(old));
        }
        Ok(())
    }
}

struct MemoryChannel {
    table: Table,
    rx: mpsc::UnboundedReceiver<Result<RawChange, RemoteError>>,
    unsubscribed: Arc<Mutex<Vec<Table>>>,
    left: bool,
}

#[async_trait]
impl ChangeChannel for MemoryChannel {
    async fn next_change(&mut self) -> Option<Result<RawChange, RemoteError>> {
        self.rx.recv().await
    }

    async fn unsubscribe(&mut self) {
        if !self.left {
            self.left = true;
            self.rx.close();
            self.unsubscribed.lock().unwrap().push(self.table);
        }
    }
}

#[async_trait]
impl ChangeStream for InMemoryBackend {
    async fn subscribe(
        &self,
        table: Table,
        filter: &RowFilter,
    ) -> Result<Box<dyn ChangeChannel>, RemoteError> {
        let (feed, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().subscribers.push(Subscriber {
            table,
            filter: filter.clone(),
            feed,
        });
        Ok(Box::new(MemoryChannel {
            table,
            rx,
            unsubscribed: Arc::clone(&self.unsubscribed),
            left: false,
        }))
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn fast_config() -> SyncConfig {
    SyncConfig {
        retry_delay: Duration::from_millis(10),
        ..SyncConfig::default()
    }
}

pub async fn start_session(backend: &Arc<InMemoryBackend>, owner_id: &str) -> Arc<LeadSession> {
    let session = LeadSession::start(
        owner_id,
        backend.clone(),
        backend.clone(),
        &fast_config(),
    )
    .await
    .unwrap();
    backend.wait_for_subscribers(2).await;
    session
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Waits for the session status to satisfy `condition`.
pub async fn wait_for_status(
    session: &LeadSession,
    condition: impl Fn(&SyncStatus) -> bool,
) -> SyncStatus {
    let mut rx = session.watch();
    let status = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| condition(s)))
        .await
        .expect("status not reached in time")
        .expect("engine stopped")
        .clone();
    status
}
