//! Per-owner sync session: cache, engine, subscriptions and mutations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::config::SyncConfig;
use super::engine_actor::{spawn_engine, EngineHandle, SyncStatus};
use super::snapshot_loader::SnapshotLoader;
use super::subscriber::{ChangeStreamSubscriber, SubscriptionHandle};
use crate::audiences::{Audience, AudienceRecord, NewAudience, NewAudienceRow};
use crate::constants::OWNER_COLUMN;
use crate::errors::{Error, RemoteError, Result};
use crate::leads::{Lead, NewLead, NewLeadRow};
use crate::limits::{LeadLimit, OwnerProfile};
use crate::remote::{ChangeStream, FromRow, QueryFilter, RemoteStore, Table};

#[derive(Default)]
struct FetchSlot {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

/// Live mirror of one owner's leads and audiences.
///
/// Reads come from the local cache. Mutations go straight to the remote
/// store and are reflected locally only once the change stream reports them.
pub struct LeadSession {
    owner_id: String,
    store: Arc<dyn RemoteStore>,
    loader: SnapshotLoader,
    engine: EngineHandle,
    fetch: tokio::sync::Mutex<FetchSlot>,
    subscription: Mutex<Option<SubscriptionHandle>>,
    closed: AtomicBool,
}

impl LeadSession {
    /// Starts the initial fetch and both change subscriptions for `owner_id`.
    pub async fn start(
        owner_id: impl Into<String>,
        store: Arc<dyn RemoteStore>,
        stream: Arc<dyn ChangeStream>,
        config: &SyncConfig,
    ) -> Result<Arc<Self>> {
        let owner_id = owner_id.into();
        let engine = spawn_engine(config);
        let session = Arc::new(Self {
            loader: SnapshotLoader::new(Arc::clone(&store), config),
            owner_id,
            store,
            engine,
            fetch: tokio::sync::Mutex::new(FetchSlot::default()),
            subscription: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        session.refresh().await?;
        let handle = ChangeStreamSubscriber::new(stream)
            .subscribe(&session.owner_id, Arc::new(session.engine.clone()));
        *session
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!("Lead session started for owner {}", session.owner_id);
        Ok(session)
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Starts a fresh snapshot fetch, superseding any fetch in flight.
    ///
    /// Returns once the fetch is registered; completion is observable
    /// through [`LeadSession::watch`].
    pub async fn refresh(&self) -> Result<()> {
        self.ensure_open()?;
        let mut slot = self.fetch.lock().await;
        slot.generation += 1;
        let generation = slot.generation;
        if let Some(previous) = slot.task.take() {
            previous.abort();
        }
        self.engine.begin_fetch(generation).await?;

        let loader = self.loader.clone();
        let engine = self.engine.clone();
        let owner_id = self.owner_id.clone();
        slot.task = Some(tokio::spawn(async move {
            let delivered = match loader.fetch_all(&owner_id).await {
                Ok(snapshot) => engine.apply_snapshot(generation, snapshot).await.map(|_| ()),
                Err(e) => engine.fail_fetch(generation, e).await.map(|_| ()),
            };
            if let Err(e) = delivered {
                debug!("Fetch {} finished after the session closed: {}", generation, e);
            }
        }));
        debug!("Started fetch {} for owner {}", generation, self.owner_id);
        Ok(())
    }

    /// Waits until no fetch is in flight and returns the status at that point.
    pub async fn wait_until_settled(&self) -> SyncStatus {
        let mut rx = self.engine.watch();
        if rx.wait_for(|status| !status.loading).await.is_err() {
            debug!("Engine for owner {} stopped while loading", self.owner_id);
        }
        let status = rx.borrow().clone();
        status
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Creates an audience and returns it with no leads.
    pub async fn create_audience(
        &self,
        name: impl Into<String>,
        description: Option<String>,
    ) -> Result<Audience> {
        self.ensure_open()?;
        let audience = NewAudience::new(name, description).validate()?;
        let name = audience.name.clone();
        let row = to_row(&NewAudienceRow::new(&self.owner_id, audience))?;

        let rows = self
            .store
            .insert(Table::Audiences, vec![row])
            .await
            .map_err(|e| duplicate_or_remote(e, &name))?;
        let created = rows
            .into_iter()
            .next()
            .ok_or_else(|| Error::Unexpected("Audience insert returned no row".to_string()))?;
        let record = AudienceRecord::from_value(created)?;

        info!("Created audience '{}' ({})", record.name, record.id);
        Ok(Audience::project(&record, Vec::new()))
    }

    /// Renames an audience and replaces its description.
    pub async fn update_audience(
        &self,
        audience_id: &str,
        name: impl Into<String>,
        description: Option<String>,
    ) -> Result<()> {
        self.ensure_open()?;
        let audience = NewAudience::new(name, description).validate()?;
        let patch = json!({
            "name": audience.name,
            "description": audience.description,
        });

        self.store
            .update(Table::Audiences, &self.owned_row(audience_id), patch)
            .await
            .map_err(|e| duplicate_or_remote(e, &audience.name))?;
        debug!("Updated audience {}", audience_id);
        Ok(())
    }

    /// Inserts leads into an audience. An empty list is a no-op.
    pub async fn add_leads_to_audience(&self, audience_id: &str, leads: Vec<NewLead>) -> Result<()> {
        self.ensure_open()?;
        if leads.is_empty() {
            return Ok(());
        }
        let count = leads.len();
        let rows = leads
            .into_iter()
            .map(|lead| to_row(&NewLeadRow::new(&self.owner_id, audience_id, lead)))
            .collect::<Result<Vec<_>>>()?;

        self.store
            .insert(Table::Leads, rows)
            .await
            .map_err(|e| Error::Insert(e.to_string()))?;
        info!("Added {} leads to audience {}", count, audience_id);
        Ok(())
    }

    /// Deletes an audience. Its leads are left in place.
    pub async fn delete_audience(&self, audience_id: &str) -> Result<()> {
        self.ensure_open()?;
        self.store
            .delete(Table::Audiences, &self.owned_row(audience_id))
            .await?;
        info!("Deleted audience {}", audience_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn leads(&self) -> Vec<Lead> {
        self.engine.reader().leads()
    }

    pub fn lead(&self, id: &str) -> Option<Lead> {
        self.engine.reader().lead(id)
    }

    pub fn audiences(&self) -> Vec<Audience> {
        self.engine.reader().audiences()
    }

    pub fn audience(&self, id: &str) -> Option<Audience> {
        self.engine.reader().audience(id)
    }

    pub fn profile(&self) -> Option<OwnerProfile> {
        self.engine.reader().profile()
    }

    pub fn lead_limit(&self) -> Option<LeadLimit> {
        self.engine.reader().lead_limit()
    }

    pub fn loading(&self) -> bool {
        self.engine.status().loading
    }

    pub fn error(&self) -> Option<String> {
        self.engine.status().error
    }

    pub fn status(&self) -> SyncStatus {
        self.engine.status()
    }

    /// Receiver that ticks whenever loading, error or cache contents change.
    pub fn watch(&self) -> watch::Receiver<SyncStatus> {
        self.engine.watch()
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Cancels subscriptions and any in-flight fetch. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.shutdown().await;
        }
        let generation = {
            let mut slot = self.fetch.lock().await;
            if let Some(task) = slot.task.take() {
                task.abort();
            }
            slot.generation
        };
        // An aborted fetch never reports back, so close it in the engine.
        if let Err(e) = self.engine.cancel_fetch(generation).await {
            debug!("Engine for owner {} already stopped: {}", self.owner_id, e);
        }
        info!("Lead session closed for owner {}", self.owner_id);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    fn owned_row(&self, id: &str) -> QueryFilter {
        QueryFilter::new()
            .eq("id", id)
            .eq(OWNER_COLUMN, self.owner_id.as_str())
    }
}

impl Drop for LeadSession {
    fn drop(&mut self) {
        if let Some(subscription) = self
            .subscription
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            subscription.cancel();
        }
        let slot = self.fetch.get_mut();
        if let Some(task) = slot.task.take() {
            task.abort();
            self.engine.try_cancel_fetch(slot.generation);
        }
    }
}

fn to_row<T: Serialize>(row: &T) -> Result<Value> {
    serde_json::to_value(row).map_err(|e| Error::Unexpected(e.to_string()))
}

fn duplicate_or_remote(err: RemoteError, name: &str) -> Error {
    if err.is_unique_violation() {
        warn!("Audience name '{}' is already taken", name);
        Error::DuplicateName(name.to_string())
    } else {
        Error::Remote(err)
    }
}
