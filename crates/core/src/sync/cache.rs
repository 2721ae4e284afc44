//! In-memory mirror of an owner's leads and audiences.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::warn;

use super::snapshot_loader::Snapshot;
use crate::audiences::{Audience, AudienceRecord};
use crate::leads::Lead;
use crate::limits::{compute_limit, LeadLimit, OwnerProfile};

/// Id-keyed map plus the display order, most recent first.
#[derive(Debug, Clone)]
struct IndexedList<T> {
    by_id: HashMap<String, T>,
    order: VecDeque<String>,
}

impl<T> Default for IndexedList<T> {
    fn default() -> Self {
        Self {
            by_id: HashMap::new(),
            order: VecDeque::new(),
        }
    }
}

impl<T> IndexedList<T> {
    /// Builds the list in the given order; a repeated id keeps its first
    /// occurrence.
    fn from_ordered(items: impl IntoIterator<Item = (String, T)>) -> Self {
        let mut list = Self::default();
        for (id, item) in items {
            if list.by_id.contains_key(&id) {
                warn!("Duplicate id '{}' in snapshot, keeping first occurrence", id);
                continue;
            }
            list.order.push_back(id.clone());
            list.by_id.insert(id, item);
        }
        list
    }

    fn get(&self, id: &str) -> Option<&T> {
        self.by_id.get(id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        self.by_id.get_mut(id)
    }

    /// Prepends a new entry, or replaces an existing one where it stands.
    /// Returns `true` when the id was new.
    fn upsert_front(&mut self, id: String, item: T) -> bool {
        if let Some(existing) = self.by_id.get_mut(&id) {
            *existing = item;
            return false;
        }
        self.order.push_front(id.clone());
        self.by_id.insert(id, item);
        true
    }

    fn remove(&mut self, id: &str) -> Option<T> {
        let removed = self.by_id.remove(id)?;
        if let Some(pos) = self.order.iter().position(|entry| entry == id) {
            self.order.remove(pos);
        }
        Some(removed)
    }

    fn iter(&self) -> impl Iterator<Item = &T> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }
}

/// Authoritative state for one owner session.
///
/// Public methods are read-only and hand out copies; mutation is reserved
/// to the reconciliation engine.
#[derive(Debug, Default)]
pub struct LocalCache {
    leads: IndexedList<Lead>,
    audiences: IndexedList<AudienceRecord>,
    profile: Option<OwnerProfile>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// All leads, most recent first.
    pub fn leads(&self) -> Vec<Lead> {
        self.leads.iter().cloned().collect()
    }

    pub fn lead(&self, id: &str) -> Option<Lead> {
        self.leads.get(id).cloned()
    }

    pub fn lead_count(&self) -> usize {
        self.leads.len()
    }

    /// All audiences, most recent first, each with its projected leads.
    pub fn audiences(&self) -> Vec<Audience> {
        let mut members = self.members_by_audience();
        self.audiences
            .iter()
            .map(|record| {
                let leads = members.remove(record.id.as_str()).unwrap_or_default();
                Audience::project(record, leads)
            })
            .collect()
    }

    pub fn audience(&self, id: &str) -> Option<Audience> {
        let record = self.audiences.get(id)?;
        let leads = self
            .leads
            .iter()
            .filter(|lead| lead.audience_id.as_deref() == Some(id))
            .cloned()
            .collect();
        Some(Audience::project(record, leads))
    }

    pub fn audience_count(&self) -> usize {
        self.audiences.len()
    }

    pub fn profile(&self) -> Option<OwnerProfile> {
        self.profile.clone()
    }

    /// Lead usage against the owner's plan; `None` until a profile is loaded.
    pub fn lead_limit(&self) -> Option<LeadLimit> {
        self.profile
            .as_ref()
            .map(|profile| compute_limit(profile.tier(), self.leads.len()))
    }

    fn members_by_audience(&self) -> HashMap<&str, Vec<Lead>> {
        let mut members: HashMap<&str, Vec<Lead>> = HashMap::new();
        for lead in self.leads.iter() {
            if let Some(audience_id) = lead.audience_id.as_deref() {
                members.entry(audience_id).or_default().push(lead.clone());
            }
        }
        members
    }

    pub(crate) fn replace_all(&mut self, snapshot: Snapshot) {
        self.leads = IndexedList::from_ordered(
            snapshot
                .leads
                .into_iter()
                .map(|lead| (lead.id.clone(), lead)),
        );
        self.audiences = IndexedList::from_ordered(
            snapshot
                .audiences
                .into_iter()
                .map(|record| (record.id.clone(), record)),
        );
        self.profile = Some(snapshot.profile);
    }

    pub(crate) fn upsert_lead_front(&mut self, lead: Lead) -> bool {
        self.leads.upsert_front(lead.id.clone(), lead)
    }

    /// Replaces an existing lead in place; `false` if the id is unknown.
    pub(crate) fn replace_lead(&mut self, lead: Lead) -> bool {
        match self.leads.get_mut(&lead.id) {
            Some(existing) => {
                *existing = lead;
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_lead(&mut self, id: &str) -> bool {
        self.leads.remove(id).is_some()
    }

    pub(crate) fn upsert_audience_front(&mut self, record: AudienceRecord) -> bool {
        self.audiences.upsert_front(record.id.clone(), record)
    }

    /// Patches the user-editable fields of an audience in place.
    pub(crate) fn patch_audience(
        &mut self,
        id: &str,
        name: String,
        description: Option<String>,
    ) -> bool {
        match self.audiences.get_mut(id) {
            Some(record) => {
                record.name = name;
                record.description = description;
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_audience(&mut self, id: &str) -> bool {
        self.audiences.remove(id).is_some()
    }
}

/// Shared, read-only handle on a [`LocalCache`].
///
/// Every accessor returns owned copies, so nothing obtained through a
/// reader can be used to mutate the cache.
#[derive(Debug, Clone, Default)]
pub struct CacheReader {
    inner: Arc<RwLock<LocalCache>>,
}

impl CacheReader {
    pub(crate) fn new(inner: Arc<RwLock<LocalCache>>) -> Self {
        Self { inner }
    }

    fn read(&self) -> RwLockReadGuard<'_, LocalCache> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn leads(&self) -> Vec<Lead> {
        self.read().leads()
    }

    pub fn lead(&self, id: &str) -> Option<Lead> {
        self.read().lead(id)
    }

    pub fn lead_count(&self) -> usize {
        self.read().lead_count()
    }

    pub fn audiences(&self) -> Vec<Audience> {
        self.read().audiences()
    }

    pub fn audience(&self, id: &str) -> Option<Audience> {
        self.read().audience(id)
    }

    pub fn profile(&self) -> Option<OwnerProfile> {
        self.read().profile()
    }

    pub fn lead_limit(&self) -> Option<LeadLimit> {
        self.read().lead_limit()
    }
}

pub(crate) fn write_cache(cache: &RwLock<LocalCache>) -> RwLockWriteGuard<'_, LocalCache> {
    cache.write().unwrap_or_else(PoisonError::into_inner)
}
