//! Bulk reads that seed or refresh a session's cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::Value;

use super::config::SyncConfig;
use crate::audiences::{AudienceRecord, AudienceRow};
use crate::constants::{
    AUDIENCE_COLUMNS, CREATED_AT_COLUMN, LEAD_COLUMNS, NO_ROWS_CODE, OWNER_COLUMN,
    PROFILE_COLUMNS,
};
use crate::errors::{FetchError, RemoteError, ValidationError};
use crate::leads::Lead;
use crate::limits::{OwnerProfile, ProfileRow};
use crate::remote::{FromRow, QueryFilter, RemoteStore, Table};

/// Point-in-time view of one owner's data, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub profile: OwnerProfile,
    pub audiences: Vec<AudienceRecord>,
    pub leads: Vec<Lead>,
}

/// Reads a full [`Snapshot`] with bounded, fixed-delay retries.
#[derive(Clone)]
pub struct SnapshotLoader {
    store: Arc<dyn RemoteStore>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl SnapshotLoader {
    pub fn new(store: Arc<dyn RemoteStore>, config: &SyncConfig) -> Self {
        Self {
            store,
            max_attempts: config.max_fetch_attempts.max(1),
            retry_delay: config.retry_delay,
        }
    }

    /// Loads profile, audiences and leads for `owner_id`.
    ///
    /// Each attempt issues the three reads concurrently and succeeds only if
    /// all of them do. Failed attempts are retried after `retry_delay`; once
    /// the attempts are used up the last remote error is returned as
    /// [`FetchError::Terminal`].
    pub async fn fetch_all(&self, owner_id: &str) -> Result<Snapshot, FetchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch_once(owner_id).await {
                Ok(snapshot) => {
                    if attempt > 1 {
                        info!("Snapshot for owner {} loaded on attempt {}", owner_id, attempt);
                    }
                    return Ok(snapshot);
                }
                Err(source) => {
                    warn!(
                        "{}",
                        FetchError::Transient {
                            attempt,
                            source: source.clone(),
                        }
                    );
                    if attempt >= self.max_attempts {
                        return Err(FetchError::Terminal {
                            attempts: attempt,
                            last: source,
                        });
                    }
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    async fn fetch_once(&self, owner_id: &str) -> Result<Snapshot, RemoteError> {
        let profile_filter = QueryFilter::new()
            .select(PROFILE_COLUMNS)
            .eq("id", owner_id)
            .single();
        let audience_filter = QueryFilter::new()
            .select(AUDIENCE_COLUMNS)
            .eq(OWNER_COLUMN, owner_id)
            .order_desc(CREATED_AT_COLUMN);
        let lead_filter = QueryFilter::new()
            .select(LEAD_COLUMNS)
            .eq(OWNER_COLUMN, owner_id)
            .order_desc(CREATED_AT_COLUMN);

        let (profile_rows, audience_rows, lead_rows) = futures::try_join!(
            self.store.query(Table::Profiles, &profile_filter),
            self.store.query(Table::Audiences, &audience_filter),
            self.store.query(Table::Leads, &lead_filter),
        )?;

        let profile = decode_profile(owner_id, profile_rows)?;
        let (audiences, nested_counts) = decode_audiences(audience_rows);
        let leads = decode_rows::<Lead>(Table::Leads, lead_rows);
        log_count_drift(&nested_counts, &leads);

        debug!(
            "Fetched snapshot for owner {}: {} audiences, {} leads",
            owner_id,
            audiences.len(),
            leads.len()
        );
        Ok(Snapshot {
            profile,
            audiences,
            leads,
        })
    }
}

fn decode_profile(owner_id: &str, rows: Vec<Value>) -> Result<OwnerProfile, RemoteError> {
    let row = rows.into_iter().next().ok_or_else(|| {
        RemoteError::new(
            NO_ROWS_CODE,
            format!("No profile row for owner {}", owner_id),
        )
    })?;
    let row: ProfileRow = serde_json::from_value(row)
        .map_err(|e| RemoteError::new("invalid_row", format!("Malformed profile row: {}", e)))?;
    Ok(OwnerProfile::from(row))
}

/// Decodes audiences and keeps the size of each embedded lead list.
fn decode_audiences(rows: Vec<Value>) -> (Vec<AudienceRecord>, HashMap<String, usize>) {
    let mut audiences = Vec::with_capacity(rows.len());
    let mut nested_counts = HashMap::new();
    for value in rows {
        let decoded = serde_json::from_value::<AudienceRow>(value)
            .map_err(ValidationError::from)
            .and_then(|row| {
                let nested = row.leads.as_ref().map(Vec::len);
                AudienceRecord::try_from(row).map(|record| (record, nested))
            });
        match decoded {
            Ok((record, nested)) => {
                if let Some(nested) = nested {
                    nested_counts.insert(record.id.clone(), nested);
                }
                audiences.push(record);
            }
            Err(e) => warn!("Dropping malformed {} row: {}", Table::Audiences, e),
        }
    }
    (audiences, nested_counts)
}

fn decode_rows<T: FromRow>(table: Table, rows: Vec<Value>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|value| match T::from_value(value) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Dropping malformed {} row: {}", table, e);
                None
            }
        })
        .collect()
}

/// The embedded lead lists are only used as a cross-check; counts are always
/// projected from the flat lead list.
fn log_count_drift(nested_counts: &HashMap<String, usize>, leads: &[Lead]) {
    let mut flat_counts: HashMap<&str, usize> = HashMap::new();
    for lead in leads {
        if let Some(audience_id) = lead.audience_id.as_deref() {
            *flat_counts.entry(audience_id).or_default() += 1;
        }
    }
    for (audience_id, nested) in nested_counts {
        let flat = flat_counts.get(audience_id.as_str()).copied().unwrap_or(0);
        if flat != *nested {
            debug!(
                "Audience {} embeds {} leads but the lead read returned {}",
                audience_id, nested, flat
            );
        }
    }
}
