use std::sync::Arc;

use leadsync_core::identity::{IdentityProvider, WatchIdentity};
use leadsync_core::{LeadSession, SessionManager, SyncStatus};
use leadsync_remote::{RealtimeStream, RestStore};
use tokio::sync::watch;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;

/// Our crates at `info`, dependencies (reqwest, tungstenite) only when they warn.
const DEFAULT_LOG_FILTER: &str = "warn,leadsync=info,leadsync_core=info,leadsync_remote=info";

/// Installs the subscriber. `RUST_LOG` overrides [`DEFAULT_LOG_FILTER`];
/// `LEADSYNC_LOG_FORMAT=json` switches to one JSON object per line.
pub fn init_tracing() {
    let json = std::env::var("LEADSYNC_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .init();
    } else {
        registry.with(fmt::layer().compact().with_target(true)).init();
    }
}

pub fn build_manager(config: &Config) -> anyhow::Result<SessionManager> {
    let remote = config.remote()?;
    let store = Arc::new(RestStore::new(&remote)?);
    let stream = Arc::new(RealtimeStream::new(remote));

    let identity: Arc<dyn IdentityProvider> =
        Arc::new(WatchIdentity::new(config.owner_id.clone()));
    if identity.current_owner().is_none() {
        tracing::warn!("LEADSYNC_OWNER_ID is not set; staying signed out");
    }

    Ok(SessionManager::spawn(
        identity,
        store,
        stream,
        config.sync.clone(),
    ))
}

/// Logs the cache summary on every status change until ctrl-c.
pub async fn follow(manager: &SessionManager) -> anyhow::Result<()> {
    let mut sessions = manager.sessions();
    let mut current = sessions.borrow_and_update().clone();

    loop {
        let mut status = match &current {
            Some(session) => session.watch(),
            // Never changes; keeps the select shape uniform while signed out.
            None => watch::channel(SyncStatus::default()).1,
        };
        if let Some(session) = &current {
            report(session, &status.borrow_and_update());
        }

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down");
                    return Ok(());
                }
                changed = sessions.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    current = sessions.borrow_and_update().clone();
                    break;
                }
                changed = status.changed(), if current.is_some() => {
                    if changed.is_err() {
                        break;
                    }
                    if let Some(session) = &current {
                        let snapshot = status.borrow_and_update().clone();
                        report(session, &snapshot);
                    }
                }
            }
        }
    }
}

fn report(session: &LeadSession, status: &SyncStatus) {
    if status.loading {
        tracing::info!(owner = session.owner_id(), "Loading leads and audiences");
        return;
    }
    if let Some(error) = &status.error {
        tracing::error!(owner = session.owner_id(), "Sync failed: {}", error);
    }
    if let Some(degraded) = &status.stream_degraded {
        tracing::warn!(owner = session.owner_id(), "Live updates degraded: {}", degraded);
    }

    let audiences = session.audiences();
    let leads = session.leads();
    match session.lead_limit() {
        Some(limit) => tracing::info!(
            owner = session.owner_id(),
            revision = status.revision,
            audiences = audiences.len(),
            leads = leads.len(),
            plan = limit.plan.as_str(),
            remaining = limit.remaining,
            "Cache updated"
        ),
        None => tracing::info!(
            owner = session.owner_id(),
            revision = status.revision,
            audiences = audiences.len(),
            leads = leads.len(),
            "Cache updated"
        ),
    }
}
