//! Keeps exactly one [`LeadSession`] alive for the current owner.

use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::config::SyncConfig;
use super::session::LeadSession;
use crate::errors::{Error, Result};
use crate::identity::IdentityProvider;
use crate::remote::{ChangeStream, RemoteStore};

/// Follows an [`IdentityProvider`] and replaces the session whenever the
/// owner changes. The previous session is fully shut down before the next
/// one starts, so nothing fetched for an old owner reaches the new cache.
pub struct SessionManager {
    sessions: watch::Receiver<Option<Arc<LeadSession>>>,
    stop: watch::Sender<bool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Spawns the identity follower. Must be called from within a tokio runtime.
    pub fn spawn(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn RemoteStore>,
        stream: Arc<dyn ChangeStream>,
        config: SyncConfig,
    ) -> Self {
        let (session_tx, session_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = watch::channel(false);
        let follower = IdentityFollower {
            owners: identity.watch_owner(),
            stop: stop_rx,
            sessions: session_tx,
            store,
            stream,
            config,
        };
        let task = tokio::spawn(follower.run());

        Self {
            sessions: session_rx,
            stop: stop_tx,
            task: tokio::sync::Mutex::new(Some(task)),
        }
    }

    /// Session of the current owner, `None` while signed out.
    pub fn session(&self) -> Option<Arc<LeadSession>> {
        self.sessions.borrow().clone()
    }

    /// Session of the current owner, or [`Error::Unauthenticated`].
    pub fn require_session(&self) -> Result<Arc<LeadSession>> {
        self.session().ok_or(Error::Unauthenticated)
    }

    /// Receiver that observes every session replacement.
    pub fn sessions(&self) -> watch::Receiver<Option<Arc<LeadSession>>> {
        self.sessions.clone()
    }

    /// Stops following identity changes and closes the current session.
    pub async fn shutdown(&self) {
        self.stop.send_replace(true);
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                error!("Session manager task failed: {}", e);
            }
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

struct IdentityFollower {
    owners: watch::Receiver<Option<String>>,
    stop: watch::Receiver<bool>,
    sessions: watch::Sender<Option<Arc<LeadSession>>>,
    store: Arc<dyn RemoteStore>,
    stream: Arc<dyn ChangeStream>,
    config: SyncConfig,
}

impl IdentityFollower {
    async fn run(mut self) {
        let mut current = self.owners.borrow_and_update().clone();
        self.switch_to(current.clone()).await;

        loop {
            tokio::select! {
                _ = stopped(&mut self.stop) => break,
                changed = self.owners.changed() => {
                    if changed.is_err() {
                        debug!("Identity provider dropped; keeping current session");
                        stopped(&mut self.stop).await;
                        break;
                    }
                    let owner = self.owners.borrow_and_update().clone();
                    if owner == current {
                        continue;
                    }
                    current = owner;
                    self.switch_to(current.clone()).await;
                }
            }
        }

        self.close_current().await;
        debug!("Session manager stopped");
    }

    async fn close_current(&self) {
        if let Some(previous) = self.sessions.send_replace(None) {
            previous.shutdown().await;
        }
    }

    async fn switch_to(&self, owner: Option<String>) {
        self.close_current().await;

        let Some(owner_id) = owner else {
            info!("No authenticated owner; lead session idle");
            return;
        };

        match LeadSession::start(
            owner_id.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.stream),
            &self.config,
        )
        .await
        {
            Ok(session) => {
                self.sessions.send_replace(Some(session));
            }
            Err(e) => error!("Failed to start lead session for owner {}: {}", owner_id, e),
        }
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}
