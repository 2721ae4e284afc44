//! Owner identity source.
//!
//! Every query and subscription is scoped to the owner reported here. A
//! change of owner (sign-in, sign-out, account switch) is what drives
//! session teardown in [`crate::sync::SessionManager`].

use tokio::sync::watch;

/// Supplies the currently authenticated owner.
pub trait IdentityProvider: Send + Sync {
    /// Owner id right now, `None` when signed out.
    fn current_owner(&self) -> Option<String>;

    /// Receiver that observes every owner change.
    fn watch_owner(&self) -> watch::Receiver<Option<String>>;
}

/// Identity provider backed by a `watch` channel, updated by whatever
/// handles authentication.
#[derive(Debug)]
pub struct WatchIdentity {
    tx: watch::Sender<Option<String>>,
}

impl WatchIdentity {
    pub fn new(initial: Option<String>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn signed_in(owner_id: impl Into<String>) -> Self {
        Self::new(Some(owner_id.into()))
    }

    /// Switches to another owner. Setting the same owner again is a no-op.
    pub fn set_owner(&self, owner_id: impl Into<String>) {
        let owner_id = owner_id.into();
        self.tx.send_if_modified(|current| {
            if current.as_deref() == Some(owner_id.as_str()) {
                false
            } else {
                *current = Some(owner_id);
                true
            }
        });
    }

    pub fn sign_out(&self) {
        self.tx.send_if_modified(|current| current.take().is_some());
    }
}

impl Default for WatchIdentity {
    fn default() -> Self {
        Self::new(None)
    }
}

impl IdentityProvider for WatchIdentity {
    fn current_owner(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    fn watch_owner(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}
