//! Client-side sync of an owner's leads and audiences.
//!
//! A [`LeadSession`] seeds a [`LocalCache`] from a snapshot, keeps it
//! current from the change stream, and exposes read accessors and
//! remote mutations. [`SessionManager`] ties sessions to the current owner.

mod cache;
mod config;
mod engine;
mod engine_actor;
mod events;
mod session;
mod session_manager;
mod snapshot_loader;
mod subscriber;

pub use cache::{CacheReader, LocalCache};
pub use config::SyncConfig;
pub use engine::{ApplyOutcome, ReconciliationEngine, SnapshotOutcome};
pub use engine_actor::{spawn_engine, EngineHandle, SyncStatus};
pub use events::{AudienceEvent, ChangeEvent, LeadEvent, RowKey, StreamEvent};
pub use session::LeadSession;
pub use session_manager::SessionManager;
pub use snapshot_loader::{Snapshot, SnapshotLoader};
pub use subscriber::{ChangeStreamSubscriber, StreamSink, SubscriptionHandle};
