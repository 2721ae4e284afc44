//! Supabase backends for `leadsync-core`.
//!
//! [`RestStore`] talks to PostgREST and implements
//! [`leadsync_core::remote::RemoteStore`]; [`RealtimeStream`] joins realtime
//! channels and implements [`leadsync_core::remote::ChangeStream`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use leadsync_remote::{RealtimeStream, RemoteConfig, RestStore};
//!
//! let config = RemoteConfig::from_project_url("https://xyz.supabase.co", anon_key)?
//!     .with_access_token(jwt);
//! let store = RestStore::new(&config)?;
//! let stream = RealtimeStream::new(config);
//! ```

mod config;
mod error;
mod protocol;
mod realtime;
mod rest;

pub use config::RemoteConfig;
pub use error::{RemoteClientError, Result};
pub use realtime::{RealtimeChannel, RealtimeStream};
pub use rest::RestStore;
