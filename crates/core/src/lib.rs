//! LeadSync Core - cache, reconciliation and session logic for leads and
//! audiences.
//!
//! The crate is backend-agnostic: it talks to the remote store and change
//! stream through the traits in [`remote`], implemented by the
//! `leadsync-remote` crate.

pub mod audiences;
pub mod constants;
pub mod errors;
pub mod identity;
pub mod leads;
pub mod limits;
pub mod remote;
pub mod sync;

pub use sync::{LeadSession, SessionManager, SyncConfig, SyncStatus};

// Re-export error types
pub use errors::Error;
pub use errors::Result;
