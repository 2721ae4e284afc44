//! Remote collaborator contracts: the row store and the change stream.
//!
//! Backends live in other crates; this module only defines what the sync
//! engine needs from them.

mod remote_model;
mod remote_traits;

pub use remote_model::{
    ChangeKind, FromRow, OrderBy, QueryFilter, RawChange, RowFilter, Table,
};
pub use remote_traits::{ChangeChannel, ChangeStream, RemoteStore};
