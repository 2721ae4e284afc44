//! Typed change events and their decoding from raw stream payloads.

use serde::Deserialize;
use serde_json::Value;

use crate::audiences::AudienceRecord;
use crate::errors::ValidationError;
use crate::leads::Lead;
use crate::remote::{ChangeKind, FromRow, RawChange, Table};

/// Identity of a deleted row. Deletes only carry the pre-image key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowKey {
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct KeyRow {
    #[serde(default)]
    id: Option<String>,
}

impl RowKey {
    fn from_value(value: Value) -> Result<Self, ValidationError> {
        let row: KeyRow = serde_json::from_value(value)?;
        row.id
            .filter(|id| !id.is_empty())
            .map(|id| RowKey { id })
            .ok_or_else(|| ValidationError::MissingField("id".to_string()))
    }
}

/// A single change to an entity of type `T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent<T> {
    Insert(T),
    Update(T),
    Delete(RowKey),
}

impl<T> ChangeEvent<T> {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert(_) => ChangeKind::Insert,
            ChangeEvent::Update(_) => ChangeKind::Update,
            ChangeEvent::Delete(_) => ChangeKind::Delete,
        }
    }
}

impl<T: FromRow> ChangeEvent<T> {
    /// Decodes a raw notification. Inserts and updates need the new row,
    /// deletes need the old row's id.
    pub fn decode(raw: RawChange) -> Result<Self, ValidationError> {
        match raw.kind {
            ChangeKind::Insert => raw
                .new
                .ok_or_else(|| ValidationError::MissingField("new".to_string()))
                .and_then(T::from_value)
                .map(ChangeEvent::Insert),
            ChangeKind::Update => raw
                .new
                .ok_or_else(|| ValidationError::MissingField("new".to_string()))
                .and_then(T::from_value)
                .map(ChangeEvent::Update),
            ChangeKind::Delete => raw
                .old
                .ok_or_else(|| ValidationError::MissingField("old".to_string()))
                .and_then(RowKey::from_value)
                .map(ChangeEvent::Delete),
        }
    }
}

pub type AudienceEvent = ChangeEvent<AudienceRecord>;
pub type LeadEvent = ChangeEvent<Lead>;

/// An event from either channel, as delivered to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Audience(AudienceEvent),
    Lead(LeadEvent),
}

impl StreamEvent {
    /// Decodes a raw notification received on `table`'s channel.
    pub fn decode(table: Table, raw: RawChange) -> Result<Self, ValidationError> {
        match table {
            Table::Audiences => ChangeEvent::decode(raw).map(StreamEvent::Audience),
            Table::Leads => ChangeEvent::decode(raw).map(StreamEvent::Lead),
            Table::Profiles => Err(ValidationError::InvalidInput(format!(
                "no change events are handled for '{}'",
                table
            ))),
        }
    }
}
