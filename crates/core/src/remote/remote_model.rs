//! Query, filter and change payload types shared with remote backends.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ValidationError;

/// Remote tables the sync engine reads or subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Leads,
    Audiences,
    #[serde(rename = "credits_calculation_and_profiles")]
    Profiles,
}

impl Table {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Table::Leads => "leads",
            Table::Audiences => "audiences",
            Table::Profiles => "credits_calculation_and_profiles",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Equality predicate on a single column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowFilter {
    pub column: String,
    pub value: String,
}

impl RowFilter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

/// Read or write filter.
///
/// ```
/// use leadsync_core::remote::QueryFilter;
///
/// let filter = QueryFilter::new()
///     .select("id,name")
///     .eq("user_id", "owner-1")
///     .order_desc("created_at");
/// assert_eq!(filter.filters.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    pub select: Option<String>,
    pub filters: Vec<RowFilter>,
    pub order: Option<OrderBy>,
    /// Expect exactly one row
    pub single: bool,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.select = Some(columns.into());
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push(RowFilter::eq(column, value));
        self
    }

    pub fn order_desc(mut self, column: impl Into<String>) -> Self {
        self.order = Some(OrderBy {
            column: column.into(),
            ascending: false,
        });
        self
    }

    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Untyped change notification as delivered by a change stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
}

impl RawChange {
    pub fn insert(row: Value) -> Self {
        Self {
            kind: ChangeKind::Insert,
            new: Some(row),
            old: None,
        }
    }

    pub fn update(row: Value) -> Self {
        Self {
            kind: ChangeKind::Update,
            new: Some(row),
            old: None,
        }
    }

    pub fn delete(old_row: Value) -> Self {
        Self {
            kind: ChangeKind::Delete,
            new: None,
            old: Some(old_row),
        }
    }
}

/// Domain types that can be materialized from a remote row.
pub trait FromRow: Sized {
    type Row: DeserializeOwned;

    fn from_row(row: Self::Row) -> Result<Self, ValidationError>;

    fn from_value(value: Value) -> Result<Self, ValidationError> {
        let row: Self::Row = serde_json::from_value(value)?;
        Self::from_row(row)
    }
}
