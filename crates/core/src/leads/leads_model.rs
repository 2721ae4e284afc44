//! Lead domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::remote::FromRow;

/// Domain model for a lead as held in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub audience_id: Option<String>,
    pub full_name: String,
    pub profile_url: String,
    pub headline: Option<String>,
    /// Tag of the ingestion pipeline that produced the lead
    pub source_operation: String,
    pub created_at: DateTime<Utc>,
}

/// Row shape of the `leads` table.
#[derive(Debug, Clone, Deserialize)]
pub struct LeadRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub audience_id: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub profile_url: Option<String>,
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub source_operation: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<LeadRow> for Lead {
    type Error = ValidationError;

    fn try_from(row: LeadRow) -> Result<Self, Self::Error> {
        let id = row
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ValidationError::MissingField("id".to_string()))?;

        Ok(Lead {
            id,
            audience_id: row.audience_id.filter(|a| !a.is_empty()),
            full_name: row.full_name.unwrap_or_default(),
            profile_url: row.profile_url.unwrap_or_default(),
            headline: row.headline.filter(|h| !h.is_empty()),
            source_operation: row.source_operation.unwrap_or_default(),
            created_at: row.created_at,
        })
    }
}

impl FromRow for Lead {
    type Row = LeadRow;

    fn from_row(row: LeadRow) -> Result<Self, ValidationError> {
        Lead::try_from(row)
    }
}

/// Input model for adding a lead to an audience. Every field is optional;
/// missing text fields are stored as empty strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLead {
    pub full_name: Option<String>,
    pub profile_url: Option<String>,
    pub headline: Option<String>,
    pub source_operation: Option<String>,
}

/// Insert payload for the `leads` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewLeadRow {
    pub user_id: String,
    pub audience_id: String,
    pub full_name: String,
    pub profile_url: String,
    pub headline: Option<String>,
    pub source_operation: String,
}

impl NewLeadRow {
    pub fn new(owner_id: &str, audience_id: &str, lead: NewLead) -> Self {
        Self {
            user_id: owner_id.to_string(),
            audience_id: audience_id.to_string(),
            full_name: lead.full_name.unwrap_or_default(),
            profile_url: lead.profile_url.unwrap_or_default(),
            headline: lead.headline.filter(|h| !h.trim().is_empty()),
            source_operation: lead.source_operation.unwrap_or_default(),
        }
    }
}
