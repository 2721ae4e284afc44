//! Audience domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::AUDIENCE_NAME_MAX_LEN;
use crate::errors::ValidationError;
use crate::leads::Lead;
use crate::remote::FromRow;

/// Audience as stored in the cache.
///
/// Lead membership is deliberately absent: it is projected from the flat
/// lead collection whenever an [`Audience`] view is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudienceRecord {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Read-side view of an audience with its projected leads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Audience {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub leads: Vec<Lead>,
    pub total_leads: usize,
}

impl Audience {
    /// Builds the view from a stored record and the leads that reference it.
    pub fn project(record: &AudienceRecord, leads: Vec<Lead>) -> Self {
        Audience {
            id: record.id.clone(),
            name: record.name.clone(),
            description: record.description.clone(),
            created_at: record.created_at,
            total_leads: leads.len(),
            leads,
        }
    }
}

/// Identifier-only view of a nested lead, as embedded in audience reads.
#[derive(Debug, Clone, Deserialize)]
pub struct NestedLeadRef {
    #[serde(default)]
    pub id: Option<String>,
}

/// Row shape of the `audiences` table, optionally with embedded leads.
#[derive(Debug, Clone, Deserialize)]
pub struct AudienceRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub leads: Option<Vec<NestedLeadRef>>,
}

impl TryFrom<AudienceRow> for AudienceRecord {
    type Error = ValidationError;

    fn try_from(row: AudienceRow) -> Result<Self, Self::Error> {
        let id = row
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ValidationError::MissingField("id".to_string()))?;
        let name = row
            .name
            .ok_or_else(|| ValidationError::MissingField("name".to_string()))?;

        Ok(AudienceRecord {
            id,
            name,
            description: row.description.filter(|d| !d.is_empty()),
            created_at: row.created_at,
        })
    }
}

impl FromRow for AudienceRecord {
    type Row = AudienceRow;

    fn from_row(row: AudienceRow) -> Result<Self, ValidationError> {
        AudienceRecord::try_from(row)
    }
}

/// Input model for creating an audience.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAudience {
    pub name: String,
    pub description: Option<String>,
}

impl NewAudience {
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            name: name.into(),
            description,
        }
    }

    /// Trims the input and checks the name constraints.
    ///
    /// A blank description is normalized to `None`.
    pub fn validate(self) -> Result<Self, ValidationError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::MissingField("name".to_string()));
        }
        if name.chars().count() > AUDIENCE_NAME_MAX_LEN {
            return Err(ValidationError::TooLong {
                field: "name".to_string(),
                max: AUDIENCE_NAME_MAX_LEN,
            });
        }

        let description = self
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        Ok(Self { name, description })
    }
}

/// Insert payload for the `audiences` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewAudienceRow {
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
}

impl NewAudienceRow {
    pub fn new(owner_id: &str, audience: NewAudience) -> Self {
        Self {
            user_id: owner_id.to_string(),
            name: audience.name,
            description: audience.description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_trims_name_and_description() {
        let audience = NewAudience::new("  Prospects  ", Some("   ".to_string()))
            .validate()
            .unwrap();
        assert_eq!(audience.name, "Prospects");
        assert_eq!(audience.description, None);
    }

    #[test]
    fn test_validate_rejects_blank_name() {
        let err = NewAudience::new("   ", None).validate().unwrap_err();
        assert_eq!(err, ValidationError::MissingField("name".to_string()));
    }

    #[test]
    fn test_validate_name_length_boundary() {
        assert!(NewAudience::new("a".repeat(100), None).validate().is_ok());

        let err = NewAudience::new("a".repeat(101), None)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ValidationError::TooLong { max: 100, .. }));
    }

    #[test]
    fn test_audience_row_ignores_embedded_leads() {
        let row: AudienceRow = serde_json::from_value(json!({
            "id": "aud-1",
            "name": "Prospects",
            "description": null,
            "created_at": "2024-03-01T10:00:00Z",
            "leads": [{ "id": "lead-1", "full_name": "Jane Doe" }]
        }))
        .unwrap();
        assert_eq!(row.leads.as_ref().map(Vec::len), Some(1));

        let record = AudienceRecord::try_from(row).unwrap();
        assert_eq!(record.name, "Prospects");
        assert_eq!(record.description, None);
    }

    #[test]
    fn test_projection_counts_leads() {
        let record = AudienceRecord {
            id: "aud-1".to_string(),
            name: "Prospects".to_string(),
            description: None,
            created_at: Utc::now(),
        };
        let view = Audience::project(&record, Vec::new());
        assert_eq!(view.total_leads, 0);
        assert!(view.leads.is_empty());
    }
}
