//! Plan tiers, owner profile and lead limit models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// Subscription plan tiers, each with a fixed lead ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanTier {
    Trial,
    Starter,
    Explorer,
    Pro,
}

impl PlanTier {
    pub const ALL: [PlanTier; 4] = [
        PlanTier::Trial,
        PlanTier::Starter,
        PlanTier::Explorer,
        PlanTier::Pro,
    ];

    /// Maximum number of leads an owner on this tier may hold.
    pub const fn lead_ceiling(self) -> usize {
        match self {
            PlanTier::Trial => 3_000,
            PlanTier::Starter => 5_000,
            PlanTier::Explorer => 10_000,
            PlanTier::Pro => 15_000,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            PlanTier::Trial => "Trial",
            PlanTier::Starter => "Starter",
            PlanTier::Explorer => "Explorer",
            PlanTier::Pro => "Pro",
        }
    }

    /// Resolves a stored plan name, falling back to `Trial` for anything
    /// unrecognized.
    pub fn from_plan_name(name: &str) -> Self {
        name.parse().unwrap_or(PlanTier::Trial)
    }
}

impl FromStr for PlanTier {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlanTier::ALL
            .into_iter()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::InvalidInput(format!("Unknown plan '{}'", s)))
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Usage against the plan's lead ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadLimit {
    pub plan: PlanTier,
    pub used: usize,
    pub total: usize,
    pub remaining: usize,
}

/// Owner profile and credit balance, read with every snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerProfile {
    pub plan: String,
    pub total_credits: i64,
    pub used_credits: i64,
    pub credits_left: i64,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub subscription_ends_at: Option<DateTime<Utc>>,
}

impl OwnerProfile {
    pub fn tier(&self) -> PlanTier {
        PlanTier::from_plan_name(&self.plan)
    }
}

/// Row shape of the `credits_calculation_and_profiles` view.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileRow {
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub total_credits: Option<i64>,
    #[serde(default)]
    pub used_credits: Option<i64>,
    #[serde(default)]
    pub credits_left: Option<i64>,
    #[serde(default)]
    pub trial_ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub subscription_end_at: Option<DateTime<Utc>>,
}

impl From<ProfileRow> for OwnerProfile {
    fn from(row: ProfileRow) -> Self {
        OwnerProfile {
            plan: row
                .plan
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| PlanTier::Trial.as_str().to_string()),
            total_credits: row.total_credits.unwrap_or_default(),
            used_credits: row.used_credits.unwrap_or_default(),
            credits_left: row.credits_left.unwrap_or_default(),
            trial_ends_at: row.trial_ends_at,
            subscription_ends_at: row.subscription_end_at,
        }
    }
}
