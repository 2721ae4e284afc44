//! Lead limits module - plan tiers, owner profile and usage computation.

mod limits_model;
mod limits_service;

pub use limits_model::{LeadLimit, OwnerProfile, PlanTier, ProfileRow};
pub use limits_service::compute_limit;
