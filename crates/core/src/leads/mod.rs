//! Leads module - domain models and row mappings.

mod leads_model;

pub use leads_model::{Lead, LeadRow, NewLead, NewLeadRow};
