//! Audiences module - domain models, projections and input validation.

mod audiences_model;

pub use audiences_model::{
    Audience, AudienceRecord, AudienceRow, NestedLeadRef, NewAudience, NewAudienceRow,
};
