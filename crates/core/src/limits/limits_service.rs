use super::limits_model::{LeadLimit, PlanTier};

/// Computes lead usage against the plan ceiling.
///
/// Pure and stateless; callers pass the live lead count from the cache.
/// `remaining` never goes below zero, even when an owner was downgraded
/// below their current usage.
pub fn compute_limit(plan: PlanTier, current_lead_count: usize) -> LeadLimit {
    let total = plan.lead_ceiling();
    LeadLimit {
        plan,
        used: current_lead_count,
        total,
        remaining: total.saturating_sub(current_lead_count),
    }
}
