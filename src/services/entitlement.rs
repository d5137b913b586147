//! Plan entitlement validation for product selections.
//!
//! Membership is set semantics: the order of a plan's entitlement list never
//! matters, and duplicate ids in a request are collapsed rather than
//! rejected so they cannot yield duplicate active selections.

use crate::error::AppError;
use crate::models::SubscriptionPlan;
use std::collections::HashSet;
use uuid::Uuid;

/// Validate `requested` against the plan's entitlement set.
///
/// Returns the deduplicated request (first occurrence order preserved) when
/// every id is entitled, or `BadRequest` naming the offending ids.
pub fn validate_selection(
    plan: &SubscriptionPlan,
    requested: &[Uuid],
) -> Result<Vec<Uuid>, AppError> {
    let entitled: HashSet<Uuid> = plan.product_ids.iter().copied().collect();

    let mut seen = HashSet::new();
    let mut deduped = Vec::with_capacity(requested.len());
    let mut invalid = Vec::new();

    for id in requested {
        if !seen.insert(*id) {
            continue;
        }
        if entitled.contains(id) {
            deduped.push(*id);
        } else {
            invalid.push(*id);
        }
    }

    if !invalid.is_empty() {
        let listed = invalid
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Products [{}] are not available in this plan",
            listed
        )));
    }

    Ok(deduped)
}
