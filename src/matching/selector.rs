//! Candidate pool selection.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::data::models::{User, UserId};
use crate::data::source::{EligibilityFilter, ProfileSource};

/// Build the candidate filter for `user`, or `None` if the user's role is
/// never matched.
pub fn candidate_filter(
    user: &User,
    now: DateTime<Utc>,
    dormancy_window: Duration,
    require_active: bool,
) -> Option<EligibilityFilter> {
    let role = user.role.opposite()?;
    let window = chrono::Duration::from_std(dormancy_window).unwrap_or(chrono::Duration::MAX);
    let dormancy_cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
    Some(EligibilityFilter {
        role,
        exclude_id: user.id,
        dormancy_cutoff,
        require_active,
    })
}

/// Eligible opposite-role candidates for `user`.
///
/// Coordinators get an empty pool without touching the store.
pub async fn candidates<S>(
    source: &S,
    user: &User,
    dormancy_window: Duration,
    require_active: bool,
) -> Result<Vec<UserId>>
where
    S: ProfileSource + ?Sized,
{
    match candidate_filter(user, Utc::now(), dormancy_window, require_active) {
        Some(filter) => source.list_eligible_users(&filter).await,
        None => Ok(Vec::new()),
    }
}
