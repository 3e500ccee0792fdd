use time::OffsetDateTime;
use uuid::Uuid;

use super::model::UserProfile;
use super::repo::load_or_create;
use crate::{error::AppError, ledger::aggregator::DailyLedgerAggregator, state::AppState};

/// Profile as of `now`, boundary resets applied in memory only.
pub async fn read_profile(
    state: &AppState,
    user_id: Uuid,
    now: OffsetDateTime,
) -> Result<UserProfile, AppError> {
    let mut profile = load_or_create(state.profiles.as_ref(), user_id, now).await?;
    state.aggregator.check_and_reset_daily(&mut profile, now);
    state.aggregator.check_and_reset_quotas(&mut profile, now);
    Ok(profile)
}

/// Load, bring boundaries up to date, apply `f`, write through.
/// Nothing is persisted when `f` fails.
pub async fn mutate_profile<T, F>(
    state: &AppState,
    user_id: Uuid,
    now: OffsetDateTime,
    f: F,
) -> Result<T, AppError>
where
    F: FnOnce(&DailyLedgerAggregator, &mut UserProfile) -> Result<T, AppError>,
{
    let mut profile = read_profile(state, user_id, now).await?;
    let out = f(&state.aggregator, &mut profile)?;
    profile.updated_at = now;
    state.profiles.save(&profile).await?;
    Ok(out)
}
