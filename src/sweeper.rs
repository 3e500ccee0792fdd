use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::state::AppState;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub updated: usize,
    /// Saved by a request while the sweep held a stale copy; left to the next access.
    pub conflicts: usize,
    pub failed: usize,
}

/// Apply daily and quota boundaries to profiles that are behind one.
/// Writes are conditional on the revision that was loaded, so a request that
/// saved in the meantime always wins.
pub async fn sweep_once(state: &AppState, now: OffsetDateTime) -> anyhow::Result<SweepStats> {
    let mut stats = SweepStats::default();
    let due = state
        .profiles
        .list_due(state.aggregator.quota_window, now)
        .await?;
    for user_id in due {
        stats.scanned += 1;
        let mut profile = match state.profiles.load(user_id).await {
            Ok(Some(p)) => p,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, %user_id, "sweep load failed");
                stats.failed += 1;
                continue;
            }
        };

        let rollover = state.aggregator.check_and_reset_daily(&mut profile, now);
        let quota_reset = state.aggregator.check_and_reset_quotas(&mut profile, now);
        if !(rollover.day_changed || rollover.year_changed || quota_reset) {
            continue;
        }

        profile.updated_at = now;
        match state.profiles.save_if_unchanged(&profile).await {
            Ok(true) => stats.updated += 1,
            Ok(false) => {
                debug!(%user_id, "profile changed during sweep, skipped");
                stats.conflicts += 1;
            }
            Err(e) => {
                warn!(error = %e, %user_id, "sweep save failed");
                stats.failed += 1;
            }
        }
    }
    Ok(stats)
}

/// Re-checks boundaries on a fixed cadence for the life of the process.
pub fn spawn(state: AppState) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.ledger.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        info!(?period, "boundary sweeper started");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match sweep_once(&state, OffsetDateTime::now_utc()).await {
                Ok(stats) if stats.updated > 0 || stats.conflicts > 0 || stats.failed > 0 => {
                    info!(
                        scanned = stats.scanned,
                        updated = stats.updated,
                        conflicts = stats.conflicts,
                        failed = stats.failed,
                        "boundary sweep"
                    )
                }
                Ok(stats) => debug!(scanned = stats.scanned, "boundary sweep, nothing to do"),
                Err(e) => warn!(error = %e, "boundary sweep failed"),
            }
        }
    })
}
