use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, UtcOffset};

/// AI-analysis usage counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaState {
    #[serde(default)]
    pub daily_meal_analysis: u32,
    #[serde(default)]
    pub daily_image_analysis: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub last_quota_reset: OffsetDateTime,
}

impl QuotaState {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            daily_meal_analysis: 0,
            daily_image_analysis: 0,
            last_quota_reset: now,
        }
    }

    pub fn used(&self, kind: AnalysisKind) -> u32 {
        match kind {
            AnalysisKind::Meal => self.daily_meal_analysis,
            AnalysisKind::Image => self.daily_image_analysis,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    Meal,
    Image,
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisKind::Meal => f.write_str("meal"),
            AnalysisKind::Image => f.write_str("image"),
        }
    }
}

impl std::str::FromStr for AnalysisKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "meal" | "meal-analysis" => Ok(AnalysisKind::Meal),
            "image" | "image-analysis" => Ok(AnalysisKind::Image),
            other => anyhow::bail!("unknown analysis kind {other}"),
        }
    }
}

/// When the usage counters go back to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaWindow {
    /// Reset once this much time has passed since the last reset.
    Rolling(Duration),
    /// Reset on the first check of a new local calendar day.
    CalendarDay,
}

impl QuotaWindow {
    /// Whether a reset boundary lies between `last` and `now`.
    pub fn crossed(&self, last: OffsetDateTime, now: OffsetDateTime, offset: UtcOffset) -> bool {
        match *self {
            QuotaWindow::Rolling(interval) => now - last >= interval,
            QuotaWindow::CalendarDay => now.to_offset(offset).date() != last.to_offset(offset).date(),
        }
    }
}

impl Default for QuotaWindow {
    fn default() -> Self {
        QuotaWindow::Rolling(Duration::hours(6))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{kind} analysis quota exhausted ({used}/{limit} used in the current window)")]
pub struct QuotaExceeded {
    pub kind: AnalysisKind,
    pub used: u32,
    pub limit: u32,
}

/// Per-window ceilings. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub free_meal_analyses: Option<u32>,
    pub free_image_analyses: Option<u32>,
    pub pro_meal_analyses: Option<u32>,
    pub pro_image_analyses: Option<u32>,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            free_meal_analyses: Some(3),
            free_image_analyses: Some(1),
            pro_meal_analyses: None,
            pro_image_analyses: None,
        }
    }
}

impl QuotaPolicy {
    pub fn limit(&self, is_pro: bool, kind: AnalysisKind) -> Option<u32> {
        match (is_pro, kind) {
            (false, AnalysisKind::Meal) => self.free_meal_analyses,
            (false, AnalysisKind::Image) => self.free_image_analyses,
            (true, AnalysisKind::Meal) => self.pro_meal_analyses,
            (true, AnalysisKind::Image) => self.pro_image_analyses,
        }
    }

    /// Must run before the counter is incremented, so a rejected attempt costs nothing.
    pub fn check(
        &self,
        quota: &QuotaState,
        is_pro: bool,
        kind: AnalysisKind,
    ) -> Result<(), QuotaExceeded> {
        let Some(limit) = self.limit(is_pro, kind) else {
            return Ok(());
        };
        let used = quota.used(kind);
        if used >= limit {
            return Err(QuotaExceeded { kind, used, limit });
        }
        Ok(())
    }

    pub fn remaining(&self, quota: &QuotaState, is_pro: bool, kind: AnalysisKind) -> Option<u32> {
        self.limit(is_pro, kind)
            .map(|limit| limit.saturating_sub(quota.used(kind)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn rolling_window_boundary_is_inclusive() {
        let w = QuotaWindow::Rolling(Duration::hours(6));
        let last = datetime!(2024-05-01 00:00 UTC);
        assert!(!w.crossed(last, datetime!(2024-05-01 05:59:59 UTC), UtcOffset::UTC));
        assert!(w.crossed(last, datetime!(2024-05-01 06:00 UTC), UtcOffset::UTC));
    }

    #[test]
    fn calendar_window_follows_local_date() {
        let w = QuotaWindow::CalendarDay;
        let plus_two = UtcOffset::from_hms(2, 0, 0).unwrap();
        let last = datetime!(2024-05-01 20:00 UTC);
        // 21:30 UTC is already 23:30 local, same day
        assert!(!w.crossed(last, datetime!(2024-05-01 21:30 UTC), plus_two));
        // 22:30 UTC is 00:30 local on the next day
        assert!(w.crossed(last, datetime!(2024-05-01 22:30 UTC), plus_two));
    }

    #[test]
    fn free_tier_ceilings() {
        let policy = QuotaPolicy::default();
        let mut q = QuotaState::new(datetime!(2024-05-01 00:00 UTC));
        q.daily_meal_analysis = 2;
        assert!(policy.check(&q, false, AnalysisKind::Meal).is_ok());
        q.daily_meal_analysis = 3;
        let err = policy.check(&q, false, AnalysisKind::Meal).unwrap_err();
        assert_eq!(err.limit, 3);
        q.daily_image_analysis = 1;
        assert!(policy.check(&q, false, AnalysisKind::Image).is_err());
        assert_eq!(policy.remaining(&q, false, AnalysisKind::Image), Some(0));
    }

    #[test]
    fn pro_is_unlimited_by_default() {
        let policy = QuotaPolicy::default();
        let mut q = QuotaState::new(datetime!(2024-05-01 00:00 UTC));
        q.daily_meal_analysis = 500;
        q.daily_image_analysis = 500;
        assert!(policy.check(&q, true, AnalysisKind::Meal).is_ok());
        assert!(policy.check(&q, true, AnalysisKind::Image).is_ok());
        assert_eq!(policy.remaining(&q, true, AnalysisKind::Meal), None);
    }

    #[test]
    fn analysis_kind_parses_path_segments() {
        assert_eq!("meal".parse::<AnalysisKind>().unwrap(), AnalysisKind::Meal);
        assert_eq!("image-analysis".parse::<AnalysisKind>().unwrap(), AnalysisKind::Image);
        assert!("video".parse::<AnalysisKind>().is_err());
    }
}
