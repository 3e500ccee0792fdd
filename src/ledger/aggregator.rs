use serde::Serialize;
use time::{Date, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::model::{
    date_key, DailyLedger, EntryPatch, MealEntry, NewEntry, Totals, DEFAULT_HEALTH_SCORE,
};
use super::quota::QuotaWindow;
use crate::profile::model::UserProfile;

/// Outcome of a daily boundary check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRollover {
    pub today: String,
    pub current_year: i32,
    pub day_changed: bool,
    pub year_changed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySummary {
    pub date: String,
    pub entry_count: usize,
    #[serde(flatten)]
    pub totals: Totals,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeSummary {
    pub from: String,
    pub to: String,
    pub days: Vec<DaySummary>,
    pub total: Totals,
    pub daily_average: Totals,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MacroProgress {
    pub consumed: f64,
    pub goal: f64,
    pub remaining: f64,
}

impl MacroProgress {
    fn new(consumed: f64, goal: f64) -> Self {
        Self {
            consumed,
            goal,
            remaining: goal - consumed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalProgress {
    pub date: String,
    pub calories: MacroProgress,
    pub protein: MacroProgress,
    pub carbs: MacroProgress,
    pub fat: MacroProgress,
}

/// Keeps per-day totals consistent with their entries and applies the
/// daily, yearly and quota boundaries to a profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct DailyLedgerAggregator {
    pub quota_window: QuotaWindow,
}

impl DailyLedgerAggregator {
    pub fn new(quota_window: QuotaWindow) -> Self {
        Self { quota_window }
    }

    pub fn add_entry(
        &self,
        profile: &mut UserProfile,
        new: NewEntry,
        now: OffsetDateTime,
    ) -> DailyLedger {
        let timestamp = new.timestamp.unwrap_or(now);
        let local = profile.local(timestamp);
        let key = date_key(local.date());

        let entry = MealEntry {
            id: new.id.unwrap_or_else(Uuid::new_v4),
            food_name: new.food_name,
            calories: new.calories,
            protein: new.protein,
            carbs: new.carbs,
            fat: new.fat,
            micros: new.micros,
            meal_tag: new.meal_tag,
            health_score: new.health_score.unwrap_or(DEFAULT_HEALTH_SCORE).min(100),
            timestamp,
            year: local.year(),
            source: new.source,
            image_key: None,
        };
        debug!(user_id = %profile.user_id, entry_id = %entry.id, date = %key, "entry added");

        let ledger = profile
            .ledgers
            .entry(key.clone())
            .or_insert_with(|| DailyLedger::empty(&key));
        ledger.entries.push(entry);
        ledger.recompute();
        ledger.clone()
    }

    /// Unknown date or id leaves the ledger untouched.
    pub fn edit_entry(
        &self,
        profile: &mut UserProfile,
        date: &str,
        entry_id: Uuid,
        patch: EntryPatch,
    ) -> DailyLedger {
        let Some(ledger) = profile.ledgers.get_mut(date) else {
            debug!(user_id = %profile.user_id, %entry_id, date, "edit on empty day ignored");
            return DailyLedger::empty(date);
        };
        match ledger.entries.iter_mut().find(|e| e.id == entry_id) {
            Some(entry) => {
                patch.apply(entry);
                ledger.recompute();
            }
            None => debug!(user_id = %profile.user_id, %entry_id, date, "edit on unknown entry ignored"),
        }
        ledger.clone()
    }

    pub fn remove_entry(
        &self,
        profile: &mut UserProfile,
        date: &str,
        entry_id: Uuid,
    ) -> DailyLedger {
        let Some(ledger) = profile.ledgers.get_mut(date) else {
            return DailyLedger::empty(date);
        };
        let before = ledger.entries.len();
        ledger.entries.retain(|e| e.id != entry_id);
        if ledger.entries.len() != before {
            ledger.recompute();
            debug!(user_id = %profile.user_id, %entry_id, date, "entry removed");
        }
        ledger.clone()
    }

    /// Attach an object-storage key to an entry. Returns false when the entry is unknown.
    pub fn set_entry_image(
        &self,
        profile: &mut UserProfile,
        date: &str,
        entry_id: Uuid,
        image_key: String,
    ) -> bool {
        profile
            .ledgers
            .get_mut(date)
            .and_then(|l| l.entries.iter_mut().find(|e| e.id == entry_id))
            .map(|e| e.image_key = Some(image_key))
            .is_some()
    }

    pub fn get_daily_totals(&self, profile: &UserProfile, date: &str) -> DailyLedger {
        profile
            .ledgers
            .get(date)
            .cloned()
            .unwrap_or_else(|| DailyLedger::empty(date))
    }

    /// Moves the "today" pointer and the current-year marker forward. History is never deleted.
    pub fn check_and_reset_daily(
        &self,
        profile: &mut UserProfile,
        now: OffsetDateTime,
    ) -> DailyRollover {
        let local = profile.local(now);
        let today = date_key(local.date());
        let year = local.year();

        let day_changed = profile.today.as_deref() != Some(today.as_str());
        if day_changed {
            profile.today = Some(today.clone());
        }

        let stored_year = profile.current_year.unwrap_or_else(|| {
            profile
                .ledgers
                .values()
                .flat_map(|l| l.entries.iter().map(|e| e.year))
                .max()
                .unwrap_or(year)
        });
        let year_changed = year > stored_year;
        let current_year = stored_year.max(year);
        profile.current_year = Some(current_year);

        if day_changed || year_changed {
            debug!(user_id = %profile.user_id, %today, current_year, year_changed, "daily rollover");
        }
        DailyRollover {
            today,
            current_year,
            day_changed,
            year_changed,
        }
    }

    /// Returns true when the counters were reset.
    pub fn check_and_reset_quotas(&self, profile: &mut UserProfile, now: OffsetDateTime) -> bool {
        let offset = profile.offset();
        if !self
            .quota_window
            .crossed(profile.quota.last_quota_reset, now, offset)
        {
            return false;
        }
        profile.quota.daily_meal_analysis = 0;
        profile.quota.daily_image_analysis = 0;
        profile.quota.last_quota_reset = now;
        debug!(user_id = %profile.user_id, "analysis quota reset");
        true
    }

    /// No ceiling here; callers check `QuotaPolicy` first.
    pub fn increment_meal_analysis(&self, profile: &mut UserProfile) {
        profile.quota.daily_meal_analysis = profile.quota.daily_meal_analysis.saturating_add(1);
    }

    pub fn increment_image_analysis(&self, profile: &mut UserProfile) {
        profile.quota.daily_image_analysis = profile.quota.daily_image_analysis.saturating_add(1);
    }

    /// Totals over entries of the current year; earlier years stay stored but are left out.
    pub fn current_year_totals(&self, profile: &UserProfile, now: OffsetDateTime) -> Totals {
        let year = profile
            .current_year
            .unwrap_or_else(|| profile.local(now).year());
        let mut totals = Totals::default();
        profile
            .ledgers
            .values()
            .flat_map(|l| l.entries.iter())
            .filter(|e| e.year == year)
            .for_each(|e| totals.add_entry(e));
        totals
    }

    /// Per-day totals for every date in `from..=to`, days without entries included.
    pub fn totals_between(&self, profile: &UserProfile, from: Date, to: Date) -> RangeSummary {
        let mut days = Vec::new();
        let mut total = Totals::default();
        let mut day = from;
        while day <= to {
            let key = date_key(day);
            let (entry_count, totals) = profile
                .ledgers
                .get(&key)
                .map(|l| (l.entries.len(), l.totals))
                .unwrap_or_default();
            total.add(&totals);
            days.push(DaySummary {
                date: key,
                entry_count,
                totals,
            });
            day = match day.next_day() {
                Some(next) => next,
                None => break,
            };
        }
        let daily_average = if days.is_empty() {
            Totals::default()
        } else {
            total.scaled(1.0 / days.len() as f64)
        };
        RangeSummary {
            from: date_key(from),
            to: date_key(to),
            days,
            total,
            daily_average,
        }
    }

    pub fn goal_progress(&self, profile: &UserProfile, date: &str) -> GoalProgress {
        let t = self.get_daily_totals(profile, date).totals;
        GoalProgress {
            date: date.to_string(),
            calories: MacroProgress::new(t.total_calories, profile.calorie_goal),
            protein: MacroProgress::new(t.total_protein, profile.protein_goal),
            carbs: MacroProgress::new(t.total_carbs, profile.carbs_goal),
            fat: MacroProgress::new(t.total_fat, profile.fat_goal),
        }
    }
}
