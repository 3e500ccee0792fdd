use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;

use crate::ledger::{model::DailyLedger, quota::QuotaState};

/// Per-user document: goals, subscription flag, ledgers by date key and quota bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: Uuid,
    pub calorie_goal: f64,
    pub protein_goal: f64,
    pub carbs_goal: f64,
    pub fat_goal: f64,
    #[serde(default)]
    pub is_pro: bool,
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub ledgers: BTreeMap<String, DailyLedger>,
    #[serde(flatten)]
    pub quota: QuotaState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub today: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_year: Option<i32>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Store revision this copy was loaded at. Not part of the document.
    #[serde(skip)]
    pub revision: i64,
}

impl UserProfile {
    pub const DEFAULT_CALORIE_GOAL: f64 = 2000.0;
    pub const DEFAULT_PROTEIN_GOAL: f64 = 150.0;
    pub const DEFAULT_CARBS_GOAL: f64 = 200.0;
    pub const DEFAULT_FAT_GOAL: f64 = 65.0;

    pub fn new(user_id: Uuid, now: OffsetDateTime) -> Self {
        Self {
            user_id,
            calorie_goal: Self::DEFAULT_CALORIE_GOAL,
            protein_goal: Self::DEFAULT_PROTEIN_GOAL,
            carbs_goal: Self::DEFAULT_CARBS_GOAL,
            fat_goal: Self::DEFAULT_FAT_GOAL,
            is_pro: false,
            utc_offset_minutes: 0,
            ledgers: BTreeMap::new(),
            quota: QuotaState::new(now),
            today: None,
            current_year: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// The user's local offset; out-of-range values fall back to UTC.
    pub fn offset(&self) -> UtcOffset {
        UtcOffset::from_whole_seconds(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or(UtcOffset::UTC)
    }

    pub fn local(&self, at: OffsetDateTime) -> OffsetDateTime {
        at.to_offset(self.offset())
    }
}
