use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::aggregator::GoalProgress;
use super::model::{DailyLedger, Totals};
use super::quota::{AnalysisKind, QuotaState};

/// Longest range `GET /ledger` will summarise.
pub const MAX_RANGE_DAYS: i64 = 366;

#[derive(Debug, Serialize)]
pub struct DayResponse {
    #[serde(flatten)]
    pub ledger: DailyLedger,
    pub progress: GoalProgress,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize)]
pub struct YearResponse {
    pub year: i32,
    #[serde(flatten)]
    pub totals: Totals,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaResponse {
    #[serde(flatten)]
    pub state: QuotaState,
    pub is_pro: bool,
    pub meal_remaining: Option<u32>,
    pub image_remaining: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeResponse {
    pub kind: AnalysisKind,
    pub used: u32,
    pub remaining: Option<u32>,
    #[serde(with = "time::serde::rfc3339")]
    pub window_started: OffsetDateTime,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoResponse {
    pub image_key: String,
}
