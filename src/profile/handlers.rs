use axum::{
    extract::State,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, instrument};
use uuid::Uuid;

use super::model::UserProfile;
use super::services::{mutate_profile, read_profile};
use crate::{auth::jwt::AuthUser, error::AppError, ledger::quota::QuotaState, state::AppState};

/// UTC-14:00 to UTC+14:00.
const MAX_OFFSET_MINUTES: i32 = 14 * 60;

/// Real-world offsets span -14h..=+14h.
pub fn check_utc_offset(minutes: i32) -> Result<(), AppError> {
    if minutes.abs() > MAX_OFFSET_MINUTES {
        return Err(AppError::BadRequest("utcOffsetMinutes out of range".into()));
    }
    Ok(())
}

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/profile", get(get_profile))
        .route("/profile/goals", put(put_goals))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub user_id: Uuid,
    pub calorie_goal: f64,
    pub protein_goal: f64,
    pub carbs_goal: f64,
    pub fat_goal: f64,
    pub is_pro: bool,
    pub utc_offset_minutes: i32,
    pub today: Option<String>,
    pub current_year: Option<i32>,
    pub logged_days: usize,
    #[serde(flatten)]
    pub quota: QuotaState,
}

impl From<&UserProfile> for ProfileSummary {
    fn from(p: &UserProfile) -> Self {
        Self {
            user_id: p.user_id,
            calorie_goal: p.calorie_goal,
            protein_goal: p.protein_goal,
            carbs_goal: p.carbs_goal,
            fat_goal: p.fat_goal,
            is_pro: p.is_pro,
            utc_offset_minutes: p.utc_offset_minutes,
            today: p.today.clone(),
            current_year: p.current_year,
            logged_days: p.ledgers.values().filter(|l| !l.entries.is_empty()).count(),
            quota: p.quota.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalsUpdate {
    pub calorie_goal: Option<f64>,
    pub protein_goal: Option<f64>,
    pub carbs_goal: Option<f64>,
    pub fat_goal: Option<f64>,
    pub utc_offset_minutes: Option<i32>,
}

impl GoalsUpdate {
    fn validate(&self) -> Result<(), AppError> {
        for (name, v) in [
            ("calorieGoal", self.calorie_goal),
            ("proteinGoal", self.protein_goal),
            ("carbsGoal", self.carbs_goal),
            ("fatGoal", self.fat_goal),
        ] {
            if let Some(v) = v {
                if !v.is_finite() || v < 0.0 {
                    return Err(AppError::BadRequest(format!("{name} must be a non-negative number")));
                }
            }
        }
        if let Some(offset) = self.utc_offset_minutes {
            check_utc_offset(offset)?;
        }
        Ok(())
    }

    fn apply(self, p: &mut UserProfile) {
        if let Some(v) = self.calorie_goal {
            p.calorie_goal = v;
        }
        if let Some(v) = self.protein_goal {
            p.protein_goal = v;
        }
        if let Some(v) = self.carbs_goal {
            p.carbs_goal = v;
        }
        if let Some(v) = self.fat_goal {
            p.fat_goal = v;
        }
        if let Some(v) = self.utc_offset_minutes {
            p.utc_offset_minutes = v;
        }
    }
}

#[instrument(skip(state))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ProfileSummary>, AppError> {
    let profile = read_profile(&state, user_id, OffsetDateTime::now_utc()).await?;
    Ok(Json(ProfileSummary::from(&profile)))
}

#[instrument(skip(state, update))]
pub async fn put_goals(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(update): Json<GoalsUpdate>,
) -> Result<Json<ProfileSummary>, AppError> {
    update.validate()?;
    let summary = mutate_profile(&state, user_id, OffsetDateTime::now_utc(), |_, p| {
        update.apply(p);
        Ok(ProfileSummary::from(&*p))
    })
    .await?;
    info!(%user_id, calorie_goal = summary.calorie_goal, "goals updated");
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn goals_update_is_partial() {
        let state = AppState::fake();
        let user = Uuid::new_v4();
        let update = GoalsUpdate {
            calorie_goal: Some(1800.0),
            utc_offset_minutes: Some(-420),
            ..Default::default()
        };
        let Json(summary) = put_goals(State(state.clone()), AuthUser(user), Json(update))
            .await
            .unwrap();
        assert_eq!(summary.calorie_goal, 1800.0);
        assert_eq!(summary.protein_goal, UserProfile::DEFAULT_PROTEIN_GOAL);
        assert_eq!(summary.utc_offset_minutes, -420);

        let Json(again) = get_profile(State(state), AuthUser(user)).await.unwrap();
        assert_eq!(again.calorie_goal, 1800.0);
    }

    #[tokio::test]
    async fn goals_reject_negative_and_out_of_range() {
        let state = AppState::fake();
        let update = GoalsUpdate {
            fat_goal: Some(-1.0),
            ..Default::default()
        };
        let err = put_goals(State(state.clone()), AuthUser(Uuid::new_v4()), Json(update))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let update = GoalsUpdate {
            utc_offset_minutes: Some(15 * 60),
            ..Default::default()
        };
        assert!(put_goals(State(state), AuthUser(Uuid::new_v4()), Json(update))
            .await
            .is_err());
    }
}
