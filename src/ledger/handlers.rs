use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, patch, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{
    ConsumeResponse, DayResponse, PhotoResponse, QuotaResponse, RangeQuery, YearResponse,
    MAX_RANGE_DAYS,
};
use super::model::{parse_date_key, DailyLedger, EntryPatch, NewEntry};
use super::quota::AnalysisKind;
use crate::{
    auth::jwt::AuthUser,
    error::AppError,
    profile::{
        model::UserProfile,
        services::{mutate_profile, read_profile},
    },
    state::AppState,
    storage::{ext_from_mime, photo_key},
};

const PHOTO_URL_TTL_SECS: u64 = 10 * 60;

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/ledger", get(get_range))
        .route("/ledger/year", get(get_year))
        .route("/ledger/:date", get(get_day))
        .route("/ledger/:date/entries/:id/photo", get(get_photo))
        .route("/quota", get(get_quota))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        // static segment: GET /ledger/entries is 405, not a date lookup
        .route("/ledger/entries", post(add_entry))
        .route(
            "/ledger/:date/entries/:id",
            patch(edit_entry).delete(remove_entry),
        )
        .route(
            "/ledger/:date/entries/:id/photo",
            axum::routing::put(put_photo).layer(DefaultBodyLimit::max(20 * 1024 * 1024)),
        )
        .route("/quota/:kind", post(consume_quota))
}

fn day_response(state: &AppState, profile: &UserProfile, ledger: DailyLedger) -> DayResponse {
    let progress = state.aggregator.goal_progress(profile, &ledger.date);
    DayResponse { ledger, progress }
}

/// Date keys from the path must be real calendar dates.
fn checked_date(raw: &str) -> Result<String, AppError> {
    parse_date_key(raw)?;
    Ok(raw.to_string())
}

#[instrument(skip(state))]
pub async fn get_day(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(date): Path<String>,
) -> Result<Json<DayResponse>, AppError> {
    let date = checked_date(&date)?;
    let profile = read_profile(&state, user_id, OffsetDateTime::now_utc()).await?;
    let ledger = state.aggregator.get_daily_totals(&profile, &date);
    Ok(Json(day_response(&state, &profile, ledger)))
}

#[instrument(skip(state, entry))]
pub async fn add_entry(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(entry): Json<NewEntry>,
) -> Result<(StatusCode, Json<DayResponse>), AppError> {
    let now = OffsetDateTime::now_utc();
    let day = mutate_profile(&state, user_id, now, |agg, p| {
        let ledger = agg.add_entry(p, entry, now);
        Ok(day_response(&state, p, ledger))
    })
    .await?;
    info!(%user_id, date = %day.ledger.date, entries = day.ledger.entries.len(), "meal logged");
    Ok((StatusCode::CREATED, Json(day)))
}

#[instrument(skip(state, changes))]
pub async fn edit_entry(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((date, id)): Path<(String, Uuid)>,
    Json(changes): Json<EntryPatch>,
) -> Result<Json<DayResponse>, AppError> {
    let date = checked_date(&date)?;
    let day = mutate_profile(&state, user_id, OffsetDateTime::now_utc(), |agg, p| {
        let ledger = agg.edit_entry(p, &date, id, changes);
        Ok(day_response(&state, p, ledger))
    })
    .await?;
    Ok(Json(day))
}

#[instrument(skip(state))]
pub async fn remove_entry(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((date, id)): Path<(String, Uuid)>,
) -> Result<Json<DayResponse>, AppError> {
    let date = checked_date(&date)?;
    let mut image_key = None;
    let day = mutate_profile(&state, user_id, OffsetDateTime::now_utc(), |agg, p| {
        image_key = agg
            .get_daily_totals(p, &date)
            .entries
            .into_iter()
            .find(|e| e.id == id)
            .and_then(|e| e.image_key);
        let ledger = agg.remove_entry(p, &date, id);
        Ok(day_response(&state, p, ledger))
    })
    .await?;

    if let Some(key) = image_key {
        if let Err(e) = state.storage.delete_object(&key).await {
            warn!(error = %e, %key, "orphaned meal photo");
        }
    }
    Ok(Json(day))
}

#[instrument(skip(state))]
pub async fn get_range(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<RangeQuery>,
) -> Result<Json<super::aggregator::RangeSummary>, AppError> {
    let from = parse_date_key(&q.from)?;
    let to = parse_date_key(&q.to)?;
    if from > to {
        return Err(AppError::BadRequest("from must not be after to".into()));
    }
    if (to - from).whole_days() >= MAX_RANGE_DAYS {
        return Err(AppError::BadRequest(format!(
            "range is limited to {MAX_RANGE_DAYS} days"
        )));
    }
    let profile = read_profile(&state, user_id, OffsetDateTime::now_utc()).await?;
    Ok(Json(state.aggregator.totals_between(&profile, from, to)))
}

#[instrument(skip(state))]
pub async fn get_year(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<YearResponse>, AppError> {
    let now = OffsetDateTime::now_utc();
    let profile = read_profile(&state, user_id, now).await?;
    let year = profile
        .current_year
        .unwrap_or_else(|| profile.local(now).year());
    Ok(Json(YearResponse {
        year,
        totals: state.aggregator.current_year_totals(&profile, now),
    }))
}

/// Raw image body; content type decides the extension.
#[instrument(skip(state, headers, body))]
pub async fn put_photo(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((date, id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PhotoResponse>, AppError> {
    let date = checked_date(&date)?;
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let ext = ext_from_mime(&content_type)
        .ok_or_else(|| AppError::BadRequest(format!("unsupported content type {content_type}")))?;
    if body.is_empty() {
        return Err(AppError::BadRequest("empty photo".into()));
    }

    let now = OffsetDateTime::now_utc();
    let profile = read_profile(&state, user_id, now).await?;
    let entry = state
        .aggregator
        .get_daily_totals(&profile, &date)
        .entries
        .into_iter()
        .find(|e| e.id == id)
        .ok_or(AppError::NotFound("Entry not found"))?;

    let key = photo_key(user_id, &date, id, ext);
    state.storage.put_object(&key, body, &content_type).await?;

    let attached = mutate_profile(&state, user_id, now, |agg, p| {
        Ok(agg.set_entry_image(p, &date, id, key.clone()))
    })
    .await?;
    if !attached {
        // removed while the upload was in flight
        state.storage.delete_object(&key).await?;
        return Err(AppError::NotFound("Entry not found"));
    }
    if let Some(old) = entry.image_key.filter(|old| *old != key) {
        if let Err(e) = state.storage.delete_object(&old).await {
            warn!(error = %e, key = %old, "failed to delete replaced photo");
        }
    }

    info!(%user_id, %date, entry_id = %id, %key, "meal photo attached");
    Ok(Json(PhotoResponse { image_key: key }))
}

#[instrument(skip(state))]
pub async fn get_photo(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path((date, id)): Path<(String, Uuid)>,
) -> Result<Response, AppError> {
    let date = checked_date(&date)?;
    let profile = read_profile(&state, user_id, OffsetDateTime::now_utc()).await?;
    let key = state
        .aggregator
        .get_daily_totals(&profile, &date)
        .entries
        .into_iter()
        .find(|e| e.id == id)
        .and_then(|e| e.image_key)
        .ok_or(AppError::NotFound("Photo not found"))?;

    let url = state.storage.presign_get(&key, PHOTO_URL_TTL_SECS).await?;
    Ok(Redirect::temporary(&url).into_response())
}

fn quota_response(state: &AppState, p: &UserProfile) -> QuotaResponse {
    let policy = &state.config.ledger.quota_policy;
    QuotaResponse {
        state: p.quota.clone(),
        is_pro: p.is_pro,
        meal_remaining: policy.remaining(&p.quota, p.is_pro, AnalysisKind::Meal),
        image_remaining: policy.remaining(&p.quota, p.is_pro, AnalysisKind::Image),
    }
}

#[instrument(skip(state))]
pub async fn get_quota(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<QuotaResponse>, AppError> {
    let profile = read_profile(&state, user_id, OffsetDateTime::now_utc()).await?;
    Ok(Json(quota_response(&state, &profile)))
}

/// Gate then count one AI analysis. A rejected attempt leaves the counter alone.
#[instrument(skip(state))]
pub async fn consume_quota(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(kind): Path<String>,
) -> Result<Json<ConsumeResponse>, AppError> {
    let kind: AnalysisKind = kind
        .parse()
        .map_err(|e: anyhow::Error| AppError::BadRequest(e.to_string()))?;
    let policy = state.config.ledger.quota_policy;

    let res = mutate_profile(&state, user_id, OffsetDateTime::now_utc(), |agg, p| {
        policy.check(&p.quota, p.is_pro, kind)?;
        match kind {
            AnalysisKind::Meal => agg.increment_meal_analysis(p),
            AnalysisKind::Image => agg.increment_image_analysis(p),
        }
        Ok(ConsumeResponse {
            kind,
            used: p.quota.used(kind),
            remaining: policy.remaining(&p.quota, p.is_pro, kind),
            window_started: p.quota.last_quota_reset,
        })
    })
    .await;

    match res {
        Err(AppError::QuotaExceeded(e)) => {
            warn!(%user_id, %kind, used = e.used, limit = e.limit, "analysis quota exhausted");
            Err(AppError::QuotaExceeded(e))
        }
        other => other.map(Json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::model::Totals;

    fn meal(name: &str, calories: f64, protein: f64, carbs: f64, fat: f64) -> NewEntry {
        NewEntry {
            food_name: name.into(),
            calories,
            protein,
            carbs,
            fat,
            timestamp: Some(time::macros::datetime!(2024-05-01 12:00 UTC)),
            ..Default::default()
        }
    }

    fn totals(t: &Totals) -> (f64, f64, f64, f64) {
        (t.total_calories, t.total_protein, t.total_carbs, t.total_fat)
    }

    #[tokio::test]
    async fn log_edit_remove_through_handlers() {
        let state = AppState::fake();
        let user = Uuid::new_v4();

        let (status, Json(day)) = add_entry(
            State(state.clone()),
            AuthUser(user),
            Json(meal("bowl", 500.0, 30.0, 40.0, 10.0)),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(day.ledger.date, "2024-05-01");
        let first = day.ledger.entries[0].id;

        let (_, Json(day)) = add_entry(
            State(state.clone()),
            AuthUser(user),
            Json(meal("toast", 200.0, 5.0, 20.0, 5.0)),
        )
        .await
        .unwrap();
        assert_eq!(totals(&day.ledger.totals), (700.0, 35.0, 60.0, 15.0));
        assert_eq!(day.progress.calories.consumed, 700.0);

        let Json(day) = edit_entry(
            State(state.clone()),
            AuthUser(user),
            Path(("2024-05-01".to_string(), Uuid::new_v4())),
            Json(EntryPatch {
                calories: Some(1.0),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(totals(&day.ledger.totals), (700.0, 35.0, 60.0, 15.0));

        let Json(day) = remove_entry(
            State(state.clone()),
            AuthUser(user),
            Path(("2024-05-01".to_string(), first)),
        )
        .await
        .unwrap();
        assert_eq!(totals(&day.ledger.totals), (200.0, 5.0, 20.0, 5.0));

        let Json(day) = get_day(State(state), AuthUser(user), Path("2024-05-01".into()))
            .await
            .unwrap();
        assert_eq!(day.ledger.entries.len(), 1);
    }

    #[tokio::test]
    async fn bad_date_keys_are_rejected() {
        let state = AppState::fake();
        let err = get_day(State(state), AuthUser(Uuid::new_v4()), Path("2024-13-40".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidDate(_)));
    }

    #[tokio::test]
    async fn range_validation() {
        let state = AppState::fake();
        let user = Uuid::new_v4();
        let q = |from: &str, to: &str| {
            Query(RangeQuery {
                from: from.into(),
                to: to.into(),
            })
        };
        assert!(get_range(State(state.clone()), AuthUser(user), q("2024-05-02", "2024-05-01"))
            .await
            .is_err());
        assert!(get_range(State(state.clone()), AuthUser(user), q("2023-01-01", "2024-05-01"))
            .await
            .is_err());
        let Json(summary) =
            get_range(State(state), AuthUser(user), q("2024-05-01", "2024-05-07"))
                .await
                .unwrap();
        assert_eq!(summary.days.len(), 7);
    }

    #[tokio::test]
    async fn fourth_free_meal_analysis_is_rejected_without_counting() {
        let state = AppState::fake();
        let user = Uuid::new_v4();
        for expected in 1..=3 {
            let Json(r) = consume_quota(State(state.clone()), AuthUser(user), Path("meal".into()))
                .await
                .unwrap();
            assert_eq!(r.used, expected);
        }
        let err = consume_quota(State(state.clone()), AuthUser(user), Path("meal".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded(_)));

        let Json(q) = get_quota(State(state.clone()), AuthUser(user)).await.unwrap();
        assert_eq!(q.state.daily_meal_analysis, 3);
        assert_eq!(q.meal_remaining, Some(0));
        assert_eq!(q.image_remaining, Some(1));

        assert!(consume_quota(State(state), AuthUser(user), Path("video".into()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn pro_users_are_not_gated() {
        let state = AppState::fake();
        let user = Uuid::new_v4();
        let mut profile = UserProfile::new(user, OffsetDateTime::now_utc());
        profile.is_pro = true;
        state.profiles.save(&profile).await.unwrap();

        for _ in 0..5 {
            consume_quota(State(state.clone()), AuthUser(user), Path("image".into()))
                .await
                .unwrap();
        }
        let Json(q) = get_quota(State(state), AuthUser(user)).await.unwrap();
        assert_eq!(q.state.daily_image_analysis, 5);
        assert_eq!(q.image_remaining, None);
    }

    #[tokio::test]
    async fn photos_attach_and_redirect() {
        let state = AppState::fake();
        let user = Uuid::new_v4();
        let (_, Json(day)) = add_entry(
            State(state.clone()),
            AuthUser(user),
            Json(meal("plate", 300.0, 10.0, 30.0, 10.0)),
        )
        .await
        .unwrap();
        let id = day.ledger.entries[0].id;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "image/png".parse().unwrap());
        let Json(photo) = put_photo(
            State(state.clone()),
            AuthUser(user),
            Path(("2024-05-01".to_string(), id)),
            headers.clone(),
            Bytes::from_static(b"\x89PNG"),
        )
        .await
        .unwrap();
        assert_eq!(photo.image_key, photo_key(user, "2024-05-01", id, "png"));

        let res = get_photo(
            State(state.clone()),
            AuthUser(user),
            Path(("2024-05-01".to_string(), id)),
        )
        .await
        .unwrap();
        assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);

        let missing = put_photo(
            State(state.clone()),
            AuthUser(user),
            Path(("2024-05-01".to_string(), Uuid::new_v4())),
            headers,
            Bytes::from_static(b"\x89PNG"),
        )
        .await
        .unwrap_err();
        assert!(matches!(missing, AppError::NotFound(_)));

        let mut pdf = HeaderMap::new();
        pdf.insert(CONTENT_TYPE, "application/pdf".parse().unwrap());
        let err = put_photo(
            State(state),
            AuthUser(user),
            Path(("2024-05-01".to_string(), id)),
            pdf,
            Bytes::from_static(b"%PDF"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
