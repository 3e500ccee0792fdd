use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use super::model::UserProfile;
use crate::ledger::{model::date_key, quota::QuotaWindow};

/// Persistence port for profile documents.
///
/// Every successful write bumps the stored revision; `load` reports it in
/// `UserProfile::revision`.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load(&self, user_id: Uuid) -> anyhow::Result<Option<UserProfile>>;
    /// Unconditional write. Last writer wins.
    async fn save(&self, profile: &UserProfile) -> anyhow::Result<()>;
    /// Writes only while the stored revision still equals `profile.revision`.
    /// Returns false when someone else saved in between.
    async fn save_if_unchanged(&self, profile: &UserProfile) -> anyhow::Result<bool>;
    /// Profiles whose day pointer or quota window is behind `now`.
    async fn list_due(&self, window: QuotaWindow, now: OffsetDateTime)
        -> anyhow::Result<Vec<Uuid>>;
}

/// One JSONB document per user in the `profiles` table.
#[derive(Clone)]
pub struct PgProfileStore {
    db: PgPool,
    retries: u32,
}

impl PgProfileStore {
    pub fn new(db: PgPool, retries: u32) -> Self {
        Self { db, retries }
    }

    /// Retries `op` with exponential backoff before giving up.
    async fn with_retry<T, F, Fut>(&self, user_id: Uuid, op: F) -> anyhow::Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                    warn!(error = %e, %user_id, attempt, ?backoff, "profile save failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn upsert(&self, profile: &UserProfile) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO profiles (user_id, doc, updated_at, revision)
            VALUES ($1, $2, $3, 0)
            ON CONFLICT (user_id)
            DO UPDATE SET doc = EXCLUDED.doc,
                          updated_at = EXCLUDED.updated_at,
                          revision = profiles.revision + 1
            "#,
        )
        .bind(profile.user_id)
        .bind(Json(profile))
        .bind(profile.updated_at)
        .execute(&self.db)
        .await
        .context("upsert profile")?;
        Ok(())
    }

    async fn compare_and_set(&self, profile: &UserProfile) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE profiles
            SET doc = $2, updated_at = $3, revision = revision + 1
            WHERE user_id = $1 AND revision = $4
            "#,
        )
        .bind(profile.user_id)
        .bind(Json(profile))
        .bind(profile.updated_at)
        .bind(profile.revision)
        .execute(&self.db)
        .await
        .context("conditional profile update")?;
        Ok(res.rows_affected() == 1)
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn load(&self, user_id: Uuid) -> anyhow::Result<Option<UserProfile>> {
        let row = sqlx::query_as::<_, (Json<UserProfile>, i64)>(
            r#"SELECT doc, revision FROM profiles WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await
        .context("load profile")?;
        Ok(row.map(|(doc, revision)| UserProfile {
            revision,
            ..doc.0
        }))
    }

    async fn save(&self, profile: &UserProfile) -> anyhow::Result<()> {
        self.with_retry(profile.user_id, || self.upsert(profile)).await
    }

    async fn save_if_unchanged(&self, profile: &UserProfile) -> anyhow::Result<bool> {
        self.with_retry(profile.user_id, || self.compare_and_set(profile))
            .await
    }

    /// Coarse filter in SQL; callers still run the exact boundary checks.
    async fn list_due(
        &self,
        window: QuotaWindow,
        now: OffsetDateTime,
    ) -> anyhow::Result<Vec<Uuid>> {
        let rolling_secs = match window {
            QuotaWindow::Rolling(interval) => Some(interval.as_seconds_f64()),
            QuotaWindow::CalendarDay => None,
        };
        let rows = sqlx::query_as::<_, (Uuid,)>(
            r#"
            WITH p AS (
                SELECT user_id,
                       doc->>'today' AS today,
                       (doc->>'lastQuotaReset')::timestamptz AS last_reset,
                       make_interval(mins => COALESCE((doc->>'utcOffsetMinutes')::int, 0)) AS off
                FROM profiles
            )
            SELECT user_id FROM p
            WHERE today IS DISTINCT FROM to_char(($1::timestamptz AT TIME ZONE 'UTC') + off, 'YYYY-MM-DD')
               OR CASE
                    WHEN $2::float8 IS NULL
                        THEN ((last_reset AT TIME ZONE 'UTC') + off)::date
                             <> (($1::timestamptz AT TIME ZONE 'UTC') + off)::date
                    ELSE last_reset <= $1::timestamptz - make_interval(secs => $2::float8)
                  END
            "#,
        )
        .bind(now)
        .bind(rolling_secs)
        .fetch_all(&self.db)
        .await
        .context("list due profiles")?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

/// In-process store backing `AppState::fake`.
#[derive(Default)]
pub struct MemoryProfileStore {
    docs: RwLock<HashMap<Uuid, UserProfile>>,
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn load(&self, user_id: Uuid) -> anyhow::Result<Option<UserProfile>> {
        Ok(self.docs.read().await.get(&user_id).cloned())
    }

    async fn save(&self, profile: &UserProfile) -> anyhow::Result<()> {
        let mut docs = self.docs.write().await;
        let revision = docs.get(&profile.user_id).map_or(0, |d| d.revision + 1);
        docs.insert(
            profile.user_id,
            UserProfile {
                revision,
                ..profile.clone()
            },
        );
        Ok(())
    }

    async fn save_if_unchanged(&self, profile: &UserProfile) -> anyhow::Result<bool> {
        let mut docs = self.docs.write().await;
        match docs.get_mut(&profile.user_id) {
            Some(stored) if stored.revision == profile.revision => {
                *stored = UserProfile {
                    revision: profile.revision + 1,
                    ..profile.clone()
                };
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_due(
        &self,
        window: QuotaWindow,
        now: OffsetDateTime,
    ) -> anyhow::Result<Vec<Uuid>> {
        Ok(self
            .docs
            .read()
            .await
            .values()
            .filter(|p| {
                let today = date_key(p.local(now).date());
                p.today.as_deref() != Some(today.as_str())
                    || window.crossed(p.quota.last_quota_reset, now, p.offset())
            })
            .map(|p| p.user_id)
            .collect())
    }
}

/// Load a profile or create the initial document for a user seen for the first time.
pub async fn load_or_create(
    store: &dyn ProfileStore,
    user_id: Uuid,
    now: OffsetDateTime,
) -> anyhow::Result<UserProfile> {
    if let Some(profile) = store.load(user_id).await? {
        return Ok(profile);
    }
    let profile = UserProfile::new(user_id, now);
    store.save(&profile).await?;
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[tokio::test]
    async fn memory_store_saves_and_bumps_revision() {
        let store = MemoryProfileStore::default();
        let id = Uuid::new_v4();
        assert!(store.load(id).await.unwrap().is_none());

        let mut profile = UserProfile::new(id, datetime!(2024-05-01 00:00 UTC));
        store.save(&profile).await.unwrap();
        profile.is_pro = true;
        store.save(&profile).await.unwrap();

        let loaded = store.load(id).await.unwrap().unwrap();
        assert!(loaded.is_pro);
        assert_eq!(loaded.revision, 1);
    }

    #[tokio::test]
    async fn conditional_save_loses_to_an_intervening_write() {
        let store = MemoryProfileStore::default();
        let id = Uuid::new_v4();
        store
            .save(&UserProfile::new(id, datetime!(2024-05-01 00:00 UTC)))
            .await
            .unwrap();

        let mut stale = store.load(id).await.unwrap().unwrap();
        let mut fresh = store.load(id).await.unwrap().unwrap();
        fresh.calorie_goal = 1800.0;
        store.save(&fresh).await.unwrap();

        stale.is_pro = true;
        assert!(!store.save_if_unchanged(&stale).await.unwrap());
        let stored = store.load(id).await.unwrap().unwrap();
        assert_eq!(stored.calorie_goal, 1800.0);
        assert!(!stored.is_pro);

        let mut current = stored;
        current.is_pro = true;
        assert!(store.save_if_unchanged(&current).await.unwrap());
        assert_eq!(store.load(id).await.unwrap().unwrap().revision, current.revision + 1);
    }

    #[tokio::test]
    async fn only_profiles_behind_a_boundary_are_due() {
        let store = MemoryProfileStore::default();
        let window = QuotaWindow::default();
        let now = datetime!(2024-05-01 06:30 UTC);

        let mut current = UserProfile::new(Uuid::new_v4(), datetime!(2024-05-01 05:00 UTC));
        current.today = Some("2024-05-01".into());
        let mut stale_quota = UserProfile::new(Uuid::new_v4(), datetime!(2024-05-01 00:00 UTC));
        stale_quota.today = Some("2024-05-01".into());
        let mut stale_day = UserProfile::new(Uuid::new_v4(), datetime!(2024-05-01 05:00 UTC));
        stale_day.today = Some("2024-04-30".into());
        for p in [&current, &stale_quota, &stale_day] {
            store.save(p).await.unwrap();
        }

        let mut due = store.list_due(window, now).await.unwrap();
        due.sort();
        let mut expected = vec![stale_quota.user_id, stale_day.user_id];
        expected.sort();
        assert_eq!(due, expected);
    }

    #[tokio::test]
    async fn load_or_create_persists_new_profiles_once() {
        let store = MemoryProfileStore::default();
        let id = Uuid::new_v4();
        let first = load_or_create(&store, id, datetime!(2024-05-01 00:00 UTC))
            .await
            .unwrap();
        let second = load_or_create(&store, id, datetime!(2024-06-01 00:00 UTC))
            .await
            .unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(first.calorie_goal, UserProfile::DEFAULT_CALORIE_GOAL);
    }
}
