use serde::Deserialize;
use std::str::FromStr;
use time::Duration;
use tracing::warn;

use crate::ledger::quota::{QuotaPolicy, QuotaWindow};

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Quota windows, ceilings and background sweep cadence.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub quota_window: QuotaWindow,
    pub quota_policy: QuotaPolicy,
    pub sweep_interval_secs: u64,
    pub profile_save_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            quota_window: QuotaWindow::default(),
            quota_policy: QuotaPolicy::default(),
            sweep_interval_secs: 60,
            profile_save_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub ledger: LedgerConfig,
    pub minio_endpoint: String,
    pub minio_bucket: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "macroledger".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "macroledger-users".into()),
            ttl_minutes: parse_or("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: parse_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
        };

        let window = match std::env::var("QUOTA_WINDOW").as_deref() {
            Ok("calendar-day") => QuotaWindow::CalendarDay,
            Ok("rolling") | Err(_) => {
                QuotaWindow::Rolling(Duration::hours(parse_or("QUOTA_RESET_HOURS", 6)))
            }
            Ok(other) => anyhow::bail!("QUOTA_WINDOW must be rolling or calendar-day, got {other}"),
        };
        let defaults = QuotaPolicy::default();
        let ledger = LedgerConfig {
            quota_window: window,
            quota_policy: QuotaPolicy {
                free_meal_analyses: parse_limit("FREE_MEAL_ANALYSES", defaults.free_meal_analyses),
                free_image_analyses: parse_limit("FREE_IMAGE_ANALYSES", defaults.free_image_analyses),
                pro_meal_analyses: parse_limit("PRO_MEAL_ANALYSES", defaults.pro_meal_analyses),
                pro_image_analyses: parse_limit("PRO_IMAGE_ANALYSES", defaults.pro_image_analyses),
            },
            sweep_interval_secs: parse_or("SWEEP_INTERVAL_SECS", 60),
            profile_save_retries: parse_or("PROFILE_SAVE_RETRIES", 3),
        };

        Ok(Self {
            database_url,
            jwt,
            ledger,
            minio_endpoint: std::env::var("MINIO_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:9000".into()),
            minio_bucket: std::env::var("MINIO_BUCKET").unwrap_or_else(|_| "macroledger".into()),
            minio_access_key: std::env::var("MINIO_ACCESS_KEY")?,
            minio_secret_key: std::env::var("MINIO_SECRET_KEY")?,
        })
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(v) => v.parse::<T>().unwrap_or_else(|_| {
            warn!(key, value = %v, "unparseable value, using default");
            default
        }),
        Err(_) => default,
    }
}

/// `unlimited` (or `none`) lifts the ceiling.
fn parse_limit(key: &str, default: Option<u32>) -> Option<u32> {
    match std::env::var(key).as_deref() {
        Ok("unlimited") | Ok("none") => None,
        Ok(_) => Some(parse_or(key, default.unwrap_or(0))),
        Err(_) => default,
    }
}
