use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub artifact_dir: PathBuf,
    pub ics_concurrency: usize,
    pub render_concurrency: usize,
    pub extract_interval: Duration,
    pub retention_days: i64,
    pub fetch_timeout: Duration,
    pub render_watchdog: Duration,
    pub disable_background_tasks: bool,
    pub admin_password: String,
    /// Offset applied to ICS timestamps that carry no zone information.
    pub local_utc_offset: FixedOffset,
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let offset_minutes: i32 = env_or("LOCAL_UTC_OFFSET_MIN", "0").parse()?;
        Ok(Self {
            port: env_or("PORT", "8080").parse()?,
            database_url: env_or("STORE_PATH", "sqlite:data/roomboard.db?mode=rwc"),
            artifact_dir: PathBuf::from(env_or("ARTIFACT_DIR", "data/artifacts")),
            ics_concurrency: env_or("ICS_CONCURRENCY", "8").parse()?,
            render_concurrency: env_or("RENDER_CONCURRENCY", "4").parse()?,
            extract_interval: Duration::from_secs(
                env_or("EXTRACT_INTERVAL_MIN", "60").parse::<u64>()? * 60,
            ),
            retention_days: env_or("RETENTION_DAYS", "60").parse()?,
            fetch_timeout: Duration::from_secs(env_or("FETCH_TIMEOUT_SEC", "30").parse()?),
            render_watchdog: Duration::from_secs(env_or("RENDER_WATCHDOG_SEC", "60").parse()?),
            disable_background_tasks: env::var("DISABLE_BACKGROUND_TASKS").is_ok(),
            admin_password: env_or("ADMIN_PASSWORD", "admin123"),
            local_utc_offset: FixedOffset::east_opt(offset_minutes * 60)
                .ok_or_else(|| anyhow::anyhow!("LOCAL_UTC_OFFSET_MIN out of range"))?,
        })
    }
}
