use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000; // host poll cadence
pub const MINUTES_PER_DAY: u16 = 24 * 60;
pub const ENV_PREFIX: &str = "ALMANAC_";

/// Top-level config (almanac.toml + ALMANAC_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlmanacConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub clock: ClockConfig,
}

/// Scheduler engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Plain-text schedule file, one crontab line per job.
    #[serde(default = "default_crontab_path")]
    pub crontab_path: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// When true, the very first poll dispatches every minute from 00:00 up
    /// to the current minute. When false it only anchors the cursor.
    #[serde(default)]
    pub catch_up_on_start: bool,
    #[serde(default = "bool_true")]
    pub profiling: bool,
    /// Register the hourly `profiler` job that logs profiling data.
    #[serde(default = "bool_true")]
    pub profiler_job: bool,
    /// Save the crontab file after every add/remove.
    #[serde(default = "bool_true")]
    pub autosave: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            crontab_path: default_crontab_path(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            catch_up_on_start: false,
            profiling: true,
            profiler_job: true,
            autosave: true,
        }
    }
}

/// Virtual clock used when no host clock drives the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Minute of day (0..1439) the clock starts at.
    #[serde(default = "default_start_minute")]
    pub start_minute: u16,
    /// 0 = Sunday … 6 = Saturday.
    #[serde(default)]
    pub start_weekday: u8,
    #[serde(default)]
    pub start_season: u8,
    #[serde(default)]
    pub start_moon_phase: u8,
    /// Minutes the clock advances per poll. Values above 1 exercise catch-up.
    #[serde(default = "default_minutes_per_poll")]
    pub minutes_per_poll: u16,
    #[serde(default = "default_days_per_season")]
    pub days_per_season: u32,
    #[serde(default = "default_days_per_moon_phase")]
    pub days_per_moon_phase: u32,
    /// When false the clock reports the season as unknown.
    #[serde(default = "bool_true")]
    pub seasons_enabled: bool,
    /// When false the clock reports the moon phase as unknown.
    #[serde(default = "bool_true")]
    pub moon_enabled: bool,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            start_minute: default_start_minute(),
            start_weekday: 0,
            start_season: 0,
            start_moon_phase: 0,
            minutes_per_poll: default_minutes_per_poll(),
            days_per_season: default_days_per_season(),
            days_per_moon_phase: default_days_per_moon_phase(),
            seasons_enabled: true,
            moon_enabled: true,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_start_minute() -> u16 {
    6 * 60
}
fn default_minutes_per_poll() -> u16 {
    1
}
fn default_days_per_season() -> u32 {
    7
}
fn default_days_per_moon_phase() -> u32 {
    1
}
fn default_crontab_path() -> String {
    format!("{}/crontab.txt", data_dir())
}

fn data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.almanac", home)
}

impl AlmanacConfig {
    /// Load config from a TOML file with ALMANAC_* env var overrides.
    ///
    /// Nested keys use a double underscore: `ALMANAC_SCHEDULER__POLL_INTERVAL_MS=250`.
    /// A missing file is not an error, defaults fill every gap.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        tracing::debug!(%path, "loading config");

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::AlmanacError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(AlmanacConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.clock.start_minute >= MINUTES_PER_DAY {
            return Err(crate::error::AlmanacError::Config(format!(
                "clock.start_minute must be below {MINUTES_PER_DAY}, got {}",
                self.clock.start_minute
            )));
        }
        if self.clock.start_weekday > 6 {
            return Err(crate::error::AlmanacError::Config(format!(
                "clock.start_weekday must be 0..=6, got {}",
                self.clock.start_weekday
            )));
        }
        if self.scheduler.poll_interval_ms == 0 {
            return Err(crate::error::AlmanacError::Config(
                "scheduler.poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Create the parent directory of `path` if it does not exist yet.
pub fn ensure_parent_dir(path: &str) -> crate::error::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn default_config_path() -> String {
    format!("{}/almanac.toml", data_dir())
}
