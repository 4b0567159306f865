use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarSourceKind {
    Fixture,
    Http,
}

impl std::str::FromStr for CalendarSourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixture" | "fixtures" => Ok(CalendarSourceKind::Fixture),
            "http" => Ok(CalendarSourceKind::Http),
            other => bail!("unknown calendar source {other:?} (expected fixture or http)"),
        }
    }
}

/// Process-level settings, read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// No database URL means an in-memory store seeded from `seed_path`.
    pub database_url: Option<String>,
    pub seed_path: PathBuf,
    pub pipeline_config_path: PathBuf,
    pub calendar_source: CalendarSourceKind,
    pub fixtures_dir: PathBuf,
    pub calendar_url: Option<String>,
    pub calendar_token: Option<String>,
    pub reports_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub scheduler_enabled: bool,
    pub import_cron: String,
    pub calendars: Vec<String>,
    pub web_port: u16,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True" | "yes"))
        .unwrap_or(false)
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let calendar_source = env_or("FIELDOPS_CALENDAR_SOURCE", "fixture")
            .parse()
            .context("reading FIELDOPS_CALENDAR_SOURCE")?;
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok().and_then(non_empty),
            seed_path: PathBuf::from(env_or("FIELDOPS_SEED", "seed/dev.yaml")),
            pipeline_config_path: PathBuf::from(env_or(
                "FIELDOPS_PIPELINE_CONFIG",
                "config/pipeline.yaml",
            )),
            calendar_source,
            fixtures_dir: PathBuf::from(env_or("FIELDOPS_FIXTURES_DIR", "fixtures/calendars")),
            calendar_url: std::env::var("FIELDOPS_CALENDAR_URL").ok().and_then(non_empty),
            calendar_token: std::env::var("FIELDOPS_CALENDAR_TOKEN").ok().and_then(non_empty),
            reports_dir: PathBuf::from(env_or("FIELDOPS_REPORTS_DIR", "reports")),
            archive_dir: PathBuf::from(env_or("FIELDOPS_ARCHIVE_DIR", "archive")),
            scheduler_enabled: env_flag("FIELDOPS_SCHEDULER_ENABLED"),
            import_cron: env_or("FIELDOPS_IMPORT_CRON", "*/30 * * * *"),
            calendars: env_or("FIELDOPS_CALENDARS", "ops-main")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            web_port: std::env::var("FIELDOPS_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            http_timeout_secs: std::env::var("FIELDOPS_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            user_agent: env_or("FIELDOPS_USER_AGENT", "fieldops-importer/0.1"),
        })
    }

    /// Falls back to defaults when the file does not exist.
    pub fn load_pipeline_config(&self) -> Result<PipelineConfig> {
        if !self.pipeline_config_path.exists() {
            debug!(
                path = %self.pipeline_config_path.display(),
                "pipeline config not found, using defaults"
            );
            return Ok(PipelineConfig::default());
        }
        PipelineConfig::load(&self.pipeline_config_path)
    }
}

/// Tunable weights and thresholds. Every field has a default, so partial YAML is fine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub routing: RoutingConfig,
    pub scoring: ScoringConfig,
    pub matcher: MatcherConfig,
    pub assignment: AssignmentConfig,
    pub import: ImportConfig,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = Self::from_yaml_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.routing.low_threshold > self.routing.high_threshold {
            bail!(
                "routing.low_threshold ({}) exceeds routing.high_threshold ({})",
                self.routing.low_threshold,
                self.routing.high_threshold
            );
        }
        if !(0.0..=1.0).contains(&self.matcher.similarity_floor) {
            bail!("matcher.similarity_floor must be within 0..=1");
        }

        let scoring = &self.scoring;
        let assignment = &self.assignment;
        for (key, value) in [
            ("scoring.builder_weight", scoring.builder_weight),
            ("scoring.specific_job_type_points", scoring.specific_job_type_points),
            ("scoring.generic_job_type_points", scoring.generic_job_type_points),
            ("scoring.address_points", scoring.address_points),
            ("scoring.date_points", scoring.date_points),
            ("matcher.fuzzy_scale", self.matcher.fuzzy_scale),
            ("assignment.moderate_penalty", assignment.moderate_penalty),
            ("assignment.heavy_penalty", assignment.heavy_penalty),
            ("assignment.overbooked_penalty", assignment.overbooked_penalty),
            ("assignment.distance_coefficient", assignment.distance_coefficient),
            ("assignment.specialization_bonus", assignment.specialization_bonus),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{key} must be a non-negative number, got {value}");
            }
        }

        for (key, value, max) in [
            ("scoring.grace_hours", scoring.grace_hours, MAX_GRACE_HOURS),
            ("scoring.horizon_days", scoring.horizon_days, MAX_WINDOW_DAYS),
            ("import.initial_lookback_days", self.import.initial_lookback_days, MAX_WINDOW_DAYS),
            ("import.overlap_minutes", self.import.overlap_minutes, MAX_OVERLAP_MINUTES),
        ] {
            if !(0..=max).contains(&value) {
                bail!("{key} must be within 0..={max}, got {value}");
            }
        }
        Ok(())
    }
}

const MAX_GRACE_HOURS: i64 = 24 * 31;
const MAX_WINDOW_DAYS: i64 = 3650;
const MAX_OVERLAP_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub high_threshold: u8,
    pub low_threshold: u8,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            high_threshold: 85,
            low_threshold: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub builder_weight: f64,
    pub specific_job_type_points: f64,
    pub generic_job_type_points: f64,
    pub address_points: f64,
    pub date_points: f64,
    /// Ceiling applied when the event date is implausible.
    pub disqualified_cap: u8,
    pub grace_hours: i64,
    pub horizon_days: i64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            builder_weight: 0.6,
            specific_job_type_points: 20.0,
            generic_job_type_points: 12.0,
            address_points: 10.0,
            date_points: 10.0,
            disqualified_cap: 20,
            grace_hours: 24,
            horizon_days: 365,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub similarity_floor: f64,
    pub exact_primary_score: u8,
    pub exact_secondary_score: u8,
    pub partial_score: u8,
    pub fuzzy_scale: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            similarity_floor: 0.6,
            exact_primary_score: 100,
            exact_secondary_score: 90,
            partial_score: 70,
            fuzzy_scale: 60.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    pub moderate_penalty: f64,
    pub heavy_penalty: f64,
    pub overbooked_penalty: f64,
    /// Points subtracted per kilometre of travel.
    pub distance_coefficient: f64,
    pub specialization_bonus: f64,
    pub default_daily_capacity: u32,
    pub default_weekly_capacity: u32,
    pub default_job_minutes: u32,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            moderate_penalty: 15.0,
            heavy_penalty: 35.0,
            overbooked_penalty: 100.0,
            distance_coefficient: 0.5,
            specialization_bonus: 10.0,
            default_daily_capacity: 6,
            default_weekly_capacity: 25,
            default_job_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub workers: usize,
    pub initial_lookback_days: i64,
    pub overlap_minutes: i64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            initial_lookback_days: 30,
            overlap_minutes: 15,
        }
    }
}
