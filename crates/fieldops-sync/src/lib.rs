//! Calendar import orchestration: classification, routing, review and inspector assignment.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use fieldops_adapters::{EventSource, FixtureEventSource, HttpEventSource};
use fieldops_storage::{
    HttpClientConfig, HttpFetcher, MemoryStore, PayloadArchive, PgStore, SeedData, Store,
};
use tracing::{error, info};

pub mod assignment;
pub mod confidence;
pub mod config;
pub mod matcher;
pub mod parser;
pub mod pipeline;
pub mod reports;
pub mod review;
pub mod routing;

pub use assignment::{
    haversine_km, rank_candidates, AssignmentEngine, AssignmentError, AssignmentOutcome,
    CandidateScore,
};
pub use confidence::{score_confidence, ConfidenceInputs};
pub use config::{AppConfig, CalendarSourceKind, PipelineConfig};
pub use matcher::BuilderMatcher;
pub use parser::parse_event;
pub use pipeline::{classify_event, ImportPipeline, ImportRunSummary};
pub use reports::{report_recent_imports_markdown, RoutedEventRecord};
pub use review::{ApprovalOutcome, ReviewError, ReviewQueue};
pub use routing::{decide_route, route_event, ClassifiedEvent, RouteDecision, RouteOutcome};

pub const CRATE_NAME: &str = "fieldops-sync";

pub fn load_seed(path: &Path) -> Result<SeedData> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Postgres when `DATABASE_URL` is set, otherwise an in-memory store seeded from the seed file.
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn Store>> {
    match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url)
                .await
                .context("connecting to postgres")?;
            info!("using postgres store");
            Ok(Arc::new(store))
        }
        None => {
            let seed = if config.seed_path.exists() {
                load_seed(&config.seed_path)?
            } else {
                SeedData::default()
            };
            info!(
                builders = seed.builders.len(),
                inspectors = seed.inspectors.len(),
                "using in-memory store"
            );
            Ok(Arc::new(MemoryStore::seeded(seed)))
        }
    }
}

pub fn build_event_source(config: &AppConfig) -> Result<Arc<dyn EventSource>> {
    match config.calendar_source {
        CalendarSourceKind::Fixture => Ok(Arc::new(FixtureEventSource::new(&config.fixtures_dir))),
        CalendarSourceKind::Http => {
            let Some(base_url) = &config.calendar_url else {
                bail!("FIELDOPS_CALENDAR_URL is required for the http calendar source");
            };
            let fetcher = HttpFetcher::new(HttpClientConfig {
                timeout: Duration::from_secs(config.http_timeout_secs),
                user_agent: Some(config.user_agent.clone()),
                bearer_token: config.calendar_token.clone(),
                ..Default::default()
            })?;
            let source = HttpEventSource::new(base_url.clone(), Arc::new(fetcher))
                .with_archive(PayloadArchive::new(&config.archive_dir));
            Ok(Arc::new(source))
        }
    }
}

/// Everything a process needs, wired once.
#[derive(Clone)]
pub struct FieldOps {
    pub config: AppConfig,
    pub pipeline_config: PipelineConfig,
    pub store: Arc<dyn Store>,
    pub engine: Arc<AssignmentEngine>,
    pub review: Arc<ReviewQueue>,
    pub pipeline: Arc<ImportPipeline>,
}

impl FieldOps {
    pub async fn from_env() -> Result<Self> {
        Self::from_config(AppConfig::from_env()?).await
    }

    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let pipeline_config = config.load_pipeline_config()?;
        let store = open_store(&config).await?;
        let source = build_event_source(&config)?;
        Ok(Self::assemble(config, pipeline_config, store, source))
    }

    pub fn assemble(
        config: AppConfig,
        pipeline_config: PipelineConfig,
        store: Arc<dyn Store>,
        source: Arc<dyn EventSource>,
    ) -> Self {
        let engine = Arc::new(AssignmentEngine::new(
            store.clone(),
            pipeline_config.assignment.clone(),
        ));
        let review = Arc::new(ReviewQueue::new(
            store.clone(),
            engine.clone(),
            pipeline_config.clone(),
        ));
        let pipeline = Arc::new(
            ImportPipeline::new(store.clone(), source, engine.clone(), pipeline_config.clone())
                .with_reports_dir(&config.reports_dir),
        );
        Self {
            config,
            pipeline_config,
            store,
            engine,
            review,
            pipeline,
        }
    }
}

/// Runs one batch for `calendar`, or for every configured calendar.
pub async fn run_import_once_from_env(calendar: Option<&str>) -> Result<Vec<ImportRunSummary>> {
    let ops = FieldOps::from_env().await?;
    let calendars = match calendar {
        Some(id) => vec![id.to_string()],
        None => ops.config.calendars.clone(),
    };
    let mut summaries = Vec::with_capacity(calendars.len());
    let mut last_error = None;
    for calendar_id in &calendars {
        match ops.pipeline.run_import(calendar_id).await {
            Ok(summary) => summaries.push(summary),
            Err(err) => {
                error!(%calendar_id, error = %format!("{err:#}"), "import batch could not be recorded");
                last_error = Some(err);
            }
        }
    }
    match last_error {
        Some(err) if summaries.is_empty() => Err(err),
        _ => Ok(summaries),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn workspace_file(rel: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../..").join(rel)
    }

    #[test]
    fn dev_seed_parses_and_covers_fixture_builders() {
        let seed = load_seed(&workspace_file("seed/dev.yaml")).unwrap();
        assert!(seed.builders.len() >= 3);
        assert!(seed.abbreviations.iter().any(|a| a.abbreviation == "MI" && a.is_primary));
        assert!(seed.inspectors.iter().any(|i| i.auto_assign_enabled));

        let matcher = BuilderMatcher::new(
            PipelineConfig::default().matcher,
            &seed.abbreviations,
            &seed.builders,
        );
        assert_eq!(matcher.match_guess(Some("MI Homes")).score, 100);
        assert_eq!(matcher.match_guess(Some("Ryan Homes")).score, 100);
    }

    #[tokio::test]
    async fn in_memory_store_is_used_without_database_url() {
        let temp = tempfile::tempdir().unwrap();
        let config = AppConfig {
            database_url: None,
            seed_path: workspace_file("seed/dev.yaml"),
            pipeline_config_path: workspace_file("config/pipeline.yaml"),
            calendar_source: CalendarSourceKind::Fixture,
            fixtures_dir: workspace_file("fixtures/calendars"),
            calendar_url: None,
            calendar_token: None,
            reports_dir: temp.path().join("reports"),
            archive_dir: temp.path().join("archive"),
            scheduler_enabled: false,
            import_cron: "*/30 * * * *".into(),
            calendars: vec!["ops-main".into()],
            web_port: 0,
            http_timeout_secs: 5,
            user_agent: "fieldops-test".into(),
        };
        let ops = FieldOps::from_config(config.clone()).await.unwrap();
        assert!(!ops.store.list_builders().await.unwrap().is_empty());
        assert!(ops.pipeline.maybe_build_scheduler(&config).await.unwrap().is_none());

        let http = AppConfig {
            calendar_source: CalendarSourceKind::Http,
            ..config
        };
        assert!(build_event_source(&http).is_err());
    }
}
