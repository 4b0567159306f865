//! One import batch per calendar: fetch, classify, route, assign, log.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use fieldops_adapters::{EventBatch, EventSource};
use fieldops_core::{CalendarImportLog, ImportCounters, RawCalendarEvent};
use fieldops_storage::Store;
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::assignment::{AssignmentEngine, AssignmentOutcome};
use crate::confidence::{score_confidence, ConfidenceInputs};
use crate::config::{AppConfig, PipelineConfig, ScoringConfig};
use crate::matcher::BuilderMatcher;
use crate::parser::{extract_coordinates, parse_event};
use crate::reports::{write_run_report, RoutedEventRecord};
use crate::routing::{route_event, ClassifiedEvent, RouteOutcome};

/// Parse, match and score one event. Pure.
pub fn classify_event(
    raw: RawCalendarEvent,
    matcher: &BuilderMatcher,
    scoring: &ScoringConfig,
    now: DateTime<Utc>,
) -> ClassifiedEvent {
    let parsed = parse_event(&raw);
    let builder_match = matcher.match_guess(parsed.builder_guess.as_deref());
    let inputs = ConfidenceInputs::from_signals(&parsed, &builder_match, raw.start_at);
    let confidence = score_confidence(&inputs, now, scoring);
    let coordinates =
        extract_coordinates(&raw.location).or_else(|| extract_coordinates(&raw.description));
    ClassifiedEvent {
        raw,
        parsed,
        builder_match,
        confidence,
        coordinates,
    }
}

/// Classifies on the blocking pool in `workers` chunks. Output order follows input order.
pub async fn classify_events(
    events: Vec<RawCalendarEvent>,
    matcher: Arc<BuilderMatcher>,
    scoring: ScoringConfig,
    now: DateTime<Utc>,
    workers: usize,
) -> Result<Vec<ClassifiedEvent>> {
    if events.is_empty() {
        return Ok(Vec::new());
    }
    let chunk_size = events.len().div_ceil(workers.max(1));
    let mut handles = Vec::new();
    let mut events = events.into_iter().peekable();
    while events.peek().is_some() {
        let chunk: Vec<RawCalendarEvent> = events.by_ref().take(chunk_size).collect();
        let matcher = matcher.clone();
        let scoring = scoring.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            chunk
                .into_iter()
                .map(|raw| classify_event(raw, &matcher, &scoring, now))
                .collect::<Vec<_>>()
        }));
    }

    let mut classified = Vec::new();
    for handle in handles {
        classified.extend(handle.await.context("classification worker panicked")?);
    }
    Ok(classified)
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportRunSummary {
    pub run_id: Uuid,
    pub log: CalendarImportLog,
    pub records: Vec<RoutedEventRecord>,
    pub report_dir: Option<PathBuf>,
}

pub struct ImportPipeline {
    store: Arc<dyn Store>,
    source: Arc<dyn EventSource>,
    engine: Arc<AssignmentEngine>,
    config: PipelineConfig,
    reports_dir: Option<PathBuf>,
}

impl ImportPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn EventSource>,
        engine: Arc<AssignmentEngine>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            source,
            engine,
            config,
            reports_dir: None,
        }
    }

    /// Writes a run report under `dir/<run_id>/` after every batch.
    pub fn with_reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = Some(dir.into());
        self
    }

    pub fn source_kind(&self) -> &'static str {
        self.source.source_kind()
    }

    pub async fn run_import(&self, calendar_id: &str) -> Result<ImportRunSummary> {
        self.run_import_at(calendar_id, Utc::now()).await
    }

    /// Same as [`ImportPipeline::run_import`] with an explicit clock.
    pub async fn run_import_at(
        &self,
        calendar_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ImportRunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("import_batch", %run_id, calendar_id, source = self.source_kind());
        self.run_batch(run_id, calendar_id, now).instrument(span).await
    }

    async fn run_batch(
        &self,
        run_id: Uuid,
        calendar_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ImportRunSummary> {
        let mut log = CalendarImportLog {
            id: Uuid::new_v4(),
            run_id,
            calendar_id: calendar_id.to_string(),
            calendar_name: None,
            run_at: now,
            counters: ImportCounters::default(),
            error: None,
        };

        let since = match self.window_start(calendar_id, now).await {
            Ok(since) => since,
            Err(err) => return self.abandon(log, err).await,
        };
        info!(%since, "import batch started");

        let batch = match self.source.fetch_events(calendar_id, since).await {
            Ok(batch) => batch,
            Err(err) => {
                warn!(error = %err, "calendar fetch failed");
                log.error = Some(err.to_string());
                return self.finish(log, Vec::new()).await;
            }
        };
        let EventBatch {
            calendar_name,
            events,
            partial_error,
            ..
        } = batch;
        log.calendar_name = calendar_name;
        if let Some(partial) = &partial_error {
            warn!(reason = %partial, "calendar fetch was partial");
        }

        let matcher = match self.load_matcher().await {
            Ok(matcher) => Arc::new(matcher),
            Err(err) => return self.abandon(log, err).await,
        };
        let classified = match classify_events(
            events,
            matcher,
            self.config.scoring.clone(),
            now,
            self.config.import.workers,
        )
        .await
        {
            Ok(classified) => classified,
            Err(err) => return self.abandon(log, err).await,
        };

        let mut records = Vec::with_capacity(classified.len());
        let mut storage_error = None;
        for event in classified {
            let external_id = event.raw.external_id.clone();
            let mut record = RoutedEventRecord {
                external_id: external_id.clone(),
                title: event.raw.title.clone(),
                start_at: event.raw.start_at,
                outcome: String::new(),
                event_id: None,
                confidence: Some(event.confidence),
                builder_id: event.builder_match.builder_id,
                builder_score: Some(event.builder_match.score),
                match_method: Some(event.builder_match.method.as_str().to_string()),
                job_type: event
                    .parsed
                    .job_type
                    .as_ref()
                    .map(|j| j.job_type.as_str().to_string()),
                job_id: None,
                assignee: None,
                note: None,
            };
            log.counters.events_processed += 1;

            let outcome = match route_event(self.store.as_ref(), event, &self.config, now).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(%external_id, error = %err, "storage failure, aborting batch");
                    log.counters.events_errored += 1;
                    record.outcome = "error".to_string();
                    record.note = Some(err.to_string());
                    records.push(record);
                    storage_error = Some(format!("storage failure at event {external_id}: {err}"));
                    break;
                }
            };
            debug!(%external_id, outcome = outcome.label(), "event routed");
            record.outcome = outcome.label().to_string();
            record.event_id = Some(outcome.event().id);

            match outcome {
                RouteOutcome::Duplicate { .. } => log.counters.duplicates += 1,
                RouteOutcome::Queued { .. } => log.counters.events_queued += 1,
                RouteOutcome::Rejected { .. } => log.counters.events_rejected += 1,
                RouteOutcome::AutoCreated { job, .. } => {
                    log.counters.jobs_created += 1;
                    record.job_id = Some(job.id);
                    match self.engine.auto_assign(job.id, now).await {
                        Ok(AssignmentOutcome::Assigned { receipt, .. }) => {
                            log.counters.jobs_assigned += 1;
                            record.assignee = receipt.job.assignee;
                        }
                        Ok(AssignmentOutcome::Unassignable { reason, .. }) => {
                            log.counters.jobs_unassigned += 1;
                            record.note = Some(reason);
                        }
                        Err(err) => {
                            warn!(job_id = %job.id, error = %err, "assignment failed");
                            log.counters.jobs_unassigned += 1;
                            record.note = Some(err.to_string());
                        }
                    }
                }
            }
            records.push(record);
        }

        log.error = match (storage_error, partial_error) {
            (Some(storage), Some(partial)) => Some(format!("{storage}; {partial}")),
            (storage, partial) => storage.or(partial),
        };
        self.finish(log, records).await
    }

    async fn window_start(&self, calendar_id: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let last = self
            .store
            .last_successful_import(calendar_id)
            .await
            .context("reading last successful import")?;
        Ok(match last {
            Some(last) => last.run_at - Duration::minutes(self.config.import.overlap_minutes),
            None => now - Duration::days(self.config.import.initial_lookback_days),
        })
    }

    async fn load_matcher(&self) -> Result<BuilderMatcher> {
        let abbreviations = self
            .store
            .list_abbreviations()
            .await
            .context("loading builder abbreviations")?;
        let builders = self.store.list_builders().await.context("loading builders")?;
        Ok(BuilderMatcher::new(
            self.config.matcher.clone(),
            &abbreviations,
            &builders,
        ))
    }

    /// Records a batch that failed before any event was routed.
    async fn abandon(
        &self,
        mut log: CalendarImportLog,
        err: anyhow::Error,
    ) -> Result<ImportRunSummary> {
        let message = format!("{err:#}");
        error!(error = %message, "import batch abandoned");
        log.error = Some(message);
        self.finish(log, Vec::new()).await
    }

    async fn finish(
        &self,
        log: CalendarImportLog,
        records: Vec<RoutedEventRecord>,
    ) -> Result<ImportRunSummary> {
        self.store
            .append_import_log(&log)
            .await
            .context("writing calendar import log")?;

        let report_dir = match &self.reports_dir {
            Some(root) => Some(
                write_run_report(root, &log, &records)
                    .await
                    .context("writing run report")?,
            ),
            None => None,
        };
        let c = &log.counters;
        info!(
            processed = c.events_processed,
            created = c.jobs_created,
            queued = c.events_queued,
            rejected = c.events_rejected,
            duplicates = c.duplicates,
            assigned = c.jobs_assigned,
            error = log.error.as_deref().unwrap_or(""),
            "import batch finished"
        );
        Ok(ImportRunSummary {
            run_id: log.run_id,
            log,
            records,
            report_dir,
        })
    }

    /// One cron job per configured calendar, or `None` when scheduling is off.
    pub async fn maybe_build_scheduler(
        self: &Arc<Self>,
        config: &AppConfig,
    ) -> Result<Option<JobScheduler>> {
        if !config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        for calendar_id in &config.calendars {
            let pipeline = Arc::clone(self);
            let calendar_id = calendar_id.clone();
            let job = Job::new_async(config.import_cron.as_str(), move |_uuid, _l| {
                let pipeline = pipeline.clone();
                let calendar_id = calendar_id.clone();
                Box::pin(async move {
                    if let Err(err) = pipeline.run_import(&calendar_id).await {
                        error!(%calendar_id, error = %format!("{err:#}"), "scheduled import failed");
                    }
                })
            })
            .with_context(|| format!("creating scheduler job for cron {}", config.import_cron))?;
            sched.add(job).await.context("adding scheduler job")?;
        }
        Ok(Some(sched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use fieldops_adapters::{FixtureEventSource, StaticEventSource};
    use fieldops_core::{
        AssignmentHistory, Builder, BuilderAbbreviation, BuilderMatch, EventStatus,
        InspectorPreferences, InspectorWorkload, JobSpec, NewPendingEvent, ParsedCandidate,
        PendingCalendarEvent, ReviewStamp,
    };
    use fieldops_storage::{
        AssignmentCommit, AssignmentReceipt, AssignmentStore, BuilderDirectory, EventFilter,
        EventPage, EventStore, InitialRoute, InsertedEvent, JobSink, MemoryStore, SeedData,
        StoreError,
    };

    fn clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).single().unwrap()
    }

    fn seed() -> SeedData {
        let builder = |id: u128, name: &str| Builder {
            id: Uuid::from_u128(id),
            name: name.into(),
            territory: Some("Raleigh".into()),
            total_jobs: 0,
        };
        let abbr = |id: u128, text: &str| BuilderAbbreviation {
            builder_id: Uuid::from_u128(id),
            abbreviation: text.into(),
            is_primary: true,
        };
        SeedData {
            builders: vec![builder(1, "M/I Homes"), builder(2, "Pulte Group")],
            abbreviations: vec![abbr(1, "MI"), abbr(2, "Pulte")],
            inspectors: vec![InspectorPreferences {
                inspector_id: Uuid::from_u128(100),
                display_name: "Sam".into(),
                preferred_territories: vec!["Raleigh".into()],
                max_daily_jobs: None,
                max_weekly_jobs: None,
                working_days: vec![],
                specializations: vec![],
                travel_radius_km: None,
                home_base: None,
                auto_assign_enabled: true,
                created_at: clock(),
            }],
        }
    }

    fn pipeline(source: Arc<dyn EventSource>) -> (Arc<MemoryStore>, ImportPipeline) {
        let store = Arc::new(MemoryStore::seeded(seed()));
        let config = PipelineConfig::default();
        let engine = Arc::new(AssignmentEngine::new(store.clone(), config.assignment.clone()));
        (store.clone(), ImportPipeline::new(store, source, engine, config))
    }

    /// Delegates to a [`MemoryStore`] but cannot read builder abbreviations.
    struct AbbreviationOutage(MemoryStore);

    #[async_trait]
    impl BuilderDirectory for AbbreviationOutage {
        async fn list_abbreviations(&self) -> Result<Vec<BuilderAbbreviation>, StoreError> {
            Err(StoreError::Conflict("abbreviation table locked".into()))
        }
        async fn list_builders(&self) -> Result<Vec<Builder>, StoreError> {
            self.0.list_builders().await
        }
        async fn get_builder(&self, id: Uuid) -> Result<Option<Builder>, StoreError> {
            self.0.get_builder(id).await
        }
    }

    #[async_trait]
    impl JobSink for AbbreviationOutage {
        async fn create_job(&self, spec: JobSpec) -> Result<Uuid, StoreError> {
            self.0.create_job(spec).await
        }
    }

    #[async_trait]
    impl EventStore for AbbreviationOutage {
        async fn find_event_by_external_id(
            &self,
            external_id: &str,
        ) -> Result<Option<PendingCalendarEvent>, StoreError> {
            self.0.find_event_by_external_id(external_id).await
        }
        async fn get_event(&self, id: Uuid) -> Result<Option<PendingCalendarEvent>, StoreError> {
            self.0.get_event(id).await
        }
        async fn insert_event(
            &self,
            event: NewPendingEvent,
            route: InitialRoute,
            now: DateTime<Utc>,
        ) -> Result<InsertedEvent, StoreError> {
            self.0.insert_event(event, route, now).await
        }
        async fn refresh_pending_event(
            &self,
            id: Uuid,
            raw: &RawCalendarEvent,
            parsed: &ParsedCandidate,
            builder_match: &BuilderMatch,
            confidence: u8,
            now: DateTime<Utc>,
        ) -> Result<PendingCalendarEvent, StoreError> {
            self.0
                .refresh_pending_event(id, raw, parsed, builder_match, confidence, now)
                .await
        }
        async fn list_events(&self, filter: &EventFilter) -> Result<EventPage, StoreError> {
            self.0.list_events(filter).await
        }
        async fn approve_event(
            &self,
            id: Uuid,
            job: JobSpec,
            review: ReviewStamp,
        ) -> Result<(PendingCalendarEvent, fieldops_core::Job), StoreError> {
            self.0.approve_event(id, job, review).await
        }
        async fn reject_event(
            &self,
            id: Uuid,
            review: ReviewStamp,
            reason: String,
        ) -> Result<PendingCalendarEvent, StoreError> {
            self.0.reject_event(id, review, reason).await
        }
        async fn append_import_log(&self, log: &CalendarImportLog) -> Result<(), StoreError> {
            self.0.append_import_log(log).await
        }
        async fn list_import_logs(
            &self,
            calendar_id: Option<&str>,
            limit: usize,
        ) -> Result<Vec<CalendarImportLog>, StoreError> {
            self.0.list_import_logs(calendar_id, limit).await
        }
        async fn last_successful_import(
            &self,
            calendar_id: &str,
        ) -> Result<Option<CalendarImportLog>, StoreError> {
            self.0.last_successful_import(calendar_id).await
        }
    }

    #[async_trait]
    impl AssignmentStore for AbbreviationOutage {
        async fn list_preferences(&self) -> Result<Vec<InspectorPreferences>, StoreError> {
            self.0.list_preferences().await
        }
        async fn get_preferences(
            &self,
            inspector_id: Uuid,
        ) -> Result<Option<InspectorPreferences>, StoreError> {
            self.0.get_preferences(inspector_id).await
        }
        async fn get_job(&self, id: Uuid) -> Result<Option<fieldops_core::Job>, StoreError> {
            self.0.get_job(id).await
        }
        async fn list_unassigned_jobs(&self) -> Result<Vec<fieldops_core::Job>, StoreError> {
            self.0.list_unassigned_jobs().await
        }
        async fn workloads_between(
            &self,
            from: NaiveDate,
            to: NaiveDate,
        ) -> Result<Vec<InspectorWorkload>, StoreError> {
            self.0.workloads_between(from, to).await
        }
        async fn commit_assignment(
            &self,
            commit: AssignmentCommit,
        ) -> Result<AssignmentReceipt, StoreError> {
            self.0.commit_assignment(commit).await
        }
        async fn flag_for_manual_assignment(&self, job_id: Uuid) -> Result<(), StoreError> {
            self.0.flag_for_manual_assignment(job_id).await
        }
        async fn job_history(&self, job_id: Uuid) -> Result<Vec<AssignmentHistory>, StoreError> {
            self.0.job_history(job_id).await
        }
    }

    fn fixture_source() -> Arc<dyn EventSource> {
        Arc::new(FixtureEventSource::new(
            Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/calendars"),
        ))
    }

    fn record<'a>(summary: &'a ImportRunSummary, external_id: &str) -> &'a RoutedEventRecord {
        summary
            .records
            .iter()
            .find(|r| r.external_id == external_id)
            .unwrap()
    }

    #[tokio::test]
    async fn fixture_batch_routes_and_assigns() {
        let (store, pipeline) = pipeline(fixture_source());
        let summary = pipeline.run_import_at("ops-main", clock()).await.unwrap();
        let c = summary.log.counters;

        assert_eq!(c.events_processed, 4);
        assert_eq!(
            c.jobs_created + c.events_queued + c.events_rejected + c.duplicates,
            c.events_processed
        );
        assert_eq!(record(&summary, "evt-1001").outcome, "auto_created");
        assert_eq!(record(&summary, "evt-1001").confidence, Some(100));
        assert_eq!(record(&summary, "evt-1001").assignee, Some(Uuid::from_u128(100)));
        assert_eq!(record(&summary, "evt-1003").outcome, "rejected");
        assert_eq!(c.jobs_assigned + c.jobs_unassigned, c.jobs_created);
        assert!(summary.log.error.as_deref().unwrap_or_default().contains("evt-1006"));

        let logs = store.list_import_logs(Some("ops-main"), 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(store.job_count().await as u32, c.jobs_created);
    }

    #[tokio::test]
    async fn rerunning_a_batch_never_duplicates_rows() {
        let (store, pipeline) = pipeline(fixture_source());
        let first = pipeline.run_import_at("ops-main", clock()).await.unwrap();
        let events_after_first = store.event_count().await;
        let jobs_after_first = store.job_count().await;

        let second = pipeline.run_import_at("ops-main", clock()).await.unwrap();
        assert!(second.log.counters.events_processed > 0);
        assert_eq!(second.log.counters.duplicates, second.log.counters.events_processed);
        assert_eq!(store.event_count().await, events_after_first);
        assert_eq!(store.job_count().await, jobs_after_first);
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn unreachable_source_logs_zero_counters_with_error() {
        let (store, pipeline) = pipeline(Arc::new(StaticEventSource::unreachable()));
        let summary = pipeline.run_import_at("ops-main", clock()).await.unwrap();

        assert_eq!(summary.log.counters, ImportCounters::default());
        assert!(summary.log.error.unwrap().contains("connection refused"));
        assert_eq!(store.list_import_logs(None, 10).await.unwrap().len(), 1);
        assert!(store.last_successful_import("ops-main").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_failure_before_routing_still_writes_the_log_row() {
        let store = Arc::new(AbbreviationOutage(MemoryStore::seeded(seed())));
        let config = PipelineConfig::default();
        let engine = Arc::new(AssignmentEngine::new(store.clone(), config.assignment.clone()));
        let pipeline = ImportPipeline::new(store.clone(), fixture_source(), engine, config);

        let summary = pipeline.run_import_at("ops-main", clock()).await.unwrap();
        assert_eq!(summary.log.counters, ImportCounters::default());
        assert!(summary.records.is_empty());
        let error = summary.log.error.unwrap();
        assert!(error.contains("loading builder abbreviations"), "{error}");
        assert!(error.contains("abbreviation table locked"), "{error}");

        let logs = store.list_import_logs(None, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].run_id, summary.run_id);
        assert!(store.last_successful_import("ops-main").await.unwrap().is_none());
        assert_eq!(store.0.event_count().await, 0);
    }

    #[tokio::test]
    async fn pending_events_land_in_the_review_queue() {
        let start = clock() + Duration::days(2);
        let source = StaticEventSource::new(EventBatch {
            calendar_id: String::new(),
            calendar_name: None,
            events: vec![RawCalendarEvent {
                external_id: "evt-9".into(),
                calendar_id: "ops-main".into(),
                title: "Pulte walkthrough".into(),
                description: String::new(),
                location: String::new(),
                start_at: start,
                end_at: start + Duration::hours(1),
            }],
            partial_error: None,
        });
        let (store, pipeline) = pipeline(Arc::new(source));
        let summary = pipeline.run_import_at("ops-main", clock()).await.unwrap();
        assert_eq!(summary.log.counters.events_queued, 1);

        let page = store
            .list_events(&EventFilter {
                status: Some(EventStatus::Pending),
                ..EventFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].external_id, "evt-9");
    }

    #[tokio::test]
    async fn reports_are_written_when_configured() {
        let temp = tempfile::tempdir().unwrap();
        let (_store, pipeline) = pipeline(fixture_source());
        let pipeline = pipeline.with_reports_dir(temp.path());
        let summary = pipeline.run_import_at("ops-main", clock()).await.unwrap();

        let dir = summary.report_dir.unwrap();
        assert!(dir.join("import_summary.md").exists());
        assert!(dir.join("routed_events.json").exists());
        assert!(dir.join("snapshots/routed_events.parquet").exists());
        assert!(dir.join("snapshots/manifest.json").exists());
    }

    #[tokio::test]
    async fn classification_keeps_input_order_across_workers() {
        let matcher = Arc::new(BuilderMatcher::new(
            PipelineConfig::default().matcher,
            &seed().abbreviations,
            &seed().builders,
        ));
        let events = (0..9)
            .map(|i| RawCalendarEvent {
                external_id: format!("evt-{i}"),
                calendar_id: "ops".into(),
                title: "MI Homes - Final".into(),
                description: String::new(),
                location: String::new(),
                start_at: clock(),
                end_at: clock(),
            })
            .collect::<Vec<_>>();
        let classified = classify_events(events, matcher, ScoringConfig::default(), clock(), 4)
            .await
            .unwrap();
        let ids: Vec<_> = classified.iter().map(|c| c.raw.external_id.clone()).collect();
        assert_eq!(ids, (0..9).map(|i| format!("evt-{i}")).collect::<Vec<_>>());
        assert!(classified.iter().all(|c| c.builder_match.score == 100));
    }
}
