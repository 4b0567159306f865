//! Storage contracts, store implementations and fetch utilities for fieldops.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use fieldops_core::{
    AssignmentAction, AssignmentHistory, Builder, BuilderAbbreviation, BuilderMatch,
    CalendarImportLog, EventStatus, InspectorPreferences, InspectorWorkload, Job, JobSpec,
    NewPendingEvent, ParsedCandidate, PendingCalendarEvent, RawCalendarEvent, ReviewStamp,
};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

mod archive;
mod http;
mod memory;
mod postgres;

pub use archive::{content_hash, ArchivedPayload, PayloadArchive};
pub use http::{
    BackoffPolicy, CalendarResponse, FetchError, HttpClientConfig, HttpFetcher, Retry,
};
pub use memory::MemoryStore;
pub use postgres::{PgStore, MIGRATOR};

pub const CRATE_NAME: &str = "fieldops-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("external event id {0} is already recorded")]
    DuplicateExternalId(String),
    #[error("precondition failed: {0}")]
    Conflict(String),
    #[error("invalid stored value: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Builder lookup table consumed by the matcher. Read-only from the pipeline.
#[async_trait]
pub trait BuilderDirectory: Send + Sync {
    async fn list_abbreviations(&self) -> Result<Vec<BuilderAbbreviation>, StoreError>;
    async fn list_builders(&self) -> Result<Vec<Builder>, StoreError>;
    async fn get_builder(&self, id: Uuid) -> Result<Option<Builder>, StoreError>;
}

#[async_trait]
pub trait JobSink: Send + Sync {
    async fn create_job(&self, spec: JobSpec) -> Result<Uuid, StoreError>;
}

/// Initial lifecycle state chosen by routing for a brand-new event.
#[derive(Debug, Clone, PartialEq)]
pub enum InitialRoute {
    Pending,
    Rejected,
    /// The job is created in the same unit of work as the event row.
    AutoCreate(JobSpec),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertedEvent {
    pub event: PendingCalendarEvent,
    pub job: Option<Job>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub status: Option<EventStatus>,
    pub min_confidence: Option<u8>,
    pub max_confidence: Option<u8>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: usize,
}

impl EventFilter {
    pub fn matches(&self, event: &PendingCalendarEvent) -> bool {
        self.status.is_none_or(|s| event.status() == s)
            && self.min_confidence.is_none_or(|min| event.confidence >= min)
            && self.max_confidence.is_none_or(|max| event.confidence <= max)
            && self.start.is_none_or(|start| event.start_at >= start)
            && self.end.is_none_or(|end| event.start_at <= end)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventPage {
    pub items: Vec<PendingCalendarEvent>,
    pub total: usize,
}

/// Classified calendar events and batch logs.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn find_event_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<PendingCalendarEvent>, StoreError>;

    async fn get_event(&self, id: Uuid) -> Result<Option<PendingCalendarEvent>, StoreError>;

    /// Fails with [`StoreError::DuplicateExternalId`] when the external id already has a row.
    async fn insert_event(
        &self,
        event: NewPendingEvent,
        route: InitialRoute,
        now: DateTime<Utc>,
    ) -> Result<InsertedEvent, StoreError>;

    /// Refreshes raw and parsed fields in place while the event is still pending.
    /// Resolved events are returned untouched.
    async fn refresh_pending_event(
        &self,
        id: Uuid,
        raw: &RawCalendarEvent,
        parsed: &ParsedCandidate,
        builder_match: &BuilderMatch,
        confidence: u8,
        now: DateTime<Utc>,
    ) -> Result<PendingCalendarEvent, StoreError>;

    async fn list_events(&self, filter: &EventFilter) -> Result<EventPage, StoreError>;

    /// Creates the job and moves the event to `approved`, only if it is still pending.
    async fn approve_event(
        &self,
        id: Uuid,
        job: JobSpec,
        review: ReviewStamp,
    ) -> Result<(PendingCalendarEvent, Job), StoreError>;

    /// Moves the event to `rejected`, only if it is still pending.
    async fn reject_event(
        &self,
        id: Uuid,
        review: ReviewStamp,
        reason: String,
    ) -> Result<PendingCalendarEvent, StoreError>;

    async fn append_import_log(&self, log: &CalendarImportLog) -> Result<(), StoreError>;

    async fn list_import_logs(
        &self,
        calendar_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CalendarImportLog>, StoreError>;

    async fn last_successful_import(
        &self,
        calendar_id: &str,
    ) -> Result<Option<CalendarImportLog>, StoreError>;
}

/// One assignment change, applied atomically by [`AssignmentStore::commit_assignment`].
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentCommit {
    pub job_id: Uuid,
    /// Compare-and-set guard on the job's current assignee.
    pub expected_assignee: Option<Uuid>,
    pub new_assignee: Option<Uuid>,
    pub action: AssignmentAction,
    pub assigned_by: Option<String>,
    pub score: Option<f64>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentReceipt {
    pub job: Job,
    pub history: AssignmentHistory,
    pub workload: Option<InspectorWorkload>,
}

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn list_preferences(&self) -> Result<Vec<InspectorPreferences>, StoreError>;

    async fn get_preferences(
        &self,
        inspector_id: Uuid,
    ) -> Result<Option<InspectorPreferences>, StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    async fn list_unassigned_jobs(&self) -> Result<Vec<Job>, StoreError>;

    /// Workload rows with `from <= date <= to`, for every inspector.
    async fn workloads_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<InspectorWorkload>, StoreError>;

    /// Decrements the previous assignee's row, increments the new one, sets the job's
    /// assignee and appends a history row. All or nothing.
    async fn commit_assignment(
        &self,
        commit: AssignmentCommit,
    ) -> Result<AssignmentReceipt, StoreError>;

    async fn flag_for_manual_assignment(&self, job_id: Uuid) -> Result<(), StoreError>;

    async fn job_history(&self, job_id: Uuid) -> Result<Vec<AssignmentHistory>, StoreError>;
}

pub trait Store: BuilderDirectory + JobSink + EventStore + AssignmentStore {}

impl<T> Store for T where T: BuilderDirectory + JobSink + EventStore + AssignmentStore {}

/// Reference data used to seed a [`MemoryStore`] for local runs and tests.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub builders: Vec<Builder>,
    #[serde(default)]
    pub abbreviations: Vec<BuilderAbbreviation>,
    #[serde(default)]
    pub inspectors: Vec<InspectorPreferences>,
}
