use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use fieldops_core::{
    AssignmentHistory, Builder, BuilderAbbreviation, BuilderMatch, CalendarImportLog, EventState,
    InspectorPreferences, InspectorWorkload, Job, JobSpec, NewPendingEvent, ParsedCandidate,
    PendingCalendarEvent, RawCalendarEvent, Rejection, ReviewStamp,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    AssignmentCommit, AssignmentReceipt, AssignmentStore, BuilderDirectory, EventFilter,
    EventPage, EventStore, InitialRoute, InsertedEvent, JobSink, SeedData, StoreError,
};

/// Process-local store. Every operation runs under one lock, so each call is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    builders: BTreeMap<Uuid, Builder>,
    abbreviations: Vec<BuilderAbbreviation>,
    inspectors: BTreeMap<Uuid, InspectorPreferences>,
    events: BTreeMap<Uuid, PendingCalendarEvent>,
    events_by_external_id: HashMap<String, Uuid>,
    jobs: BTreeMap<Uuid, Job>,
    workloads: BTreeMap<(Uuid, NaiveDate), InspectorWorkload>,
    history: Vec<AssignmentHistory>,
    import_logs: Vec<CalendarImportLog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(seed: SeedData) -> Self {
        let state = MemoryState {
            builders: seed.builders.into_iter().map(|b| (b.id, b)).collect(),
            abbreviations: seed.abbreviations,
            inspectors: seed
                .inspectors
                .into_iter()
                .map(|p| (p.inspector_id, p))
                .collect(),
            ..MemoryState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    pub async fn put_workload(&self, workload: InspectorWorkload) {
        let mut state = self.state.lock().await;
        state
            .workloads
            .insert((workload.inspector_id, workload.date), workload);
    }

    pub async fn event_count(&self) -> usize {
        self.state.lock().await.events.len()
    }

    pub async fn job_count(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn history_count(&self) -> usize {
        self.state.lock().await.history.len()
    }
}

impl MemoryState {
    fn insert_job(&mut self, spec: JobSpec, now: DateTime<Utc>) -> Job {
        let job = Job::from_spec(Uuid::new_v4(), spec, now);
        self.jobs.insert(job.id, job.clone());
        job
    }

    fn pending_event_mut(&mut self, id: Uuid) -> Result<&mut PendingCalendarEvent, StoreError> {
        let event = self
            .events
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("calendar event", id))?;
        if event.status().is_terminal() {
            return Err(StoreError::Conflict(format!(
                "event {id} is {}, not pending",
                event.status()
            )));
        }
        Ok(event)
    }
}

#[async_trait]
impl BuilderDirectory for MemoryStore {
    async fn list_abbreviations(&self) -> Result<Vec<BuilderAbbreviation>, StoreError> {
        Ok(self.state.lock().await.abbreviations.clone())
    }

    async fn list_builders(&self) -> Result<Vec<Builder>, StoreError> {
        Ok(self.state.lock().await.builders.values().cloned().collect())
    }

    async fn get_builder(&self, id: Uuid) -> Result<Option<Builder>, StoreError> {
        Ok(self.state.lock().await.builders.get(&id).cloned())
    }
}

#[async_trait]
impl JobSink for MemoryStore {
    async fn create_job(&self, spec: JobSpec) -> Result<Uuid, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.insert_job(spec, Utc::now()).id)
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn find_event_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<PendingCalendarEvent>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .events_by_external_id
            .get(external_id)
            .and_then(|id| state.events.get(id))
            .cloned())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<PendingCalendarEvent>, StoreError> {
        Ok(self.state.lock().await.events.get(&id).cloned())
    }

    async fn insert_event(
        &self,
        event: NewPendingEvent,
        route: InitialRoute,
        now: DateTime<Utc>,
    ) -> Result<InsertedEvent, StoreError> {
        let mut state = self.state.lock().await;
        if state
            .events_by_external_id
            .contains_key(&event.raw.external_id)
        {
            return Err(StoreError::DuplicateExternalId(event.raw.external_id));
        }

        let id = Uuid::new_v4();
        let (state_value, job) = match route {
            InitialRoute::Pending => (EventState::Pending, None),
            InitialRoute::Rejected => (
                EventState::Rejected {
                    rejection: Rejection::LowConfidence,
                },
                None,
            ),
            InitialRoute::AutoCreate(mut spec) => {
                spec.source_event_id = Some(id);
                let job = state.insert_job(spec, now);
                (EventState::AutoCreated { job_id: job.id }, Some(job))
            }
        };

        let raw = event.raw;
        let stored = PendingCalendarEvent {
            id,
            external_id: raw.external_id,
            calendar_id: raw.calendar_id,
            title: raw.title,
            description: raw.description,
            location: raw.location,
            start_at: raw.start_at,
            end_at: raw.end_at,
            parsed: event.parsed,
            builder_match: event.builder_match,
            confidence: event.confidence,
            state: state_value,
            created_at: now,
            updated_at: now,
        };
        state
            .events_by_external_id
            .insert(stored.external_id.clone(), id);
        state.events.insert(id, stored.clone());
        Ok(InsertedEvent { event: stored, job })
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
        let mut state = self.state.lock().await;
        let event = state
            .events
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("calendar event", id))?;
        if event.status().is_terminal() {
            return Ok(event.clone());
        }
        event.title = raw.title.clone();
        event.description = raw.description.clone();
        event.location = raw.location.clone();
        event.start_at = raw.start_at;
        event.end_at = raw.end_at;
        event.parsed = parsed.clone();
        event.builder_match = builder_match.clone();
        event.confidence = confidence;
        event.updated_at = now;
        Ok(event.clone())
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<EventPage, StoreError> {
        let state = self.state.lock().await;
        let mut matching = state
            .events
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect::<Vec<_>>();
        matching.sort_by(|a, b| a.start_at.cmp(&b.start_at).then(a.id.cmp(&b.id)));
        let total = matching.len();
        let limit = if filter.limit == 0 { total } else { filter.limit };
        let items = matching
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .collect();
        Ok(EventPage { items, total })
    }

    async fn approve_event(
        &self,
        id: Uuid,
        mut job: JobSpec,
        review: ReviewStamp,
    ) -> Result<(PendingCalendarEvent, Job), StoreError> {
        let mut state = self.state.lock().await;
        state.pending_event_mut(id)?;

        job.source_event_id = Some(id);
        let now = review.reviewed_at;
        let job = state.insert_job(job, now);
        let event = state.pending_event_mut(id)?;
        event.state = event
            .state
            .approve(job.id, review)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;
        event.updated_at = now;
        Ok((event.clone(), job))
    }

    async fn reject_event(
        &self,
        id: Uuid,
        review: ReviewStamp,
        reason: String,
    ) -> Result<PendingCalendarEvent, StoreError> {
        let mut state = self.state.lock().await;
        let event = state.pending_event_mut(id)?;
        let now = review.reviewed_at;
        event.state = event
            .state
            .reject(review, reason)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;
        event.updated_at = now;
        Ok(event.clone())
    }

    async fn append_import_log(&self, log: &CalendarImportLog) -> Result<(), StoreError> {
        self.state.lock().await.import_logs.push(log.clone());
        Ok(())
    }

    async fn list_import_logs(
        &self,
        calendar_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CalendarImportLog>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .import_logs
            .iter()
            .rev()
            .filter(|log| calendar_id.is_none_or(|c| log.calendar_id == c))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn last_successful_import(
        &self,
        calendar_id: &str,
    ) -> Result<Option<CalendarImportLog>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .import_logs
            .iter()
            .rev()
            .find(|log| log.calendar_id == calendar_id && log.error.is_none())
            .cloned())
    }
}

#[async_trait]
impl AssignmentStore for MemoryStore {
    async fn list_preferences(&self) -> Result<Vec<InspectorPreferences>, StoreError> {
        Ok(self.state.lock().await.inspectors.values().cloned().collect())
    }

    async fn get_preferences(
        &self,
        inspector_id: Uuid,
    ) -> Result<Option<InspectorPreferences>, StoreError> {
        Ok(self.state.lock().await.inspectors.get(&inspector_id).cloned())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn list_unassigned_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let state = self.state.lock().await;
        let mut jobs = state
            .jobs
            .values()
            .filter(|j| j.assignee.is_none())
            .cloned()
            .collect::<Vec<_>>();
        jobs.sort_by_key(|j| (j.scheduled_start, j.id));
        Ok(jobs)
    }

    async fn workloads_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<InspectorWorkload>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .workloads
            .values()
            .filter(|w| w.date >= from && w.date <= to)
            .cloned()
            .collect())
    }

    async fn commit_assignment(
        &self,
        commit: AssignmentCommit,
    ) -> Result<AssignmentReceipt, StoreError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get(&commit.job_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("job", commit.job_id))?;
        if job.assignee != commit.expected_assignee {
            return Err(StoreError::Conflict(format!(
                "job {} assignee changed concurrently",
                job.id
            )));
        }

        if let Some(previous) = commit.expected_assignee {
            if let Some(row) = state.workloads.get_mut(&(previous, job.scheduled_date)) {
                row.job_count = row.job_count.saturating_sub(1);
                row.scheduled_minutes = row.scheduled_minutes.saturating_sub(job.estimated_minutes);
            }
        }

        let workload = commit.new_assignee.map(|inspector_id| {
            let row = state
                .workloads
                .entry((inspector_id, job.scheduled_date))
                .or_insert_with(|| InspectorWorkload::empty(inspector_id, job.scheduled_date));
            row.job_count += 1;
            row.scheduled_minutes += job.estimated_minutes;
            if row.territory.is_none() {
                row.territory = job.territory.clone();
            }
            if job.location.is_some() {
                row.last_location = job.location;
            }
            row.clone()
        });

        let job = {
            let stored = state
                .jobs
                .get_mut(&commit.job_id)
                .ok_or_else(|| StoreError::not_found("job", commit.job_id))?;
            stored.assignee = commit.new_assignee;
            stored.needs_manual_assignment = commit.new_assignee.is_none();
            stored.clone()
        };

        let history = AssignmentHistory {
            id: Uuid::new_v4(),
            job_id: job.id,
            assignee: commit.new_assignee,
            assigned_by: commit.assigned_by,
            previous_assignee: commit.expected_assignee,
            action: commit.action,
            score: commit.score,
            recorded_at: commit.at,
        };
        state.history.push(history.clone());

        Ok(AssignmentReceipt {
            job,
            history,
            workload,
        })
    }

    async fn flag_for_manual_assignment(&self, job_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::not_found("job", job_id))?;
        job.needs_manual_assignment = true;
        Ok(())
    }

    async fn job_history(&self, job_id: Uuid) -> Result<Vec<AssignmentHistory>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .history
            .iter()
            .filter(|h| h.job_id == job_id)
            .cloned()
            .collect())
    }
}
