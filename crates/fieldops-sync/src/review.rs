//! Operator review queue over pending calendar events.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fieldops_core::{EventStatus, Job, JobType, PendingCalendarEvent, ReviewStamp};
use fieldops_storage::{EventFilter, EventPage, Store, StoreError};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::assignment::{AssignmentEngine, AssignmentOutcome};
use crate::config::PipelineConfig;
use crate::parser::extract_coordinates;
use crate::routing::build_job_spec;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("calendar event {0} not found")]
    NotFound(Uuid),
    #[error("calendar event {id} is {status}, only pending events can be reviewed")]
    InvalidState { id: Uuid, status: EventStatus },
    #[error("builder {0} does not exist")]
    UnknownBuilder(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalOutcome {
    pub event: PendingCalendarEvent,
    pub job: Job,
    pub assignment: AssignmentOutcome,
}

pub struct ReviewQueue {
    store: Arc<dyn Store>,
    engine: Arc<AssignmentEngine>,
    config: PipelineConfig,
}

impl ReviewQueue {
    pub fn new(store: Arc<dyn Store>, engine: Arc<AssignmentEngine>, config: PipelineConfig) -> Self {
        Self {
            store,
            engine,
            config,
        }
    }

    pub async fn list(&self, filter: &EventFilter) -> Result<EventPage, ReviewError> {
        Ok(self.store.list_events(filter).await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<PendingCalendarEvent, ReviewError> {
        self.store
            .get_event(id)
            .await?
            .ok_or(ReviewError::NotFound(id))
    }

    /// Creates the job from the reviewer's builder and job type, then hands it to assignment.
    /// An assignment failure does not undo the approval.
    pub async fn approve(
        &self,
        id: Uuid,
        builder_id: Uuid,
        job_type: Option<JobType>,
        reviewer: &str,
        now: DateTime<Utc>,
    ) -> Result<ApprovalOutcome, ReviewError> {
        let event = self.pending(id).await?;
        let builder = self
            .store
            .get_builder(builder_id)
            .await?
            .ok_or(ReviewError::UnknownBuilder(builder_id))?;

        let coordinates = extract_coordinates(&event.location)
            .or_else(|| extract_coordinates(&event.description));
        let spec = build_job_spec(
            &event.title,
            event.start_at,
            event.end_at,
            &event.parsed,
            &builder,
            job_type,
            coordinates,
            self.config.assignment.default_job_minutes,
        );
        let stamp = ReviewStamp {
            reviewer: reviewer.to_string(),
            reviewed_at: now,
        };
        let (event, job) = match self.store.approve_event(id, spec, stamp).await {
            Ok(resolved) => resolved,
            Err(err) => return Err(self.lost_race(id, err).await),
        };
        info!(event_id = %id, job_id = %job.id, reviewer, "event approved");

        let assignment = match self.engine.auto_assign(job.id, now).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "assignment after approval failed");
                AssignmentOutcome::Unassignable {
                    job_id: job.id,
                    reason: err.to_string(),
                }
            }
        };
        Ok(ApprovalOutcome {
            event,
            job,
            assignment,
        })
    }

    pub async fn reject(
        &self,
        id: Uuid,
        reason: &str,
        reviewer: &str,
        now: DateTime<Utc>,
    ) -> Result<PendingCalendarEvent, ReviewError> {
        self.pending(id).await?;
        let stamp = ReviewStamp {
            reviewer: reviewer.to_string(),
            reviewed_at: now,
        };
        let event = match self.store.reject_event(id, stamp, reason.to_string()).await {
            Ok(event) => event,
            Err(err) => return Err(self.lost_race(id, err).await),
        };
        info!(event_id = %id, reviewer, "event rejected");
        Ok(event)
    }

    async fn pending(&self, id: Uuid) -> Result<PendingCalendarEvent, ReviewError> {
        let event = self.get(id).await?;
        match event.status() {
            EventStatus::Pending => Ok(event),
            status => Err(ReviewError::InvalidState { id, status }),
        }
    }

    /// A conflict here means another reviewer resolved the event first.
    async fn lost_race(&self, id: Uuid, err: StoreError) -> ReviewError {
        match err {
            StoreError::Conflict(_) => match self.get(id).await {
                Ok(current) => ReviewError::InvalidState {
                    id,
                    status: current.status(),
                },
                Err(err) => err,
            },
            StoreError::NotFound { .. } => ReviewError::NotFound(id),
            other => ReviewError::Store(other),
        }
    }
}
