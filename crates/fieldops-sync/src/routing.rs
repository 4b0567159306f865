//! Routing of classified events: duplicate refresh, auto-create, review queue or discard.

use chrono::{DateTime, Utc};
use fieldops_core::{
    Builder, BuilderMatch, GeoPoint, Job, JobSpec, JobType, NewPendingEvent, ParsedCandidate,
    PendingCalendarEvent, RawCalendarEvent,
};
use fieldops_storage::{InitialRoute, Store, StoreError};
use tracing::debug;

use crate::config::{PipelineConfig, RoutingConfig};

/// Output of parse, match and score for one raw event.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedEvent {
    pub raw: RawCalendarEvent,
    pub parsed: ParsedCandidate,
    pub builder_match: BuilderMatch,
    pub confidence: u8,
    pub coordinates: Option<GeoPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    AutoCreate,
    Review,
    Reject,
}

/// High confidence without a matched builder cannot create a job, so it goes to review.
pub fn decide_route(confidence: u8, builder_matched: bool, config: &RoutingConfig) -> RouteDecision {
    if confidence >= config.high_threshold && builder_matched {
        RouteDecision::AutoCreate
    } else if confidence >= config.low_threshold {
        RouteDecision::Review
    } else {
        RouteDecision::Reject
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// The external id was already recorded. `refreshed` is true when the stored row was
    /// still pending and got the new parse.
    Duplicate {
        event: PendingCalendarEvent,
        refreshed: bool,
    },
    AutoCreated {
        event: PendingCalendarEvent,
        job: Job,
    },
    Queued {
        event: PendingCalendarEvent,
    },
    Rejected {
        event: PendingCalendarEvent,
    },
}

impl RouteOutcome {
    pub fn event(&self) -> &PendingCalendarEvent {
        match self {
            RouteOutcome::Duplicate { event, .. }
            | RouteOutcome::AutoCreated { event, .. }
            | RouteOutcome::Queued { event }
            | RouteOutcome::Rejected { event } => event,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RouteOutcome::Duplicate { .. } => "duplicate",
            RouteOutcome::AutoCreated { .. } => "auto_created",
            RouteOutcome::Queued { .. } => "pending",
            RouteOutcome::Rejected { .. } => "rejected",
        }
    }
}

/// Job fields shared by auto-create and reviewer approval.
#[allow(clippy::too_many_arguments)]
pub fn build_job_spec(
    title: &str,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    parsed: &ParsedCandidate,
    builder: &Builder,
    job_type: Option<JobType>,
    coordinates: Option<GeoPoint>,
    default_minutes: u32,
) -> JobSpec {
    let minutes = (end_at - start_at).num_minutes();
    JobSpec {
        builder_id: builder.id,
        job_type: job_type.or_else(|| parsed.job_type.as_ref().map(|j| j.job_type)),
        title: title.to_string(),
        address: parsed.address_guess.clone(),
        territory: builder.territory.clone(),
        scheduled_date: start_at.date_naive(),
        scheduled_start: start_at,
        estimated_minutes: if minutes > 0 {
            u32::try_from(minutes).unwrap_or(default_minutes)
        } else {
            default_minutes
        },
        location: coordinates,
        urgency: parsed.urgency,
        source_event_id: None,
    }
}

/// Explicit lookup-or-create for one event. The store's uniqueness constraint backs it up:
/// losing an insert race resolves to the duplicate path.
pub async fn route_event(
    store: &dyn Store,
    classified: ClassifiedEvent,
    config: &PipelineConfig,
    now: DateTime<Utc>,
) -> Result<RouteOutcome, StoreError> {
    if let Some(existing) = store
        .find_event_by_external_id(&classified.raw.external_id)
        .await?
    {
        return refresh_duplicate(store, existing, &classified, now).await;
    }

    let builder = match classified.builder_match.builder_id {
        Some(id) => store.get_builder(id).await?,
        None => None,
    };
    let decision = decide_route(classified.confidence, builder.is_some(), &config.routing);
    let route = match (decision, &builder) {
        (RouteDecision::AutoCreate, Some(builder)) => InitialRoute::AutoCreate(build_job_spec(
            &classified.raw.title,
            classified.raw.start_at,
            classified.raw.end_at,
            &classified.parsed,
            builder,
            None,
            classified.coordinates,
            config.assignment.default_job_minutes,
        )),
        (RouteDecision::Reject, _) => InitialRoute::Rejected,
        _ => InitialRoute::Pending,
    };
    debug!(
        external_id = %classified.raw.external_id,
        confidence = classified.confidence,
        ?decision,
        "routing event"
    );

    let new_event = NewPendingEvent {
        raw: classified.raw.clone(),
        parsed: classified.parsed.clone(),
        builder_match: classified.builder_match.clone(),
        confidence: classified.confidence,
    };
    match store.insert_event(new_event, route, now).await {
        Ok(inserted) => Ok(match inserted.job {
            Some(job) => RouteOutcome::AutoCreated {
                event: inserted.event,
                job,
            },
            None if inserted.event.status().is_terminal() => RouteOutcome::Rejected {
                event: inserted.event,
            },
            None => RouteOutcome::Queued {
                event: inserted.event,
            },
        }),
        Err(StoreError::DuplicateExternalId(external_id)) => {
            let existing = store
                .find_event_by_external_id(&external_id)
                .await?
                .ok_or_else(|| StoreError::not_found("calendar event", &external_id))?;
            refresh_duplicate(store, existing, &classified, now).await
        }
        Err(err) => Err(err),
    }
}

async fn refresh_duplicate(
    store: &dyn Store,
    existing: PendingCalendarEvent,
    classified: &ClassifiedEvent,
    now: DateTime<Utc>,
) -> Result<RouteOutcome, StoreError> {
    if existing.status().is_terminal() {
        return Ok(RouteOutcome::Duplicate {
            event: existing,
            refreshed: false,
        });
    }
    let event = store
        .refresh_pending_event(
            existing.id,
            &classified.raw,
            &classified.parsed,
            &classified.builder_match,
            classified.confidence,
            now,
        )
        .await?;
    Ok(RouteOutcome::Duplicate {
        event,
        refreshed: true,
    })
}
