//! Core domain model for the fieldops calendar ingestion and assignment pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "fieldops-core";

/// Inspection kinds a calendar event can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    PreDrywall,
    Rough,
    RoughDuct,
    Final,
    BlowerDoor,
    DuctLeakage,
    Insulation,
}

impl JobType {
    pub const ALL: [JobType; 7] = [
        JobType::PreDrywall,
        JobType::Rough,
        JobType::RoughDuct,
        JobType::Final,
        JobType::BlowerDoor,
        JobType::DuctLeakage,
        JobType::Insulation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::PreDrywall => "pre_drywall",
            JobType::Rough => "rough",
            JobType::RoughDuct => "rough_duct",
            JobType::Final => "final",
            JobType::BlowerDoor => "blower_door",
            JobType::DuctLeakage => "duct_leakage",
            JobType::Insulation => "insulation",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobType::PreDrywall => "pre-drywall",
            JobType::Rough => "rough",
            JobType::RoughDuct => "rough duct",
            JobType::Final => "final",
            JobType::BlowerDoor => "blower door",
            JobType::DuctLeakage => "duct leakage",
            JobType::Insulation => "insulation",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job type: {0}")]
pub struct UnknownJobType(pub String);

impl FromStr for JobType {
    type Err = UnknownJobType;

    /// Accepts both the stored form (`rough_duct`) and the label form (`Rough Duct`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s
            .trim()
            .to_ascii_lowercase()
            .replace(['-', ' '], "_");
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == key)
            .ok_or_else(|| UnknownJobType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl UrgencyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyLevel::Low => "low",
            UrgencyLevel::Medium => "medium",
            UrgencyLevel::High => "high",
            UrgencyLevel::Urgent => "urgent",
        }
    }
}

impl FromStr for UrgencyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(UrgencyLevel::Low),
            "medium" => Ok(UrgencyLevel::Medium),
            "high" => Ok(UrgencyLevel::High),
            "urgent" => Ok(UrgencyLevel::Urgent),
            other => Err(format!("unknown urgency level: {other}")),
        }
    }
}

/// WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Event as handed over by a calendar source. Ephemeral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCalendarEvent {
    pub external_id: String,
    pub calendar_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTypeQuality {
    /// Multi-word or unambiguous phrase ("rough duct", "blower door").
    Specific,
    /// Single generic word ("rough", "final", "duct").
    Generic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTypeGuess {
    pub job_type: JobType,
    pub keyword: String,
    pub quality: JobTypeQuality,
}

/// Structured candidates extracted from one event's free text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParsedCandidate {
    pub builder_guess: Option<String>,
    pub job_type: Option<JobTypeGuess>,
    pub address_guess: Option<String>,
    pub urgency: UrgencyLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    Partial,
    Fuzzy,
    #[default]
    None,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Exact => "exact",
            MatchMethod::Partial => "partial",
            MatchMethod::Fuzzy => "fuzzy",
            MatchMethod::None => "none",
        }
    }
}

impl FromStr for MatchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(MatchMethod::Exact),
            "partial" => Ok(MatchMethod::Partial),
            "fuzzy" => Ok(MatchMethod::Fuzzy),
            "none" => Ok(MatchMethod::None),
            other => Err(format!("unknown match method: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuilderMatch {
    pub builder_id: Option<Uuid>,
    /// 0..=100
    pub score: u8,
    pub abbreviation: Option<String>,
    pub method: MatchMethod,
}

impl BuilderMatch {
    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Approved,
    Rejected,
    AutoCreated,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Approved => "approved",
            EventStatus::Rejected => "rejected",
            EventStatus::AutoCreated => "auto_created",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventStatus::Pending)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "approved" => Ok(EventStatus::Approved),
            "rejected" => Ok(EventStatus::Rejected),
            "auto_created" => Ok(EventStatus::AutoCreated),
            other => Err(format!("unknown event status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewStamp {
    pub reviewer: String,
    pub reviewed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    /// Routed straight to `rejected` by the pipeline.
    LowConfidence,
    Reviewer { review: ReviewStamp, reason: String },
}

/// Lifecycle of a pending calendar event. Each variant carries what that state owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EventState {
    Pending,
    AutoCreated { job_id: Uuid },
    Approved { job_id: Uuid, review: ReviewStamp },
    Rejected { rejection: Rejection },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {action} an event in state {from}")]
pub struct TransitionError {
    pub from: EventStatus,
    pub action: &'static str,
}

impl EventState {
    pub fn status(&self) -> EventStatus {
        match self {
            EventState::Pending => EventStatus::Pending,
            EventState::AutoCreated { .. } => EventStatus::AutoCreated,
            EventState::Approved { .. } => EventStatus::Approved,
            EventState::Rejected { .. } => EventStatus::Rejected,
        }
    }

    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            EventState::AutoCreated { job_id } | EventState::Approved { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }

    pub fn review(&self) -> Option<&ReviewStamp> {
        match self {
            EventState::Approved { review, .. } => Some(review),
            EventState::Rejected {
                rejection: Rejection::Reviewer { review, .. },
            } => Some(review),
            _ => None,
        }
    }

    pub fn approve(&self, job_id: Uuid, review: ReviewStamp) -> Result<EventState, TransitionError> {
        match self {
            EventState::Pending => Ok(EventState::Approved { job_id, review }),
            other => Err(TransitionError {
                from: other.status(),
                action: "approve",
            }),
        }
    }

    pub fn reject(&self, review: ReviewStamp, reason: String) -> Result<EventState, TransitionError> {
        match self {
            EventState::Pending => Ok(EventState::Rejected {
                rejection: Rejection::Reviewer { review, reason },
            }),
            other => Err(TransitionError {
                from: other.status(),
                action: "reject",
            }),
        }
    }
}

/// Persisted classification record, one per external event id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCalendarEvent {
    pub id: Uuid,
    pub external_id: String,
    pub calendar_id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub parsed: ParsedCandidate,
    pub builder_match: BuilderMatch,
    pub confidence: u8,
    pub state: EventState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingCalendarEvent {
    pub fn status(&self) -> EventStatus {
        self.state.status()
    }
}

/// Insert payload for a freshly classified event.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPendingEvent {
    pub raw: RawCalendarEvent,
    pub parsed: ParsedCandidate,
    pub builder_match: BuilderMatch,
    pub confidence: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Builder {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub territory: Option<String>,
    #[serde(default)]
    pub total_jobs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderAbbreviation {
    pub builder_id: Uuid,
    pub abbreviation: String,
    #[serde(default)]
    pub is_primary: bool,
}

/// What the pipeline hands to the job sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub builder_id: Uuid,
    pub job_type: Option<JobType>,
    pub title: String,
    pub address: Option<String>,
    pub territory: Option<String>,
    pub scheduled_date: NaiveDate,
    pub scheduled_start: DateTime<Utc>,
    pub estimated_minutes: u32,
    pub location: Option<GeoPoint>,
    pub urgency: UrgencyLevel,
    pub source_event_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub builder_id: Uuid,
    pub job_type: Option<JobType>,
    pub title: String,
    pub address: Option<String>,
    pub territory: Option<String>,
    pub scheduled_date: NaiveDate,
    pub scheduled_start: DateTime<Utc>,
    pub estimated_minutes: u32,
    pub location: Option<GeoPoint>,
    pub urgency: UrgencyLevel,
    pub source_event_id: Option<Uuid>,
    pub assignee: Option<Uuid>,
    pub needs_manual_assignment: bool,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn from_spec(id: Uuid, spec: JobSpec, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            builder_id: spec.builder_id,
            job_type: spec.job_type,
            title: spec.title,
            address: spec.address,
            territory: spec.territory,
            scheduled_date: spec.scheduled_date,
            scheduled_start: spec.scheduled_start,
            estimated_minutes: spec.estimated_minutes,
            location: spec.location,
            urgency: spec.urgency,
            source_event_id: spec.source_event_id,
            assignee: None,
            needs_manual_assignment: false,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadLevel {
    Light,
    Moderate,
    Heavy,
    Overbooked,
}

impl WorkloadLevel {
    /// Buckets a day's job count against the inspector's daily capacity.
    pub fn classify(job_count: u32, daily_capacity: u32) -> Self {
        if daily_capacity == 0 {
            return if job_count == 0 {
                WorkloadLevel::Light
            } else {
                WorkloadLevel::Overbooked
            };
        }
        let ratio = job_count as f64 / daily_capacity as f64;
        if ratio >= 1.0 {
            WorkloadLevel::Overbooked
        } else if ratio >= 0.75 {
            WorkloadLevel::Heavy
        } else if ratio >= 0.5 {
            WorkloadLevel::Moderate
        } else {
            WorkloadLevel::Light
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadLevel::Light => "light",
            WorkloadLevel::Moderate => "moderate",
            WorkloadLevel::Heavy => "heavy",
            WorkloadLevel::Overbooked => "overbooked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectorWorkload {
    pub inspector_id: Uuid,
    pub date: NaiveDate,
    pub job_count: u32,
    pub scheduled_minutes: u32,
    pub territory: Option<String>,
    pub last_location: Option<GeoPoint>,
}

impl InspectorWorkload {
    pub fn empty(inspector_id: Uuid, date: NaiveDate) -> Self {
        Self {
            inspector_id,
            date,
            job_count: 0,
            scheduled_minutes: 0,
            territory: None,
            last_location: None,
        }
    }

    pub fn level(&self, daily_capacity: u32) -> WorkloadLevel {
        WorkloadLevel::classify(self.job_count, daily_capacity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentAction {
    AutoAssigned,
    Assigned,
    Reassigned,
    Unassigned,
}

impl AssignmentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentAction::AutoAssigned => "auto_assigned",
            AssignmentAction::Assigned => "assigned",
            AssignmentAction::Reassigned => "reassigned",
            AssignmentAction::Unassigned => "unassigned",
        }
    }
}

impl FromStr for AssignmentAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto_assigned" => Ok(AssignmentAction::AutoAssigned),
            "assigned" => Ok(AssignmentAction::Assigned),
            "reassigned" => Ok(AssignmentAction::Reassigned),
            "unassigned" => Ok(AssignmentAction::Unassigned),
            other => Err(format!("unknown assignment action: {other}")),
        }
    }
}

/// Append-only audit row for every assignment change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentHistory {
    pub id: Uuid,
    pub job_id: Uuid,
    pub assignee: Option<Uuid>,
    pub assigned_by: Option<String>,
    pub previous_assignee: Option<Uuid>,
    pub action: AssignmentAction,
    pub score: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectorPreferences {
    pub inspector_id: Uuid,
    pub display_name: String,
    #[serde(default)]
    pub preferred_territories: Vec<String>,
    #[serde(default)]
    pub max_daily_jobs: Option<u32>,
    #[serde(default)]
    pub max_weekly_jobs: Option<u32>,
    /// Empty means every weekday.
    #[serde(default)]
    pub working_days: Vec<Weekday>,
    #[serde(default)]
    pub specializations: Vec<JobType>,
    #[serde(default)]
    pub travel_radius_km: Option<f64>,
    #[serde(default)]
    pub home_base: Option<GeoPoint>,
    #[serde(default)]
    pub auto_assign_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl InspectorPreferences {
    pub fn works_on(&self, day: Weekday) -> bool {
        self.working_days.is_empty() || self.working_days.contains(&day)
    }

    pub fn covers_territory(&self, territory: &str) -> bool {
        self.preferred_territories
            .iter()
            .any(|t| t.eq_ignore_ascii_case(territory.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImportCounters {
    pub events_processed: u32,
    pub jobs_created: u32,
    pub events_queued: u32,
    pub events_rejected: u32,
    pub duplicates: u32,
    pub events_errored: u32,
    pub jobs_assigned: u32,
    pub jobs_unassigned: u32,
}

/// One row per batch run. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarImportLog {
    pub id: Uuid,
    pub run_id: Uuid,
    pub calendar_id: String,
    pub calendar_name: Option<String>,
    pub run_at: DateTime<Utc>,
    pub counters: ImportCounters,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp() -> ReviewStamp {
        ReviewStamp {
            reviewer: "dana".into(),
            reviewed_at: Utc::now(),
        }
    }

    #[test]
    fn only_pending_events_can_be_resolved() {
        let job_id = Uuid::new_v4();
        let approved = EventState::Pending.approve(job_id, stamp()).unwrap();
        assert_eq!(approved.status(), EventStatus::Approved);
        assert_eq!(approved.job_id(), Some(job_id));

        let err = approved.reject(stamp(), "dup".into()).unwrap_err();
        assert_eq!(err.from, EventStatus::Approved);

        let auto = EventState::AutoCreated { job_id };
        assert!(auto.approve(Uuid::new_v4(), stamp()).is_err());
        let low = EventState::Rejected {
            rejection: Rejection::LowConfidence,
        };
        assert!(low.reject(stamp(), "again".into()).is_err());
    }

    #[test]
    fn workload_levels_bucket_by_capacity() {
        assert_eq!(WorkloadLevel::classify(0, 4), WorkloadLevel::Light);
        assert_eq!(WorkloadLevel::classify(1, 4), WorkloadLevel::Light);
        assert_eq!(WorkloadLevel::classify(2, 4), WorkloadLevel::Moderate);
        assert_eq!(WorkloadLevel::classify(3, 4), WorkloadLevel::Heavy);
        assert_eq!(WorkloadLevel::classify(4, 4), WorkloadLevel::Overbooked);
        assert_eq!(WorkloadLevel::classify(1, 0), WorkloadLevel::Overbooked);
    }

    #[test]
    fn job_type_parses_label_and_stored_forms() {
        assert_eq!("rough_duct".parse::<JobType>().unwrap(), JobType::RoughDuct);
        assert_eq!("Blower Door".parse::<JobType>().unwrap(), JobType::BlowerDoor);
        assert_eq!("pre-drywall".parse::<JobType>().unwrap(), JobType::PreDrywall);
        assert!("roof".parse::<JobType>().is_err());
    }

    #[test]
    fn event_state_serializes_with_status_tag() {
        let state = EventState::AutoCreated { job_id: Uuid::nil() };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "auto_created");
    }
}
