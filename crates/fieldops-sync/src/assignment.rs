//! Inspector selection and assignment commits.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use fieldops_core::{
    AssignmentAction, GeoPoint, InspectorPreferences, InspectorWorkload, Job, WorkloadLevel,
};
use fieldops_storage::{AssignmentCommit, AssignmentReceipt, Store, StoreError};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AssignmentConfig;

const EARTH_RADIUS_KM: f64 = 6371.0;

pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Monday through Sunday of the week containing `date`.
pub fn week_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
    (monday, monday + Duration::days(6))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateScore {
    pub inspector_id: Uuid,
    pub display_name: String,
    pub score: f64,
    pub job_count: u32,
    pub level: WorkloadLevel,
    pub distance_km: Option<f64>,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
}

impl CandidateScore {
    /// Best first: score, then lighter day, then older preference record.
    fn rank(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.job_count.cmp(&other.job_count))
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.inspector_id.cmp(&other.inspector_id))
    }
}

fn reaches_job(prefs: &InspectorPreferences, job: &Job) -> bool {
    if job
        .territory
        .as_deref()
        .is_some_and(|t| prefs.covers_territory(t))
    {
        return true;
    }
    match (prefs.home_base, prefs.travel_radius_km, job.location) {
        (Some(home), Some(radius), Some(site)) => haversine_km(home, site) <= radius,
        _ => false,
    }
}

/// Eligible inspectors for `job`, best first. `workloads` should cover the job's whole week.
pub fn rank_candidates(
    job: &Job,
    inspectors: &[InspectorPreferences],
    workloads: &[InspectorWorkload],
    config: &AssignmentConfig,
) -> Vec<CandidateScore> {
    let mut weekly: HashMap<Uuid, u32> = HashMap::new();
    let mut daily: HashMap<Uuid, &InspectorWorkload> = HashMap::new();
    for row in workloads {
        *weekly.entry(row.inspector_id).or_default() += row.job_count;
        if row.date == job.scheduled_date {
            daily.insert(row.inspector_id, row);
        }
    }

    let mut ranked = inspectors
        .iter()
        .filter(|p| p.auto_assign_enabled)
        .filter(|p| p.works_on(job.scheduled_date.weekday()))
        .filter(|p| {
            let cap = p.max_weekly_jobs.unwrap_or(config.default_weekly_capacity);
            weekly.get(&p.inspector_id).copied().unwrap_or_default() < cap
        })
        .filter(|p| reaches_job(p, job))
        .filter_map(|p| {
            let today = daily.get(&p.inspector_id).copied();
            let job_count = today.map(|w| w.job_count).unwrap_or_default();
            let capacity = p.max_daily_jobs.unwrap_or(config.default_daily_capacity);
            let level = WorkloadLevel::classify(job_count, capacity);
            let penalty = match level {
                WorkloadLevel::Light => 0.0,
                WorkloadLevel::Moderate => config.moderate_penalty,
                WorkloadLevel::Heavy => config.heavy_penalty,
                WorkloadLevel::Overbooked => config.overbooked_penalty,
            };
            // A workload penalty that uses up the whole baseline disqualifies on its own.
            let baseline = 100.0 - penalty;
            if baseline <= 0.0 {
                return None;
            }

            let origin = today.and_then(|w| w.last_location).or(p.home_base);
            let distance_km = origin.zip(job.location).map(|(o, s)| haversine_km(o, s));
            let bonus = if job.job_type.is_some_and(|t| p.specializations.contains(&t)) {
                config.specialization_bonus
            } else {
                0.0
            };
            let score = baseline - config.distance_coefficient * distance_km.unwrap_or(0.0) + bonus;
            (score > 0.0).then(|| CandidateScore {
                inspector_id: p.inspector_id,
                display_name: p.display_name.clone(),
                score,
                job_count,
                level,
                distance_km,
                created_at: p.created_at,
            })
        })
        .collect::<Vec<_>>();
    ranked.sort_by(|a, b| a.rank(b));
    ranked
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentOutcome {
    Assigned {
        receipt: AssignmentReceipt,
        candidate: CandidateScore,
    },
    /// Left for a dispatcher. Not an error.
    Unassignable { job_id: Uuid, reason: String },
}

impl AssignmentOutcome {
    pub fn is_assigned(&self) -> bool {
        matches!(self, AssignmentOutcome::Assigned { .. })
    }
}

#[derive(Debug, Error)]
pub enum AssignmentError {
    #[error("job {0} not found")]
    JobNotFound(Uuid),
    #[error("inspector {0} not found")]
    InspectorNotFound(Uuid),
    #[error("job {job_id} is already assigned to {assignee}")]
    AlreadyAssigned { job_id: Uuid, assignee: Uuid },
    #[error("job {0} has no assignee")]
    NotAssigned(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Selection and commit for one process. The gate serializes callers so each selection sees
/// the workload left by the previous commit.
pub struct AssignmentEngine {
    store: Arc<dyn Store>,
    config: AssignmentConfig,
    gate: Mutex<()>,
}

impl AssignmentEngine {
    pub fn new(store: Arc<dyn Store>, config: AssignmentConfig) -> Self {
        Self {
            store,
            config,
            gate: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &AssignmentConfig {
        &self.config
    }

    pub async fn auto_assign(
        &self,
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AssignmentOutcome, AssignmentError> {
        let _gate = self.gate.lock().await;
        let job = self.load_job(job_id).await?;
        if let Some(assignee) = job.assignee {
            return Err(AssignmentError::AlreadyAssigned { job_id, assignee });
        }

        let inspectors = self.store.list_preferences().await?;
        let (from, to) = week_bounds(job.scheduled_date);
        let workloads = self.store.workloads_between(from, to).await?;
        let ranked = rank_candidates(&job, &inspectors, &workloads, &self.config);

        let Some(best) = ranked.into_iter().next() else {
            let reason = if job.territory.is_none() && job.location.is_none() {
                "job has neither territory nor location".to_string()
            } else {
                format!(
                    "no eligible inspector for territory {}",
                    job.territory.as_deref().unwrap_or("-")
                )
            };
            self.store.flag_for_manual_assignment(job_id).await?;
            warn!(%job_id, reason = %reason, "job left unassigned");
            return Ok(AssignmentOutcome::Unassignable { job_id, reason });
        };

        let receipt = self
            .store
            .commit_assignment(AssignmentCommit {
                job_id,
                expected_assignee: None,
                new_assignee: Some(best.inspector_id),
                action: AssignmentAction::AutoAssigned,
                assigned_by: None,
                score: Some(best.score),
                at: now,
            })
            .await?;
        info!(
            %job_id,
            inspector_id = %best.inspector_id,
            score = best.score,
            level = best.level.as_str(),
            "job auto-assigned"
        );
        Ok(AssignmentOutcome::Assigned {
            receipt,
            candidate: best,
        })
    }

    /// Dispatcher override. Skips eligibility filters.
    pub async fn assign_manually(
        &self,
        job_id: Uuid,
        inspector_id: Uuid,
        assigned_by: &str,
        now: DateTime<Utc>,
    ) -> Result<AssignmentReceipt, AssignmentError> {
        let _gate = self.gate.lock().await;
        let job = self.load_job(job_id).await?;
        if self.store.get_preferences(inspector_id).await?.is_none() {
            return Err(AssignmentError::InspectorNotFound(inspector_id));
        }
        if job.assignee == Some(inspector_id) {
            return Err(AssignmentError::AlreadyAssigned {
                job_id,
                assignee: inspector_id,
            });
        }
        let action = if job.assignee.is_some() {
            AssignmentAction::Reassigned
        } else {
            AssignmentAction::Assigned
        };
        let receipt = self
            .store
            .commit_assignment(AssignmentCommit {
                job_id,
                expected_assignee: job.assignee,
                new_assignee: Some(inspector_id),
                action,
                assigned_by: Some(assigned_by.to_string()),
                score: None,
                at: now,
            })
            .await?;
        info!(%job_id, %inspector_id, action = action.as_str(), assigned_by, "job assigned manually");
        Ok(receipt)
    }

    pub async fn unassign(
        &self,
        job_id: Uuid,
        by: &str,
        now: DateTime<Utc>,
    ) -> Result<AssignmentReceipt, AssignmentError> {
        let _gate = self.gate.lock().await;
        let job = self.load_job(job_id).await?;
        if job.assignee.is_none() {
            return Err(AssignmentError::NotAssigned(job_id));
        }
        let receipt = self
            .store
            .commit_assignment(AssignmentCommit {
                job_id,
                expected_assignee: job.assignee,
                new_assignee: None,
                action: AssignmentAction::Unassigned,
                assigned_by: Some(by.to_string()),
                score: None,
                at: now,
            })
            .await?;
        info!(%job_id, by, "job unassigned");
        Ok(receipt)
    }

    async fn load_job(&self, job_id: Uuid) -> Result<Job, AssignmentError> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(AssignmentError::JobNotFound(job_id))
    }
}
