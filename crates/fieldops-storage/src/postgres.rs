use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc, Weekday};
use fieldops_core::{
    AssignmentHistory, Builder, BuilderAbbreviation, BuilderMatch, CalendarImportLog, EventState,
    EventStatus, GeoPoint, ImportCounters, InspectorPreferences, InspectorWorkload, Job, JobSpec,
    JobType, NewPendingEvent, ParsedCandidate, PendingCalendarEvent, RawCalendarEvent, Rejection,
    ReviewStamp,
};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::{
    AssignmentCommit, AssignmentReceipt, AssignmentStore, BuilderDirectory, EventFilter,
    EventPage, EventStore, InitialRoute, InsertedEvent, JobSink, SeedData, StoreError,
};

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

const EVENT_COLUMNS: &str = r#"
    id, external_id, calendar_id, title, description, location, start_at, end_at,
    parsed_json, builder_id, match_score, matched_abbreviation, match_method, confidence,
    status, job_id, reviewed_by, reviewed_at, rejection_reason, created_at, updated_at
"#;

const JOB_COLUMNS: &str = r#"
    id, builder_id, job_type, title, address, territory, scheduled_date, scheduled_start,
    estimated_minutes, location_lat, location_lon, urgency, source_event_id, assignee,
    needs_manual_assignment, created_at
"#;

const WORKLOAD_COLUMNS: &str =
    "inspector_id, work_date, job_count, scheduled_minutes, territory, last_lat, last_lon";

/// Postgres-backed store. Multi-row units of work run inside one transaction.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))
    }

    /// Upserts reference data (builders, abbreviations, inspector preferences).
    pub async fn apply_seed(&self, seed: &SeedData) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for builder in &seed.builders {
            sqlx::query(
                r#"
                INSERT INTO builders (id, name, territory, total_jobs)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (id) DO UPDATE
                   SET name = EXCLUDED.name,
                       territory = EXCLUDED.territory,
                       total_jobs = EXCLUDED.total_jobs
                "#,
            )
            .bind(builder.id)
            .bind(&builder.name)
            .bind(&builder.territory)
            .bind(to_i32(builder.total_jobs))
            .execute(&mut *tx)
            .await?;
        }
        for abbr in &seed.abbreviations {
            sqlx::query(
                r#"
                INSERT INTO builder_abbreviations (builder_id, abbreviation, is_primary)
                VALUES ($1, $2, $3)
                ON CONFLICT (builder_id, abbreviation) DO UPDATE SET is_primary = EXCLUDED.is_primary
                "#,
            )
            .bind(abbr.builder_id)
            .bind(&abbr.abbreviation)
            .bind(abbr.is_primary)
            .execute(&mut *tx)
            .await?;
        }
        for prefs in &seed.inspectors {
            let days: Vec<String> = prefs.working_days.iter().map(|d| d.to_string()).collect();
            let specs: Vec<&str> = prefs.specializations.iter().map(|s| s.as_str()).collect();
            sqlx::query(
                r#"
                INSERT INTO inspector_preferences (
                    inspector_id, display_name, preferred_territories, max_daily_jobs,
                    max_weekly_jobs, working_days, specializations, travel_radius_km,
                    home_lat, home_lon, auto_assign_enabled, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (inspector_id) DO UPDATE
                   SET display_name = EXCLUDED.display_name,
                       preferred_territories = EXCLUDED.preferred_territories,
                       max_daily_jobs = EXCLUDED.max_daily_jobs,
                       max_weekly_jobs = EXCLUDED.max_weekly_jobs,
                       working_days = EXCLUDED.working_days,
                       specializations = EXCLUDED.specializations,
                       travel_radius_km = EXCLUDED.travel_radius_km,
                       home_lat = EXCLUDED.home_lat,
                       home_lon = EXCLUDED.home_lon,
                       auto_assign_enabled = EXCLUDED.auto_assign_enabled
                "#,
            )
            .bind(prefs.inspector_id)
            .bind(&prefs.display_name)
            .bind(&prefs.preferred_territories)
            .bind(prefs.max_daily_jobs.map(to_i32))
            .bind(prefs.max_weekly_jobs.map(to_i32))
            .bind(&days)
            .bind(&specs)
            .bind(prefs.travel_radius_km)
            .bind(prefs.home_base.map(|g| g.lat))
            .bind(prefs.home_base.map(|g| g.lon))
            .bind(prefs.auto_assign_enabled)
            .bind(prefs.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_event(&self, id: Uuid) -> Result<Option<PendingCalendarEvent>, StoreError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM pending_calendar_events WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(event_from_row).transpose()
    }

    /// Locks the event row and checks it is still pending.
    async fn lock_pending(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<(), StoreError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM pending_calendar_events WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?;
        match status.as_deref() {
            None => Err(StoreError::not_found("calendar event", id)),
            Some("pending") => Ok(()),
            Some(other) => Err(StoreError::Conflict(format!(
                "event {id} is {other}, not pending"
            ))),
        }
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn geo(lat: Option<f64>, lon: Option<f64>) -> Option<GeoPoint> {
    match (lat, lon) {
        (Some(lat), Some(lon)) => Some(GeoPoint { lat, lon }),
        _ => None,
    }
}

fn corrupt(err: impl ToString) -> StoreError {
    StoreError::Corrupt(err.to_string())
}

fn event_from_row(row: &PgRow) -> Result<PendingCalendarEvent, StoreError> {
    let status: EventStatus = row.try_get::<String, _>("status")?.parse().map_err(corrupt)?;
    let job_id: Option<Uuid> = row.try_get("job_id")?;
    let reviewed_by: Option<String> = row.try_get("reviewed_by")?;
    let reviewed_at: Option<DateTime<Utc>> = row.try_get("reviewed_at")?;
    let review = match (reviewed_by, reviewed_at) {
        (Some(reviewer), Some(reviewed_at)) => Some(ReviewStamp {
            reviewer,
            reviewed_at,
        }),
        _ => None,
    };

    let state = match status {
        EventStatus::Pending => EventState::Pending,
        EventStatus::AutoCreated => EventState::AutoCreated {
            job_id: job_id.ok_or_else(|| corrupt("auto_created event without job"))?,
        },
        EventStatus::Approved => EventState::Approved {
            job_id: job_id.ok_or_else(|| corrupt("approved event without job"))?,
            review: review.ok_or_else(|| corrupt("approved event without reviewer"))?,
        },
        EventStatus::Rejected => EventState::Rejected {
            rejection: match review {
                Some(review) => Rejection::Reviewer {
                    review,
                    reason: row
                        .try_get::<Option<String>, _>("rejection_reason")?
                        .unwrap_or_default(),
                },
                None => Rejection::LowConfidence,
            },
        },
    };

    let Json(parsed): Json<ParsedCandidate> = row.try_get("parsed_json")?;
    let method: String = row.try_get("match_method")?;
    let match_score: i16 = row.try_get("match_score")?;
    let confidence: i16 = row.try_get("confidence")?;

    Ok(PendingCalendarEvent {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        calendar_id: row.try_get("calendar_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        location: row.try_get("location")?,
        start_at: row.try_get("start_at")?,
        end_at: row.try_get("end_at")?,
        parsed,
        builder_match: BuilderMatch {
            builder_id: row.try_get("builder_id")?,
            score: match_score.clamp(0, 100) as u8,
            abbreviation: row.try_get("matched_abbreviation")?,
            method: method.parse().map_err(corrupt)?,
        },
        confidence: confidence.clamp(0, 100) as u8,
        state,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let job_type = row
        .try_get::<Option<String>, _>("job_type")?
        .map(|s| s.parse::<JobType>())
        .transpose()
        .map_err(corrupt)?;
    Ok(Job {
        id: row.try_get("id")?,
        builder_id: row.try_get("builder_id")?,
        job_type,
        title: row.try_get("title")?,
        address: row.try_get("address")?,
        territory: row.try_get("territory")?,
        scheduled_date: row.try_get("scheduled_date")?,
        scheduled_start: row.try_get("scheduled_start")?,
        estimated_minutes: to_u32(row.try_get("estimated_minutes")?),
        location: geo(row.try_get("location_lat")?, row.try_get("location_lon")?),
        urgency: row
            .try_get::<String, _>("urgency")?
            .parse()
            .map_err(corrupt)?,
        source_event_id: row.try_get("source_event_id")?,
        assignee: row.try_get("assignee")?,
        needs_manual_assignment: row.try_get("needs_manual_assignment")?,
        created_at: row.try_get("created_at")?,
    })
}

fn workload_from_row(row: &PgRow) -> Result<InspectorWorkload, StoreError> {
    Ok(InspectorWorkload {
        inspector_id: row.try_get("inspector_id")?,
        date: row.try_get("work_date")?,
        job_count: to_u32(row.try_get("job_count")?),
        scheduled_minutes: to_u32(row.try_get("scheduled_minutes")?),
        territory: row.try_get("territory")?,
        last_location: geo(row.try_get("last_lat")?, row.try_get("last_lon")?),
    })
}

fn preferences_from_row(row: &PgRow) -> Result<InspectorPreferences, StoreError> {
    let working_days = row
        .try_get::<Vec<String>, _>("working_days")?
        .iter()
        .map(|d| d.parse::<Weekday>().map_err(|_| corrupt(format!("bad weekday {d}"))))
        .collect::<Result<Vec<_>, _>>()?;
    let specializations = row
        .try_get::<Vec<String>, _>("specializations")?
        .iter()
        .map(|s| s.parse::<JobType>().map_err(corrupt))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(InspectorPreferences {
        inspector_id: row.try_get("inspector_id")?,
        display_name: row.try_get("display_name")?,
        preferred_territories: row.try_get("preferred_territories")?,
        max_daily_jobs: row.try_get::<Option<i32>, _>("max_daily_jobs")?.map(to_u32),
        max_weekly_jobs: row.try_get::<Option<i32>, _>("max_weekly_jobs")?.map(to_u32),
        working_days,
        specializations,
        travel_radius_km: row.try_get("travel_radius_km")?,
        home_base: geo(row.try_get("home_lat")?, row.try_get("home_lon")?),
        auto_assign_enabled: row.try_get("auto_assign_enabled")?,
        created_at: row.try_get("created_at")?,
    })
}

fn import_log_from_row(row: &PgRow) -> Result<CalendarImportLog, StoreError> {
    let count = |name: &str| -> Result<u32, StoreError> { Ok(to_u32(row.try_get(name)?)) };
    Ok(CalendarImportLog {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        calendar_id: row.try_get("calendar_id")?,
        calendar_name: row.try_get("calendar_name")?,
        run_at: row.try_get("run_at")?,
        counters: ImportCounters {
            events_processed: count("events_processed")?,
            jobs_created: count("jobs_created")?,
            events_queued: count("events_queued")?,
            events_rejected: count("events_rejected")?,
            duplicates: count("duplicates")?,
            events_errored: count("events_errored")?,
            jobs_assigned: count("jobs_assigned")?,
            jobs_unassigned: count("jobs_unassigned")?,
        },
        error: row.try_get("error")?,
    })
}

async fn insert_job(
    tx: &mut Transaction<'_, Postgres>,
    spec: JobSpec,
    now: DateTime<Utc>,
) -> Result<Job, StoreError> {
    let job = Job::from_spec(Uuid::new_v4(), spec, now);
    sqlx::query(
        r#"
        INSERT INTO jobs (
            id, builder_id, job_type, title, address, territory, scheduled_date,
            scheduled_start, estimated_minutes, location_lat, location_lon, urgency,
            source_event_id, assignee, needs_manual_assignment, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NULL, FALSE, $14)
        "#,
    )
    .bind(job.id)
    .bind(job.builder_id)
    .bind(job.job_type.map(|t| t.as_str()))
    .bind(&job.title)
    .bind(&job.address)
    .bind(&job.territory)
    .bind(job.scheduled_date)
    .bind(job.scheduled_start)
    .bind(to_i32(job.estimated_minutes))
    .bind(job.location.map(|g| g.lat))
    .bind(job.location.map(|g| g.lon))
    .bind(job.urgency.as_str())
    .bind(job.source_event_id)
    .bind(job.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(job)
}

#[async_trait]
impl BuilderDirectory for PgStore {
    async fn list_abbreviations(&self) -> Result<Vec<BuilderAbbreviation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT builder_id, abbreviation, is_primary
              FROM builder_abbreviations
             ORDER BY abbreviation, builder_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(BuilderAbbreviation {
                    builder_id: row.try_get("builder_id")?,
                    abbreviation: row.try_get("abbreviation")?,
                    is_primary: row.try_get("is_primary")?,
                })
            })
            .collect()
    }

    async fn list_builders(&self) -> Result<Vec<Builder>, StoreError> {
        let rows = sqlx::query("SELECT id, name, territory, total_jobs FROM builders ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Builder {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    territory: row.try_get("territory")?,
                    total_jobs: to_u32(row.try_get("total_jobs")?),
                })
            })
            .collect()
    }

    async fn get_builder(&self, id: Uuid) -> Result<Option<Builder>, StoreError> {
        let row = sqlx::query("SELECT id, name, territory, total_jobs FROM builders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(Builder {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                territory: row.try_get("territory")?,
                total_jobs: to_u32(row.try_get("total_jobs")?),
            })
        })
        .transpose()
    }
}

#[async_trait]
impl JobSink for PgStore {
    async fn create_job(&self, spec: JobSpec) -> Result<Uuid, StoreError> {
        let mut tx = self.pool.begin().await?;
        let job = insert_job(&mut tx, spec, Utc::now()).await?;
        tx.commit().await?;
        Ok(job.id)
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn find_event_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<PendingCalendarEvent>, StoreError> {
        let sql =
            format!("SELECT {EVENT_COLUMNS} FROM pending_calendar_events WHERE external_id = $1");
        let row = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<PendingCalendarEvent>, StoreError> {
        self.fetch_event(id).await
    }

    async fn insert_event(
        &self,
        event: NewPendingEvent,
        route: InitialRoute,
        now: DateTime<Utc>,
    ) -> Result<InsertedEvent, StoreError> {
        let mut tx = self.pool.begin().await?;
        let id = Uuid::new_v4();
        let (status, job) = match route {
            InitialRoute::Pending => (EventStatus::Pending, None),
            InitialRoute::Rejected => (EventStatus::Rejected, None),
            InitialRoute::AutoCreate(mut spec) => {
                spec.source_event_id = Some(id);
                let job = insert_job(&mut tx, spec, now).await?;
                (EventStatus::AutoCreated, Some(job))
            }
        };

        let raw = &event.raw;
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO pending_calendar_events (
                id, external_id, calendar_id, title, description, location, start_at, end_at,
                parsed_json, builder_id, match_score, matched_abbreviation, match_method,
                confidence, status, job_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $17)
            ON CONFLICT (external_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&raw.external_id)
        .bind(&raw.calendar_id)
        .bind(&raw.title)
        .bind(&raw.description)
        .bind(&raw.location)
        .bind(raw.start_at)
        .bind(raw.end_at)
        .bind(Json(&event.parsed))
        .bind(event.builder_match.builder_id)
        .bind(i16::from(event.builder_match.score))
        .bind(&event.builder_match.abbreviation)
        .bind(event.builder_match.method.as_str())
        .bind(i16::from(event.confidence))
        .bind(status.as_str())
        .bind(job.as_ref().map(|j| j.id))
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            // Dropping the transaction rolls back the job insert as well.
            debug!(external_id = %raw.external_id, "insert lost uniqueness race");
            return Err(StoreError::DuplicateExternalId(raw.external_id.clone()));
        }
        tx.commit().await?;

        let stored = self
            .fetch_event(id)
            .await?
            .ok_or_else(|| StoreError::not_found("calendar event", id))?;
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
        sqlx::query(
            r#"
            UPDATE pending_calendar_events
               SET title = $2, description = $3, location = $4, start_at = $5, end_at = $6,
                   parsed_json = $7, builder_id = $8, match_score = $9,
                   matched_abbreviation = $10, match_method = $11, confidence = $12,
                   updated_at = $13
             WHERE id = $1
               AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(&raw.title)
        .bind(&raw.description)
        .bind(&raw.location)
        .bind(raw.start_at)
        .bind(raw.end_at)
        .bind(Json(parsed))
        .bind(builder_match.builder_id)
        .bind(i16::from(builder_match.score))
        .bind(&builder_match.abbreviation)
        .bind(builder_match.method.as_str())
        .bind(i16::from(confidence))
        .bind(now)
        .execute(&self.pool)
        .await?;
        self.fetch_event(id)
            .await?
            .ok_or_else(|| StoreError::not_found("calendar event", id))
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<EventPage, StoreError> {
        const WHERE: &str = r#"
             WHERE ($1::text IS NULL OR status = $1)
               AND ($2::smallint IS NULL OR confidence >= $2)
               AND ($3::smallint IS NULL OR confidence <= $3)
               AND ($4::timestamptz IS NULL OR start_at >= $4)
               AND ($5::timestamptz IS NULL OR start_at <= $5)
        "#;
        let status = filter.status.map(|s| s.as_str());
        let min = filter.min_confidence.map(i16::from);
        let max = filter.max_confidence.map(i16::from);

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM pending_calendar_events {WHERE}"
        ))
        .bind(status)
        .bind(min)
        .bind(max)
        .bind(filter.start)
        .bind(filter.end)
        .fetch_one(&self.pool)
        .await?;

        let limit = if filter.limit == 0 { i64::MAX } else { filter.limit as i64 };
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM pending_calendar_events {WHERE} ORDER BY start_at, id LIMIT $6 OFFSET $7"
        );
        let rows = sqlx::query(&sql)
            .bind(status)
            .bind(min)
            .bind(max)
            .bind(filter.start)
            .bind(filter.end)
            .bind(limit)
            .bind(filter.offset as i64)
            .fetch_all(&self.pool)
            .await?;
        let items = rows.iter().map(event_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(EventPage {
            items,
            total: usize::try_from(total).unwrap_or(0),
        })
    }

    async fn approve_event(
        &self,
        id: Uuid,
        mut job: JobSpec,
        review: ReviewStamp,
    ) -> Result<(PendingCalendarEvent, Job), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_pending(&mut tx, id).await?;

        job.source_event_id = Some(id);
        let job = insert_job(&mut tx, job, review.reviewed_at).await?;
        sqlx::query(
            r#"
            UPDATE pending_calendar_events
               SET status = 'approved', job_id = $2, reviewed_by = $3, reviewed_at = $4,
                   updated_at = $4
             WHERE id = $1
               AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(job.id)
        .bind(&review.reviewer)
        .bind(review.reviewed_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let event = self
            .fetch_event(id)
            .await?
            .ok_or_else(|| StoreError::not_found("calendar event", id))?;
        Ok((event, job))
    }

    async fn reject_event(
        &self,
        id: Uuid,
        review: ReviewStamp,
        reason: String,
    ) -> Result<PendingCalendarEvent, StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_pending(&mut tx, id).await?;
        sqlx::query(
            r#"
            UPDATE pending_calendar_events
               SET status = 'rejected', reviewed_by = $2, reviewed_at = $3,
                   rejection_reason = $4, updated_at = $3
             WHERE id = $1
               AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(&review.reviewer)
        .bind(review.reviewed_at)
        .bind(&reason)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.fetch_event(id)
            .await?
            .ok_or_else(|| StoreError::not_found("calendar event", id))
    }

    async fn append_import_log(&self, log: &CalendarImportLog) -> Result<(), StoreError> {
        let c = &log.counters;
        sqlx::query(
            r#"
            INSERT INTO calendar_import_logs (
                id, run_id, calendar_id, calendar_name, run_at, events_processed, jobs_created,
                events_queued, events_rejected, duplicates, events_errored, jobs_assigned,
                jobs_unassigned, error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(log.id)
        .bind(log.run_id)
        .bind(&log.calendar_id)
        .bind(&log.calendar_name)
        .bind(log.run_at)
        .bind(to_i32(c.events_processed))
        .bind(to_i32(c.jobs_created))
        .bind(to_i32(c.events_queued))
        .bind(to_i32(c.events_rejected))
        .bind(to_i32(c.duplicates))
        .bind(to_i32(c.events_errored))
        .bind(to_i32(c.jobs_assigned))
        .bind(to_i32(c.jobs_unassigned))
        .bind(&log.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_import_logs(
        &self,
        calendar_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CalendarImportLog>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT *
              FROM calendar_import_logs
             WHERE ($1::text IS NULL OR calendar_id = $1)
             ORDER BY run_at DESC
             LIMIT $2
            "#,
        )
        .bind(calendar_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(import_log_from_row).collect()
    }

    async fn last_successful_import(
        &self,
        calendar_id: &str,
    ) -> Result<Option<CalendarImportLog>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT *
              FROM calendar_import_logs
             WHERE calendar_id = $1
               AND error IS NULL
             ORDER BY run_at DESC
             LIMIT 1
            "#,
        )
        .bind(calendar_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(import_log_from_row).transpose()
    }
}

#[async_trait]
impl AssignmentStore for PgStore {
    async fn list_preferences(&self) -> Result<Vec<InspectorPreferences>, StoreError> {
        let rows = sqlx::query("SELECT * FROM inspector_preferences ORDER BY created_at, inspector_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(preferences_from_row).collect()
    }

    async fn get_preferences(
        &self,
        inspector_id: Uuid,
    ) -> Result<Option<InspectorPreferences>, StoreError> {
        let row = sqlx::query("SELECT * FROM inspector_preferences WHERE inspector_id = $1")
            .bind(inspector_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(preferences_from_row).transpose()
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_unassigned_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE assignee IS NULL ORDER BY scheduled_start, id"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn workloads_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<InspectorWorkload>, StoreError> {
        let sql = format!(
            "SELECT {WORKLOAD_COLUMNS} FROM inspector_workloads WHERE work_date BETWEEN $1 AND $2"
        );
        let rows = sqlx::query(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(workload_from_row).collect()
    }

    async fn commit_assignment(
        &self,
        commit: AssignmentCommit,
    ) -> Result<AssignmentReceipt, StoreError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(commit.job_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found("job", commit.job_id))?;
        let mut job = job_from_row(&row)?;
        if job.assignee != commit.expected_assignee {
            return Err(StoreError::Conflict(format!(
                "job {} assignee changed concurrently",
                job.id
            )));
        }

        if let Some(previous) = commit.expected_assignee {
            sqlx::query(
                r#"
                UPDATE inspector_workloads
                   SET job_count = GREATEST(job_count - 1, 0),
                       scheduled_minutes = GREATEST(scheduled_minutes - $3, 0)
                 WHERE inspector_id = $1
                   AND work_date = $2
                "#,
            )
            .bind(previous)
            .bind(job.scheduled_date)
            .bind(to_i32(job.estimated_minutes))
            .execute(&mut *tx)
            .await?;
        }

        let workload = match commit.new_assignee {
            Some(inspector_id) => {
                let sql = format!(
                    r#"
                    INSERT INTO inspector_workloads ({WORKLOAD_COLUMNS})
                    VALUES ($1, $2, 1, $3, $4, $5, $6)
                    ON CONFLICT (inspector_id, work_date) DO UPDATE
                       SET job_count = inspector_workloads.job_count + 1,
                           scheduled_minutes = inspector_workloads.scheduled_minutes + EXCLUDED.scheduled_minutes,
                           territory = COALESCE(inspector_workloads.territory, EXCLUDED.territory),
                           last_lat = COALESCE(EXCLUDED.last_lat, inspector_workloads.last_lat),
                           last_lon = COALESCE(EXCLUDED.last_lon, inspector_workloads.last_lon)
                    RETURNING {WORKLOAD_COLUMNS}
                    "#
                );
                let row = sqlx::query(&sql)
                    .bind(inspector_id)
                    .bind(job.scheduled_date)
                    .bind(to_i32(job.estimated_minutes))
                    .bind(&job.territory)
                    .bind(job.location.map(|g| g.lat))
                    .bind(job.location.map(|g| g.lon))
                    .fetch_one(&mut *tx)
                    .await?;
                Some(workload_from_row(&row)?)
            }
            None => None,
        };

        sqlx::query(
            "UPDATE jobs SET assignee = $2, needs_manual_assignment = $3 WHERE id = $1",
        )
        .bind(job.id)
        .bind(commit.new_assignee)
        .bind(commit.new_assignee.is_none())
        .execute(&mut *tx)
        .await?;
        job.assignee = commit.new_assignee;
        job.needs_manual_assignment = commit.new_assignee.is_none();

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
        sqlx::query(
            r#"
            INSERT INTO assignment_history (
                id, job_id, assignee, assigned_by, previous_assignee, action, score, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(history.id)
        .bind(history.job_id)
        .bind(history.assignee)
        .bind(&history.assigned_by)
        .bind(history.previous_assignee)
        .bind(history.action.as_str())
        .bind(history.score)
        .bind(history.recorded_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(AssignmentReceipt {
            job,
            history,
            workload,
        })
    }

    async fn flag_for_manual_assignment(&self, job_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE jobs SET needs_manual_assignment = TRUE WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("job", job_id));
        }
        Ok(())
    }

    async fn job_history(&self, job_id: Uuid) -> Result<Vec<AssignmentHistory>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, assignee, assigned_by, previous_assignee, action, score, recorded_at
              FROM assignment_history
             WHERE job_id = $1
             ORDER BY recorded_at, id
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(AssignmentHistory {
                    id: row.try_get("id")?,
                    job_id: row.try_get("job_id")?,
                    assignee: row.try_get("assignee")?,
                    assigned_by: row.try_get("assigned_by")?,
                    previous_assignee: row.try_get("previous_assignee")?,
                    action: row
                        .try_get::<String, _>("action")?
                        .parse()
                        .map_err(corrupt)?,
                    score: row.try_get("score")?,
                    recorded_at: row.try_get("recorded_at")?,
                })
            })
            .collect()
    }
}
