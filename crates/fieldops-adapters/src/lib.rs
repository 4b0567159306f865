//! Calendar event source contracts + fixture-file and HTTP JSON implementations.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use fieldops_core::RawCalendarEvent;
use fieldops_storage::{FetchError, HttpFetcher, PayloadArchive};
use scraper::Html;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "fieldops-adapters";

/// Upper bound on pages followed in one HTTP fetch.
const MAX_PAGES: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatch {
    pub calendar_id: String,
    pub calendar_name: Option<String>,
    pub events: Vec<RawCalendarEvent>,
    /// Set when only part of the calendar could be read.
    pub partial_error: Option<String>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("calendar {calendar_id} unavailable: {reason}")]
    Unavailable { calendar_id: String, reason: String },
    #[error("unknown calendar {0}")]
    UnknownCalendar(String),
    #[error("malformed calendar payload: {0}")]
    Malformed(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[async_trait]
pub trait EventSource: Send + Sync {
    fn source_kind(&self) -> &'static str;

    /// Events changed at or after `since`. A partial read is returned as a batch with
    /// `partial_error` set, not as an error.
    async fn fetch_events(
        &self,
        calendar_id: &str,
        since: DateTime<Utc>,
    ) -> Result<EventBatch, AdapterError>;
}

/// Provider-shaped event record. Everything is optional because providers omit fields freely.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "title")]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePage {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub items: Vec<WireEvent>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Reduces provider HTML to plain text with collapsed whitespace.
pub fn html_to_text(input: &str) -> String {
    if !input.contains('<') {
        return collapse_whitespace(input);
    }
    let fragment = Html::parse_fragment(input);
    let text = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    collapse_whitespace(&text)
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// RFC 3339 timestamps, or bare `YYYY-MM-DD` all-day dates (midnight UTC).
pub fn parse_wire_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Stable id for events a provider hands over without one.
pub fn fallback_external_id(calendar_id: &str, title: &str, start_at: DateTime<Utc>) -> String {
    let key = format!("{calendar_id}:{title}:{}", start_at.to_rfc3339());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

enum WireOutcome {
    Event(RawCalendarEvent),
    Skipped,
    Invalid(String),
}

fn normalize_wire_event(calendar_id: &str, wire: WireEvent, since: DateTime<Utc>) -> WireOutcome {
    if wire
        .status
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("cancelled"))
    {
        return WireOutcome::Skipped;
    }

    let title = collapse_whitespace(wire.summary.as_deref().unwrap_or_default());
    let Some(start_at) = wire.start.as_deref().and_then(parse_wire_time) else {
        return WireOutcome::Invalid(format!(
            "event {:?} has no usable start time",
            wire.id.as_deref().unwrap_or(title.as_str())
        ));
    };
    let end_at = wire
        .end
        .as_deref()
        .and_then(parse_wire_time)
        .filter(|end| *end >= start_at)
        .unwrap_or(start_at + Duration::hours(1));

    let changed_at = wire
        .updated
        .as_deref()
        .and_then(parse_wire_time)
        .unwrap_or(start_at);
    if changed_at < since {
        return WireOutcome::Skipped;
    }

    let external_id = wire
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| fallback_external_id(calendar_id, &title, start_at));

    WireOutcome::Event(RawCalendarEvent {
        external_id,
        calendar_id: calendar_id.to_string(),
        title,
        description: html_to_text(wire.description.as_deref().unwrap_or_default()),
        location: collapse_whitespace(wire.location.as_deref().unwrap_or_default()),
        start_at,
        end_at,
    })
}

/// Normalizes one page of wire events, collecting per-event problems instead of failing.
fn collect_events(
    calendar_id: &str,
    items: Vec<WireEvent>,
    since: DateTime<Utc>,
    events: &mut Vec<RawCalendarEvent>,
    problems: &mut Vec<String>,
) {
    for wire in items {
        match normalize_wire_event(calendar_id, wire, since) {
            WireOutcome::Event(event) => events.push(event),
            WireOutcome::Skipped => {}
            WireOutcome::Invalid(reason) => {
                warn!(calendar_id, %reason, "skipping malformed calendar event");
                problems.push(reason);
            }
        }
    }
}

fn read_fixture(path: &Path) -> Result<CalendarFixture, AdapterError> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data)
        .map_err(|err| AdapterError::Malformed(format!("{}: {err}", path.display())))
}

#[derive(Debug, Clone, Deserialize)]
struct CalendarFixture {
    #[serde(default)]
    calendar_name: Option<String>,
    #[serde(default)]
    events: Vec<WireEvent>,
}

/// Reads `<root>/<calendar_id>.json`. Used for local runs and tests.
#[derive(Debug, Clone)]
pub struct FixtureEventSource {
    root: PathBuf,
}

impl FixtureEventSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn fixture_path(&self, calendar_id: &str) -> PathBuf {
        self.root.join(format!("{calendar_id}.json"))
    }
}

#[async_trait]
impl EventSource for FixtureEventSource {
    fn source_kind(&self) -> &'static str {
        "fixture"
    }

    async fn fetch_events(
        &self,
        calendar_id: &str,
        since: DateTime<Utc>,
    ) -> Result<EventBatch, AdapterError> {
        let path = self.fixture_path(calendar_id);
        if !path.exists() {
            return Err(AdapterError::UnknownCalendar(calendar_id.to_string()));
        }
        let fixture = read_fixture(&path)?;

        let mut events = Vec::new();
        let mut problems = Vec::new();
        collect_events(calendar_id, fixture.events, since, &mut events, &mut problems);
        debug!(calendar_id, count = events.len(), "loaded fixture calendar");

        Ok(EventBatch {
            calendar_id: calendar_id.to_string(),
            calendar_name: fixture.calendar_name,
            events,
            partial_error: (!problems.is_empty()).then(|| problems.join("; ")),
        })
    }
}

/// Paged JSON calendar endpoint: `GET {base_url}/calendars/{id}/events?updatedMin=..&pageToken=..`.
pub struct HttpEventSource {
    base_url: String,
    fetcher: Arc<HttpFetcher>,
    archive: Option<PayloadArchive>,
}

impl HttpEventSource {
    pub fn new(base_url: impl Into<String>, fetcher: Arc<HttpFetcher>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            fetcher,
            archive: None,
        }
    }

    pub fn with_archive(mut self, archive: PayloadArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn events_url(&self, calendar_id: &str) -> String {
        format!("{}/calendars/{}/events", self.base_url, calendar_id)
    }

    async fn fetch_page(
        &self,
        fetch_id: Uuid,
        calendar_id: &str,
        since: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> Result<WirePage, AdapterError> {
        let mut query = vec![("updatedMin".to_string(), since.to_rfc3339())];
        if let Some(token) = page_token {
            query.push(("pageToken".to_string(), token.to_string()));
        }
        let url = self.events_url(calendar_id);
        let response = self
            .fetcher
            .fetch_bytes(fetch_id, calendar_id, &url, &query)
            .await
            .map_err(|err: FetchError| AdapterError::Unavailable {
                calendar_id: calendar_id.to_string(),
                reason: err.to_string(),
            })?;

        if let Some(archive) = &self.archive {
            if let Err(err) = archive
                .store_payload(Utc::now(), calendar_id, &response.body)
                .await
            {
                warn!(calendar_id, error = %err, "could not archive calendar page");
            }
        }

        serde_json::from_slice(&response.body)
            .map_err(|err| AdapterError::Malformed(format!("{}: {err}", response.url)))
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    fn source_kind(&self) -> &'static str {
        "http"
    }

    async fn fetch_events(
        &self,
        calendar_id: &str,
        since: DateTime<Utc>,
    ) -> Result<EventBatch, AdapterError> {
        let fetch_id = Uuid::new_v4();
        let mut events = Vec::new();
        let mut problems = Vec::new();
        let mut calendar_name = None;
        let mut page_token: Option<String> = None;

        for page_index in 0..MAX_PAGES {
            let page = match self
                .fetch_page(fetch_id, calendar_id, since, page_token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(err) if page_index == 0 => return Err(err),
                Err(err) => {
                    warn!(calendar_id, page_index, error = %err, "calendar page failed, keeping earlier pages");
                    problems.push(format!("page {page_index}: {err}"));
                    break;
                }
            };

            if calendar_name.is_none() {
                calendar_name = page.summary.clone();
            }
            collect_events(calendar_id, page.items, since, &mut events, &mut problems);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(EventBatch {
            calendar_id: calendar_id.to_string(),
            calendar_name,
            events,
            partial_error: (!problems.is_empty()).then(|| problems.join("; ")),
        })
    }
}

/// In-memory source, handy for wiring tests and demos.
#[derive(Debug, Clone, Default)]
pub struct StaticEventSource {
    batch: Option<EventBatch>,
}

impl StaticEventSource {
    pub fn new(batch: EventBatch) -> Self {
        Self { batch: Some(batch) }
    }

    /// A source whose every fetch fails as unavailable.
    pub fn unreachable() -> Self {
        Self { batch: None }
    }
}

#[async_trait]
impl EventSource for StaticEventSource {
    fn source_kind(&self) -> &'static str {
        "static"
    }

    async fn fetch_events(
        &self,
        calendar_id: &str,
        _since: DateTime<Utc>,
    ) -> Result<EventBatch, AdapterError> {
        match &self.batch {
            Some(batch) => Ok(EventBatch {
                calendar_id: calendar_id.to_string(),
                ..batch.clone()
            }),
            None => Err(AdapterError::Unavailable {
                calendar_id: calendar_id.to_string(),
                reason: "connection refused".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(value: &str) -> DateTime<Utc> {
        parse_wire_time(value).expect("timestamp")
    }

    #[test]
    fn html_descriptions_become_plain_text() {
        let text = html_to_text("<p>Lot 12<br>Gate code <b>4411</b></p>\n<ul><li>bring ladder</li></ul>");
        assert_eq!(text, "Lot 12 Gate code 4411 bring ladder");
        assert_eq!(html_to_text("  plain   text "), "plain text");
    }

    #[test]
    fn all_day_dates_start_at_midnight() {
        assert_eq!(ts("2026-03-15"), ts("2026-03-15T00:00:00Z"));
        assert!(parse_wire_time("next tuesday").is_none());
    }

    #[test]
    fn missing_ids_get_a_stable_fallback() {
        let start = ts("2026-03-15T09:00:00Z");
        let a = fallback_external_id("main", "MI Homes - Final", start);
        let b = fallback_external_id("main", "MI Homes - Final", start);
        let c = fallback_external_id("other", "MI Homes - Final", start);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn wire_events_are_normalized_or_reported() {
        let since = ts("2026-01-01T00:00:00Z");
        let items = vec![
            WireEvent {
                id: Some("a".into()),
                summary: Some("MI Homes -  Rough".into()),
                start: Some("2026-03-15T09:00:00Z".into()),
                ..WireEvent::default()
            },
            WireEvent {
                id: Some("b".into()),
                summary: Some("cancelled walk".into()),
                start: Some("2026-03-15T09:00:00Z".into()),
                status: Some("cancelled".into()),
                ..WireEvent::default()
            },
            WireEvent {
                id: Some("c".into()),
                summary: Some("no start".into()),
                ..WireEvent::default()
            },
            WireEvent {
                id: Some("d".into()),
                summary: Some("old".into()),
                start: Some("2025-06-01T09:00:00Z".into()),
                ..WireEvent::default()
            },
        ];

        let mut events = Vec::new();
        let mut problems = Vec::new();
        collect_events("main", items, since, &mut events, &mut problems);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "MI Homes - Rough");
        assert_eq!(events[0].end_at, ts("2026-03-15T10:00:00Z"));
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("\"c\""));
    }

    #[tokio::test]
    async fn unreachable_static_source_reports_unavailable() {
        let err = StaticEventSource::unreachable()
            .fetch_events("main", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Unavailable { .. }));
    }
}
