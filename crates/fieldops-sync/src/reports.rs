//! Per-run report files: markdown summary, routed-event audit JSON and parquet snapshot.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use fieldops_core::CalendarImportLog;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use uuid::Uuid;

/// Audit line for one event of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedEventRecord {
    pub external_id: String,
    pub title: String,
    pub start_at: DateTime<Utc>,
    /// `auto_created`, `pending`, `rejected`, `duplicate` or `error`.
    pub outcome: String,
    pub event_id: Option<Uuid>,
    pub confidence: Option<u8>,
    pub builder_id: Option<Uuid>,
    pub builder_score: Option<u8>,
    pub match_method: Option<String>,
    pub job_type: Option<String>,
    pub job_id: Option<Uuid>,
    pub assignee: Option<Uuid>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub schema_version: u32,
    pub files: Vec<SnapshotManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Writes `<reports_root>/<run_id>/` and returns that directory.
pub async fn write_run_report(
    reports_root: &Path,
    log: &CalendarImportLog,
    records: &[RoutedEventRecord],
) -> Result<PathBuf> {
    let report_dir = reports_root.join(log.run_id.to_string());
    fs::create_dir_all(&report_dir)
        .await
        .with_context(|| format!("creating {}", report_dir.display()))?;

    fs::write(report_dir.join("import_summary.md"), summary_markdown(log, records))
        .await
        .context("writing import_summary.md")?;

    let audit = serde_json::to_vec_pretty(&serde_json::json!({
        "import_log": log,
        "events": records,
    }))
    .context("serializing routed events")?;
    fs::write(report_dir.join("routed_events.json"), audit)
        .await
        .context("writing routed_events.json")?;

    export_snapshot(&report_dir, records).await?;
    Ok(report_dir)
}

fn summary_markdown(log: &CalendarImportLog, records: &[RoutedEventRecord]) -> String {
    let c = &log.counters;
    let mut outcomes: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        *outcomes.entry(record.outcome.as_str()).or_default() += 1;
    }

    let mut lines = vec![
        "# Calendar Import Summary".to_string(),
        String::new(),
        format!("- Run ID: `{}`", log.run_id),
        format!(
            "- Calendar: {} (`{}`)",
            log.calendar_name.as_deref().unwrap_or("unknown"),
            log.calendar_id
        ),
        format!("- Run at: {}", log.run_at),
        format!("- Events processed: {}", c.events_processed),
        format!("- Jobs created: {}", c.jobs_created),
        format!("- Queued for review: {}", c.events_queued),
        format!("- Rejected: {}", c.events_rejected),
        format!("- Duplicates: {}", c.duplicates),
        format!("- Errored: {}", c.events_errored),
        format!("- Jobs assigned: {}", c.jobs_assigned),
        format!("- Jobs left unassigned: {}", c.jobs_unassigned),
    ];
    if let Some(error) = &log.error {
        lines.push(format!("- Error: {error}"));
    }
    lines.push(String::new());
    lines.push("## Outcomes".to_string());
    lines.extend(outcomes.iter().map(|(k, v)| format!("- {k}: {v}")));
    lines.push(String::new());
    lines.join("\n")
}

async fn export_snapshot(report_dir: &Path, records: &[RoutedEventRecord]) -> Result<PathBuf> {
    let snapshot_dir = report_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let routed_path = snapshot_dir.join("routed_events.parquet");
    write_routed_events_parquet(&routed_path, records)?;

    let manifest = SnapshotManifest {
        schema_version: 1,
        files: vec![
            manifest_entry("routed_events", report_dir, &routed_path)?,
            manifest_entry("routed_events_json", report_dir, &report_dir.join("routed_events.json"))?,
        ],
    };
    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing snapshot manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_routed_events_parquet(path: &Path, records: &[RoutedEventRecord]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("external_id", DataType::Utf8, false),
        ArrowField::new("title", DataType::Utf8, false),
        ArrowField::new("start_at", DataType::Utf8, false),
        ArrowField::new("outcome", DataType::Utf8, false),
        ArrowField::new("confidence", DataType::UInt32, true),
        ArrowField::new("builder_id", DataType::Utf8, true),
        ArrowField::new("job_id", DataType::Utf8, true),
        ArrowField::new("assignee", DataType::Utf8, true),
    ]));

    let external_ids = StringArray::from(
        records
            .iter()
            .map(|r| Some(r.external_id.as_str()))
            .collect::<Vec<_>>(),
    );
    let titles = StringArray::from(records.iter().map(|r| Some(r.title.as_str())).collect::<Vec<_>>());
    let starts = StringArray::from(
        records
            .iter()
            .map(|r| Some(r.start_at.to_rfc3339()))
            .collect::<Vec<_>>(),
    );
    let outcomes = StringArray::from(records.iter().map(|r| Some(r.outcome.as_str())).collect::<Vec<_>>());
    let confidences = UInt32Array::from(
        records
            .iter()
            .map(|r| r.confidence.map(u32::from))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(external_ids),
            Arc::new(titles),
            Arc::new(starts),
            Arc::new(outcomes),
            Arc::new(confidences),
            Arc::new(uuid_column(records, |r| r.builder_id)),
            Arc::new(uuid_column(records, |r| r.job_id)),
            Arc::new(uuid_column(records, |r| r.assignee)),
        ],
    )
    .context("building routed_events record batch")?;
    write_parquet(path, batch)
}

fn uuid_column(
    records: &[RoutedEventRecord],
    get: impl Fn(&RoutedEventRecord) -> Option<Uuid>,
) -> StringArray {
    StringArray::from(
        records
            .iter()
            .map(|r| get(r).map(|id| id.to_string()))
            .collect::<Vec<_>>(),
    )
}

fn manifest_entry(name: &str, report_dir: &Path, path: &Path) -> Result<SnapshotManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let rel = path
        .strip_prefix(report_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(SnapshotManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: hex::encode(hasher.finalize()),
        bytes: bytes.len() as u64,
    })
}

/// Markdown digest of the most recent run directories under `reports_root`.
pub fn report_recent_imports_markdown(runs: usize, reports_root: &Path) -> Result<String> {
    let mut dirs = std::fs::read_dir(reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();

    let mut lines = vec!["# Recent Calendar Imports".to_string(), String::new()];
    for dir in dirs.into_iter().take(runs.max(1)) {
        let run_id = dir.file_name().to_string_lossy().to_string();
        let audit_path = dir.path().join("routed_events.json");
        if !audit_path.exists() {
            continue;
        }
        let audit: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&audit_path)
                .with_context(|| format!("reading {}", audit_path.display()))?,
        )
        .with_context(|| format!("parsing {}", audit_path.display()))?;
        let log = audit.get("import_log");
        let calendar = log
            .and_then(|l| l.get("calendar_id"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let counter = |key: &str| {
            log.and_then(|l| l.get("counters"))
                .and_then(|c| c.get(key))
                .and_then(|v| v.as_u64())
                .unwrap_or(0)
        };

        lines.push(format!("## Run `{run_id}` ({calendar})"));
        lines.push(format!(
            "- processed {}, created {}, queued {}, rejected {}, duplicates {}",
            counter("events_processed"),
            counter("jobs_created"),
            counter("events_queued"),
            counter("events_rejected"),
            counter("duplicates"),
        ));
        if let Some(error) = log.and_then(|l| l.get("error")).and_then(|v| v.as_str()) {
            lines.push(format!("- error: {error}"));
        }
        lines.push(format!("- audit: `{}`", audit_path.display()));
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldops_core::ImportCounters;

    fn log() -> CalendarImportLog {
        CalendarImportLog {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            calendar_id: "ops-main".into(),
            calendar_name: Some("Inspections - Main Board".into()),
            run_at: Utc::now(),
            counters: ImportCounters {
                events_processed: 2,
                jobs_created: 1,
                events_rejected: 1,
                ..ImportCounters::default()
            },
            error: None,
        }
    }

    fn record(external_id: &str, outcome: &str) -> RoutedEventRecord {
        RoutedEventRecord {
            external_id: external_id.into(),
            title: "MI Homes - Rough Duct 3/15".into(),
            start_at: Utc::now(),
            outcome: outcome.into(),
            event_id: Some(Uuid::new_v4()),
            confidence: Some(90),
            builder_id: Some(Uuid::new_v4()),
            builder_score: Some(100),
            match_method: Some("exact".into()),
            job_type: Some("rough_duct".into()),
            job_id: None,
            assignee: None,
            note: None,
        }
    }

    #[tokio::test]
    async fn run_report_writes_all_files_with_manifest_hashes() {
        let temp = tempfile::tempdir().unwrap();
        let log = log();
        let dir = write_run_report(
            temp.path(),
            &log,
            &[record("evt-1001", "auto_created"), record("evt-1003", "rejected")],
        )
        .await
        .unwrap();

        assert_eq!(dir, temp.path().join(log.run_id.to_string()));
        let summary = std::fs::read_to_string(dir.join("import_summary.md")).unwrap();
        assert!(summary.contains("- Jobs created: 1"));
        assert!(summary.contains("- auto_created: 1"));

        let manifest: SnapshotManifest = serde_json::from_str(
            &std::fs::read_to_string(dir.join("snapshots/manifest.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest.files.len(), 2);
        let parquet = &manifest.files[0];
        assert_eq!(parquet.path, "snapshots/routed_events.parquet");
        assert_eq!(parquet.sha256.len(), 64);
        assert!(parquet.bytes > 0);

        let digest = report_recent_imports_markdown(5, temp.path()).unwrap();
        assert!(digest.contains(&log.run_id.to_string()));
        assert!(digest.contains("processed 2, created 1"));
    }
}
