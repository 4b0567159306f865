use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Calendar ids can be e-mail addresses; keep directory names portable.
fn calendar_dir_name(calendar_id: &str) -> String {
    calendar_id
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedPayload {
    pub sha256: String,
    pub path: PathBuf,
    pub bytes: usize,
    /// The same page was already archived for this calendar and day.
    pub already_present: bool,
}

/// Write-once archive of raw calendar API pages under
/// `<root>/<calendar>/<YYYYMMDD>/<sha256>.json`.
#[derive(Debug, Clone)]
pub struct PayloadArchive {
    root: PathBuf,
}

impl PayloadArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn relative_path(
        &self,
        fetched_at: DateTime<Utc>,
        calendar_id: &str,
        sha256: &str,
    ) -> PathBuf {
        [
            calendar_dir_name(calendar_id),
            fetched_at.format("%Y%m%d").to_string(),
            format!("{sha256}.json"),
        ]
        .iter()
        .collect()
    }

    pub async fn store_payload(
        &self,
        fetched_at: DateTime<Utc>,
        calendar_id: &str,
        page: &[u8],
    ) -> anyhow::Result<ArchivedPayload> {
        let sha256 = content_hash(page);
        let path = self.root.join(self.relative_path(fetched_at, calendar_id, &sha256));
        let already_present = !write_once(&path, page).await?;
        debug!(calendar_id, %sha256, already_present, "calendar page archived");
        Ok(ArchivedPayload {
            sha256,
            path,
            bytes: page.len(),
            already_present,
        })
    }
}

/// Writes through a temp file and a rename. Returns false when `path` already existed.
async fn write_once(path: &Path, bytes: &[u8]) -> anyhow::Result<bool> {
    if fs::try_exists(path)
        .await
        .with_context(|| format!("checking {}", path.display()))?
    {
        return Ok(false);
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let staging = dir.join(format!(".{}.partial", Uuid::new_v4()));
    let mut file = fs::File::create(&staging)
        .await
        .with_context(|| format!("creating {}", staging.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing {}", staging.display()))?;
    file.sync_all().await?;
    drop(file);

    let renamed = fs::rename(&staging, path).await;
    if renamed.is_err() {
        let _ = fs::remove_file(&staging).await;
    }
    match renamed {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err).with_context(|| format!("moving page into {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fetched_at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn pages_are_grouped_by_calendar_and_day() {
        let archive = PayloadArchive::new("/tmp/archive");
        let path = archive.relative_path(fetched_at(), "ops@builder.example", "abc");
        assert_eq!(path, PathBuf::from("ops_builder_example/20260302/abc.json"));
    }

    #[tokio::test]
    async fn identical_pages_are_stored_once() {
        let dir = tempdir().unwrap();
        let archive = PayloadArchive::new(dir.path());
        let page = br#"{"items":[]}"#;

        let first = archive.store_payload(fetched_at(), "main", page).await.unwrap();
        let second = archive.store_payload(fetched_at(), "main", page).await.unwrap();

        assert!(!first.already_present);
        assert!(second.already_present);
        assert_eq!(first.path, second.path);
        assert_eq!(first.sha256, content_hash(page));
        assert_eq!(std::fs::read(&first.path).unwrap(), page);
        assert_eq!(first.bytes, 12);
    }
}
