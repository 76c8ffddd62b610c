//! Reconstruction of finished scans from the scanner's JSON-Lines reports.
//!
//! The scanner leaves `garak.<run id>.report.jsonl` (and usually a sibling
//! `.report.html`) in its runs directory. The first record carries run
//! metadata; later records with a numeric `status` are attempts, where `2`
//! is a pass and `1` a fail.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use scanline_model::{ScanId, ScanSnapshot, ScanStatus};
use serde_json::Value;
use tracing::{debug, warn};

pub const REPORT_PREFIX: &str = "garak.";
pub const REPORT_SUFFIX: &str = ".report.jsonl";
const HTML_SUFFIX: &str = ".report.html";

const STATUS_PASS: i64 = 2;
const STATUS_FAIL: i64 = 1;

/// Default scanner runs directory, `~/.local/share/garak/garak_runs`.
pub fn default_runs_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| {
        home.join(".local")
            .join("share")
            .join("garak")
            .join("garak_runs")
    })
}

/// Run identifier encoded in a report file name.
pub fn run_id_from_file_name(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix(REPORT_PREFIX)?
        .strip_suffix(REPORT_SUFFIX)
        .filter(|id| !id.is_empty())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn string_field(entry: &Value, key: &str) -> Option<String> {
    entry.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Builds a snapshot from report contents. `None` when the file is empty or
/// its metadata record is not JSON.
pub fn parse_report(
    scan_id: ScanId,
    contents: &str,
    report_path: &Path,
    html_report_path: Option<PathBuf>,
    modified: Option<DateTime<Utc>>,
) -> Option<ScanSnapshot> {
    let mut lines = contents.lines().filter(|line| !line.trim().is_empty());
    let first: Value = serde_json::from_str(lines.next()?).ok()?;

    let mut passed = 0u64;
    let mut failed = 0u64;
    let records = std::iter::once(first.clone())
        .chain(lines.filter_map(|line| serde_json::from_str::<Value>(line).ok()));
    for record in records {
        match record.get("status").and_then(Value::as_i64) {
            Some(STATUS_PASS) => passed += 1,
            Some(STATUS_FAIL) => failed += 1,
            _ => {}
        }
    }

    let started_at = string_field(&first, "transient.starttime_iso")
        .as_deref()
        .and_then(parse_timestamp)
        .or(modified);
    let completed_at = string_field(&first, "transient.endtime_iso")
        .as_deref()
        .and_then(parse_timestamp);

    let mut snapshot = ScanSnapshot::pending(scan_id);
    snapshot.status = ScanStatus::Completed;
    snapshot.progress = 100.0;
    snapshot.target_type = Some(
        string_field(&first, "plugins.target_type").unwrap_or_else(|| "unknown".into()),
    );
    snapshot.target_name = Some(
        string_field(&first, "plugins.target_name").unwrap_or_else(|| "unknown".into()),
    );
    snapshot.passed = passed;
    snapshot.failed = failed;
    snapshot.total_tests = Some(passed + failed);
    snapshot.started_at = started_at;
    snapshot.completed_at = completed_at;
    snapshot.jsonl_report_path = Some(report_path.to_path_buf());
    snapshot.html_report_path = html_report_path;
    Some(snapshot)
}

/// Read access to the scanner's runs directory.
#[derive(Debug, Clone)]
pub struct ReportArchive {
    runs_dir: PathBuf,
}

impl ReportArchive {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    pub fn report_path(&self, scan_id: &ScanId) -> PathBuf {
        self.runs_dir
            .join(format!("{REPORT_PREFIX}{scan_id}{REPORT_SUFFIX}"))
    }

    fn html_path(&self, scan_id: &ScanId) -> PathBuf {
        self.runs_dir
            .join(format!("{REPORT_PREFIX}{scan_id}{HTML_SUFFIX}"))
    }

    /// Loads the run with this id, if a readable report exists.
    pub async fn load(&self, scan_id: &ScanId) -> Option<ScanSnapshot> {
        let path = self.report_path(scan_id);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!("Failed to read report {}: {}", path.display(), err);
                return None;
            }
        };

        let modified = tokio::fs::metadata(&path)
            .await
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        let html = self.html_path(scan_id);
        let html = tokio::fs::try_exists(&html)
            .await
            .unwrap_or(false)
            .then_some(html);

        let snapshot = parse_report(scan_id.clone(), &contents, &path, html, modified);
        if snapshot.is_none() {
            warn!("Skipping unparseable report {}", path.display());
        }
        snapshot
    }

    /// Every run with a readable report, in directory order.
    pub async fn list(&self) -> Vec<ScanSnapshot> {
        let mut entries = match tokio::fs::read_dir(&self.runs_dir).await {
            Ok(entries) => entries,
            Err(err) => {
                debug!(
                    "Runs directory {} not readable: {}",
                    self.runs_dir.display(),
                    err
                );
                return Vec::new();
            }
        };

        let mut snapshots = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!("Error reading runs directory: {}", err);
                    break;
                }
            };
            let file_name = entry.file_name();
            let Some(run_id) = file_name.to_str().and_then(run_id_from_file_name)
            else {
                continue;
            };
            if let Some(snapshot) = self.load(&ScanId::from(run_id)).await {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }
}
