use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ScanId;
use crate::scan::{ScanConfig, ScanSnapshot, ScanStatus};

/// Detailed outcome of a scan with a derived summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResults {
    pub scan_id: ScanId,
    pub status: ScanStatus,
    pub config: Option<ScanConfig>,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds between start and completion, when both are known
    pub duration: Option<f64>,
    pub results: ScanCounts,
    pub summary: ScanSummary,
    pub html_report_path: Option<PathBuf>,
    pub jsonl_report_path: Option<PathBuf>,
    pub output_lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCounts {
    pub passed: u64,
    pub failed: u64,
    pub total_probes: u32,
    pub completed_probes: u32,
    pub current_probe: Option<String>,
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total_tests: u64,
    /// Percentage of passed tests, 0 when nothing ran
    pub pass_rate: f64,
    pub status: ScanStatus,
    pub error_message: Option<String>,
}

impl From<ScanSnapshot> for ScanResults {
    fn from(snapshot: ScanSnapshot) -> Self {
        let duration = match (snapshot.started_at, snapshot.completed_at) {
            (Some(start), Some(end)) => {
                Some((end - start).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        };
        let total_tests = snapshot.passed + snapshot.failed;
        let pass_rate = if total_tests == 0 {
            0.0
        } else {
            snapshot.passed as f64 / total_tests as f64 * 100.0
        };

        Self {
            scan_id: snapshot.scan_id,
            status: snapshot.status,
            config: snapshot.config,
            created_at: snapshot.created_at,
            started_at: snapshot.started_at,
            completed_at: snapshot.completed_at,
            duration,
            results: ScanCounts {
                passed: snapshot.passed,
                failed: snapshot.failed,
                total_probes: snapshot.total_probes,
                completed_probes: snapshot.completed_probes,
                current_probe: snapshot.current_probe,
                progress: snapshot.progress,
            },
            summary: ScanSummary {
                total_tests,
                pass_rate,
                status: snapshot.status,
                error_message: snapshot.error_message,
            },
            html_report_path: snapshot.html_report_path,
            jsonl_report_path: snapshot.jsonl_report_path,
            output_lines: snapshot.output_lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn summary_derives_duration_and_pass_rate() {
        let mut snapshot = ScanSnapshot::pending(ScanId::from("run"));
        snapshot.status = ScanStatus::Completed;
        snapshot.passed = 38;
        snapshot.failed = 2;
        snapshot.started_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        snapshot.completed_at =
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 1, 30).unwrap());

        let results = ScanResults::from(snapshot);
        assert_eq!(results.duration, Some(90.0));
        assert_eq!(results.summary.total_tests, 40);
        assert!((results.summary.pass_rate - 95.0).abs() < f64::EPSILON);
    }

    #[test]
    fn pass_rate_is_zero_without_tests() {
        let results = ScanResults::from(ScanSnapshot::pending(ScanId::new()));
        assert_eq!(results.summary.pass_rate, 0.0);
        assert_eq!(results.duration, None);
    }
}
