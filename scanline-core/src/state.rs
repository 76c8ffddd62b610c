use std::path::PathBuf;

use chrono::{DateTime, Utc};
use scanline_model::{ScanConfig, ScanId, ScanSnapshot, ScanStatus};

use crate::supervisor::ProcessHandle;

/// Mutable, in-memory state of one live scan.
///
/// Owned by the [`ScanRegistry`](crate::ScanRegistry); only the scan's own
/// supervisor task and cancel requests for the same id mutate it.
#[derive(Debug)]
pub struct ScanState {
    pub scan_id: ScanId,
    pub status: ScanStatus,
    pub config: ScanConfig,

    pub progress: f64,
    pub current_probe: Option<String>,
    pub completed_probes: u32,
    pub total_probes: u32,
    pub current_iteration: u32,
    pub total_iterations: u32,
    pub passed: u64,
    pub failed: u64,
    pub elapsed_time: Option<String>,
    pub estimated_remaining: Option<String>,

    pub html_report_path: Option<PathBuf>,
    pub jsonl_report_path: Option<PathBuf>,
    pub error_message: Option<String>,
    pub output_lines: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub(crate) cancel_requested: bool,
    pub(crate) process: Option<ProcessHandle>,
}

impl ScanState {
    pub fn new(scan_id: ScanId, config: ScanConfig) -> Self {
        let total_probes = config.probes.len() as u32;
        Self {
            scan_id,
            status: ScanStatus::Pending,
            config,
            progress: 0.0,
            current_probe: None,
            completed_probes: 0,
            total_probes,
            current_iteration: 0,
            total_iterations: 0,
            passed: 0,
            failed: 0,
            elapsed_time: None,
            estimated_remaining: None,
            html_report_path: None,
            jsonl_report_path: None,
            error_message: None,
            output_lines: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cancel_requested: false,
            process: None,
        }
    }

    /// Records `message` unless an error was already latched. Returns whether
    /// it was recorded.
    pub fn latch_error(&mut self, message: impl Into<String>) -> bool {
        if self.error_message.is_some() {
            return false;
        }
        self.error_message = Some(message.into());
        true
    }

    pub fn has_latched_error(&self) -> bool {
        self.error_message.is_some()
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        ScanSnapshot {
            scan_id: self.scan_id.clone(),
            status: self.status,
            config: Some(self.config.clone()),
            target_type: Some(self.config.target_type.clone()),
            target_name: Some(self.config.target_name.clone()),
            progress: self.progress,
            current_probe: self.current_probe.clone(),
            completed_probes: self.completed_probes,
            total_probes: self.total_probes,
            current_iteration: self.current_iteration,
            total_iterations: self.total_iterations,
            passed: self.passed,
            failed: self.failed,
            total_tests: None,
            elapsed_time: self.elapsed_time.clone(),
            estimated_remaining: self.estimated_remaining.clone(),
            html_report_path: self.html_report_path.clone(),
            jsonl_report_path: self.jsonl_report_path.clone(),
            error_message: self.error_message.clone(),
            created_at: Some(self.created_at),
            started_at: self.started_at,
            completed_at: self.completed_at,
            output_lines: self.output_lines.clone(),
        }
    }
}
