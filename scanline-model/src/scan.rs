use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ModelError, Result};
use crate::ids::ScanId;

/// Lifecycle of a scan. `Pending -> Running -> {Completed | Failed | Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a cancel request can still take effect.
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_probes() -> Vec<String> {
    vec!["all".to_string()]
}

fn default_generations() -> u32 {
    5
}

fn default_eval_threshold() -> f64 {
    0.5
}

/// Parameters of one scanner invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Generator type, e.g. `openai`
    pub target_type: String,
    /// Model name, e.g. `gpt-3.5-turbo`
    pub target_name: String,
    #[serde(default = "default_probes")]
    pub probes: Vec<String>,
    #[serde(default)]
    pub detectors: Option<Vec<String>>,
    #[serde(default)]
    pub buffs: Option<Vec<String>>,

    /// Generations per prompt (1..=100)
    #[serde(default = "default_generations")]
    pub generations: u32,
    /// Detector score threshold (0.0..=1.0)
    #[serde(default = "default_eval_threshold")]
    pub eval_threshold: f64,
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub parallel_requests: Option<u32>,
    #[serde(default)]
    pub parallel_attempts: Option<u32>,

    #[serde(default)]
    pub generator_options: Option<Map<String, Value>>,
    #[serde(default)]
    pub probe_options: Option<Map<String, Value>>,

    #[serde(default)]
    pub report_prefix: Option<String>,
}

impl ScanConfig {
    pub fn new(
        target_type: impl Into<String>,
        target_name: impl Into<String>,
    ) -> Self {
        Self {
            target_type: target_type.into(),
            target_name: target_name.into(),
            probes: default_probes(),
            detectors: None,
            buffs: None,
            generations: default_generations(),
            eval_threshold: default_eval_threshold(),
            seed: None,
            parallel_requests: None,
            parallel_attempts: None,
            generator_options: None,
            probe_options: None,
            report_prefix: None,
        }
    }

    pub fn with_probes<I, S>(mut self, probes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.probes = probes.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_type.trim().is_empty() {
            return Err(ModelError::invalid_config(
                "target_type",
                "must not be empty",
            ));
        }
        if self.target_name.trim().is_empty() {
            return Err(ModelError::invalid_config(
                "target_name",
                "must not be empty",
            ));
        }
        if !(1..=100).contains(&self.generations) {
            return Err(ModelError::invalid_config(
                "generations",
                format!("{} is outside 1..=100", self.generations),
            ));
        }
        if !(0.0..=1.0).contains(&self.eval_threshold) {
            return Err(ModelError::invalid_config(
                "eval_threshold",
                format!("{} is outside 0.0..=1.0", self.eval_threshold),
            ));
        }
        if self.parallel_requests == Some(0) {
            return Err(ModelError::invalid_config(
                "parallel_requests",
                "must be at least 1",
            ));
        }
        if self.parallel_attempts == Some(0) {
            return Err(ModelError::invalid_config(
                "parallel_attempts",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Serializable view of a scan, live or reconstructed from a report file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSnapshot {
    pub scan_id: ScanId,
    pub status: ScanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ScanConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
    pub progress: f64,
    pub current_probe: Option<String>,
    pub completed_probes: u32,
    pub total_probes: u32,
    pub current_iteration: u32,
    pub total_iterations: u32,
    pub passed: u64,
    pub failed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tests: Option<u64>,
    pub elapsed_time: Option<String>,
    pub estimated_remaining: Option<String>,
    pub html_report_path: Option<PathBuf>,
    pub jsonl_report_path: Option<PathBuf>,
    pub error_message: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output_lines: Vec<String>,
}

impl ScanSnapshot {
    /// Empty snapshot for a scan that has not produced any output yet.
    pub fn pending(scan_id: ScanId) -> Self {
        Self {
            scan_id,
            status: ScanStatus::Pending,
            config: None,
            target_type: None,
            target_name: None,
            progress: 0.0,
            current_probe: None,
            completed_probes: 0,
            total_probes: 0,
            current_iteration: 0,
            total_iterations: 0,
            passed: 0,
            failed: 0,
            total_tests: None,
            elapsed_time: None,
            estimated_remaining: None,
            html_report_path: None,
            jsonl_report_path: None,
            error_message: None,
            created_at: None,
            started_at: None,
            completed_at: None,
            output_lines: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_scanner_defaults() {
        let config: ScanConfig = serde_json::from_str(
            r#"{"target_type":"openai","target_name":"gpt-3.5-turbo"}"#,
        )
        .unwrap();
        assert_eq!(config.probes, vec!["all".to_string()]);
        assert_eq!(config.generations, 5);
        assert_eq!(config.eval_threshold, 0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_rejects_out_of_range_values() {
        let mut config = ScanConfig::new("openai", "gpt-4");
        config.generations = 0;
        assert!(matches!(
            config.validate(),
            Err(ModelError::InvalidConfig {
                field: "generations",
                ..
            })
        ));

        let mut config = ScanConfig::new("openai", "gpt-4");
        config.eval_threshold = 1.5;
        assert!(config.validate().is_err());

        let config = ScanConfig::new("openai", "  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn status_terminality() {
        assert!(!ScanStatus::Pending.is_terminal());
        assert!(!ScanStatus::Running.is_terminal());
        assert!(ScanStatus::Completed.is_terminal());
        assert!(ScanStatus::Failed.is_terminal());
        assert!(ScanStatus::Cancelled.is_terminal());
        assert!(ScanStatus::Pending.is_cancellable());
        assert!(!ScanStatus::Cancelled.is_cancellable());
        assert_eq!(
            serde_json::to_string(&ScanStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }
}
