use std::path::PathBuf;
use std::time::Duration;

use scanline_core::report::default_runs_dir;
use scanline_core::{
    ReportArchive, SupervisorSettings, VocabularyPatterns, WorkflowVocabulary,
};

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub logging: LoggingConfig,
    /// Trigger patterns for workflow events, defaults merged with overrides
    pub workflow: VocabularyPatterns,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Explicit scanner executable; discovered at first use when unset
    pub path: Option<PathBuf>,
    /// Where the scanner leaves its report files
    pub runs_dir: Option<PathBuf>,
    pub cancel_grace: Duration,
    pub max_chunk_len: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        let defaults = SupervisorSettings::default();
        Self {
            path: None,
            runs_dir: default_runs_dir(),
            cancel_grace: defaults.cancel_grace,
            max_chunk_len: defaults.max_chunk_len,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

impl Config {
    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            scanner_path: self.scanner.path.clone(),
            cancel_grace: self.scanner.cancel_grace,
            max_chunk_len: self.scanner.max_chunk_len,
        }
    }

    pub fn report_archive(&self) -> Option<ReportArchive> {
        self.scanner.runs_dir.clone().map(ReportArchive::new)
    }

    /// Compiles the workflow patterns. The loader already did this once, so
    /// this only fails for hand-built configs.
    pub fn vocabulary(&self) -> scanline_core::Result<WorkflowVocabulary> {
        WorkflowVocabulary::compile(&self.workflow)
    }
}
