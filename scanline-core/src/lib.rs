//! # Scanline Core
//!
//! Live telemetry for garak LLM vulnerability scans.
//!
//! ## Overview
//!
//! `scanline-core` runs the scanner as a child process and turns its
//! terminal-oriented output into structured state while the scan runs:
//!
//! - **Line splitting**: [`LineSplitter`] frames raw output into lines and
//!   carriage-return redraws
//! - **Progress**: [`ProgressExtractor`] recognises progress bars, probe
//!   completions, report paths and error markers
//! - **Workflow graphs**: [`WorkflowGraphBuilder`] folds probe, prompt,
//!   response and detector events into a per-scan graph
//! - **Supervision**: [`ScanSupervisor`] launches, follows and cancels scans
//! - **Registry**: [`ScanRegistry`] holds live state and falls back to the
//!   scanner's report files for finished runs
//!
//! ## Examples
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use scanline_core::{
//!     ScanRegistry, ScanSupervisor, SupervisorSettings, WorkflowVocabulary,
//! };
//! use scanline_model::ScanConfig;
//!
//! async fn run() -> scanline_core::Result<()> {
//!     let supervisor = ScanSupervisor::new(
//!         ScanRegistry::default(),
//!         WorkflowVocabulary::default(),
//!         SupervisorSettings::default(),
//!     );
//!     let config = ScanConfig::new("openai", "gpt-3.5-turbo").with_probes(["dan"]);
//!     let scan_id = supervisor.start(config).await?;
//!     let finished = supervisor.wait(&scan_id, Duration::from_millis(500)).await?;
//!     println!("{}: {} passed, {} failed", finished.status, finished.passed, finished.failed);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod line_splitter;
pub mod progress;
pub mod registry;
pub mod report;
pub mod state;
pub mod supervisor;
pub mod tool;
pub mod workflow;

pub use error::{Result, ScanError};
pub use line_splitter::{LineGroup, LineSplitter};
pub use progress::{ProgressExtractor, ProgressOutcome, ProgressRule};
pub use registry::ScanRegistry;
pub use report::ReportArchive;
pub use state::ScanState;
pub use supervisor::{ScanSupervisor, SupervisorSettings};
pub use tool::ScannerTool;
pub use workflow::{
    ExportFormat, VocabularyPatterns, WorkflowEvent, WorkflowEventExtractor,
    WorkflowGraphBuilder, WorkflowVocabulary,
};
