//! Core data model definitions shared across scanline crates.
//!
//! Everything here is plain data: scan configuration and status snapshots,
//! plus the workflow graph (nodes, edges, traces) built from scanner output.
//! Behaviour lives in `scanline-core`.
#![allow(missing_docs)]

pub mod error;
pub mod ids;
pub mod results;
pub mod scan;
pub mod workflow;

// Intentionally curated re-exports for downstream consumers.
pub use error::{ModelError, Result as ModelResult};
pub use ids::ScanId;
pub use results::{ScanCounts, ScanResults, ScanSummary};
pub use scan::{ScanConfig, ScanSnapshot, ScanStatus};
pub use workflow::{
    EdgeKind, Metadata, NodeKind, TimelineEvent, TraceStatistics,
    VulnerabilityFinding, WorkflowEdge, WorkflowGraph, WorkflowNode,
    WorkflowStatistics, WorkflowTrace,
};
