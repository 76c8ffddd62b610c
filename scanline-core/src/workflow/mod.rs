//! Workflow graph construction from scanner output.
//!
//! [`WorkflowEventExtractor`] recognises at most one [`WorkflowEvent`] per
//! line; [`WorkflowGraphBuilder`] folds those events into a
//! [`WorkflowGraph`](scanline_model::WorkflowGraph) of probe traces.

pub mod builder;
pub mod export;
pub mod extractor;
pub mod vocabulary;

pub use builder::{TraceCursor, WorkflowGraphBuilder};
pub use export::{ExportFormat, export, timeline, to_mermaid};
pub use extractor::{WorkflowEvent, WorkflowEventExtractor};
pub use vocabulary::{VocabularyPatterns, WorkflowVocabulary};
