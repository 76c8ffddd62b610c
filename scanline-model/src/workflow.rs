//! Workflow graph built from scanner output.
//!
//! A graph is append-only: nodes and edges are pushed in arrival order and
//! never removed. Traces do not own nodes; they reference them by id so the
//! graph stays the single owner of every node and edge.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ModelError;
use crate::ids::ScanId;

/// Free-form metadata attached to nodes, edges and timeline events.
pub type Metadata = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Probe,
    Generator,
    Detector,
    LlmResponse,
    Vulnerability,
}

impl NodeKind {
    pub const ALL: [NodeKind; 5] = [
        NodeKind::Probe,
        NodeKind::Generator,
        NodeKind::Detector,
        NodeKind::LlmResponse,
        NodeKind::Vulnerability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Probe => "probe",
            NodeKind::Generator => "generator",
            NodeKind::Detector => "detector",
            NodeKind::LlmResponse => "llm_response",
            NodeKind::Vulnerability => "vulnerability",
        }
    }

    /// Prefix used for per-kind node ordinals (`probe_1`, `gen_2`, ...).
    pub fn id_prefix(&self) -> &'static str {
        match self {
            NodeKind::Probe => "probe",
            NodeKind::Generator => "gen",
            NodeKind::Detector => "det",
            NodeKind::LlmResponse => "llm",
            NodeKind::Vulnerability => "vuln",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ModelError::UnknownNodeKind(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Prompt,
    Response,
    Detection,
    Chain,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Prompt => "prompt",
            EdgeKind::Response => "response",
            EdgeKind::Detection => "detection",
            EdgeKind::Chain => "chain",
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prompt" => Ok(EdgeKind::Prompt),
            "response" => Ok(EdgeKind::Response),
            "detection" => Ok(EdgeKind::Detection),
            "chain" => Ok(EdgeKind::Chain),
            other => Err(ModelError::UnknownEdgeKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub node_id: String,
    pub node_type: NodeKind,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub edge_id: String,
    pub source_id: String,
    pub target_id: String,
    pub edge_type: EdgeKind,
    /// First 100 characters of the carried content
    #[serde(default)]
    pub content_preview: String,
    #[serde(default)]
    pub full_content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityFinding {
    pub vulnerability_type: String,
    pub severity: String,
    pub probe_name: String,
    /// Node ids of the owning trace up to and including the finding
    pub node_path: Vec<String>,
    pub evidence: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStatistics {
    pub nodes: u64,
    pub edges: u64,
    pub responses: u64,
    pub vulnerabilities: u64,
}

/// One probe's slice of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTrace {
    pub trace_id: String,
    pub scan_id: ScanId,
    pub probe_name: String,
    pub node_ids: Vec<String>,
    pub edge_ids: Vec<String>,
    pub vulnerability_findings: Vec<VulnerabilityFinding>,
    pub statistics: TraceStatistics,
}

impl WorkflowTrace {
    pub fn last_node_id(&self) -> Option<&str> {
        self.node_ids.last().map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStatistics {
    pub total_interactions: u64,
    pub total_prompts: u64,
    pub total_responses: u64,
    pub vulnerabilities_found: u64,
    pub probes_executed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub scan_id: ScanId,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
    pub traces: Vec<WorkflowTrace>,
    pub statistics: WorkflowStatistics,
    #[serde(default)]
    pub layout_hints: Metadata,
}

impl WorkflowGraph {
    pub fn new(scan_id: ScanId) -> Self {
        Self {
            scan_id,
            nodes: Vec::new(),
            edges: Vec::new(),
            traces: Vec::new(),
            statistics: WorkflowStatistics::default(),
            layout_hints: Metadata::new(),
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|node| node.node_id == node_id)
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut WorkflowNode> {
        self.nodes.iter_mut().find(|node| node.node_id == node_id)
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.node(node_id).is_some()
    }

    pub fn count_kind(&self, kind: NodeKind) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.node_type == kind)
            .count()
    }

    pub fn current_trace(&self) -> Option<&WorkflowTrace> {
        self.traces.last()
    }

    pub fn current_trace_mut(&mut self) -> Option<&mut WorkflowTrace> {
        self.traces.last_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub event_id: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub description: Option<String>,
    pub node_id: Option<String>,
    pub prompt: Option<String>,
    pub response: Option<String>,
    pub duration_ms: Option<f64>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_kinds_round_trip_through_strings() {
        for kind in NodeKind::ALL {
            assert_eq!(kind.as_str().parse::<NodeKind>().unwrap(), kind);
        }
        assert!(matches!(
            "widget".parse::<NodeKind>(),
            Err(ModelError::UnknownNodeKind(_))
        ));
        assert_eq!(
            serde_json::to_string(&NodeKind::LlmResponse).unwrap(),
            "\"llm_response\""
        );
    }

    #[test]
    fn edge_kind_parse_rejects_unknown() {
        assert_eq!("chain".parse::<EdgeKind>().unwrap(), EdgeKind::Chain);
        assert!("svg".parse::<EdgeKind>().is_err());
    }

    #[test]
    fn empty_graph_has_no_layout_hints() {
        let graph = WorkflowGraph::new(ScanId::from("scan"));
        assert!(graph.is_empty());
        assert!(graph.layout_hints.is_empty());
        assert!(graph.current_trace().is_none());
        assert_eq!(graph.count_kind(NodeKind::Probe), 0);
    }
}
