use std::sync::Arc;

use chrono::{DateTime, Utc};
use scanline_model::{
    EdgeKind, Metadata, NodeKind, VulnerabilityFinding, WorkflowEdge,
    WorkflowGraph, WorkflowNode, WorkflowTrace,
};
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use super::extractor::{WorkflowEvent, WorkflowEventExtractor};
use super::vocabulary::WorkflowVocabulary;

const PREVIEW_CHARS: usize = 100;
const DEFAULT_SEVERITY: &str = "high";

fn preview(content: &str) -> String {
    content.chars().take(PREVIEW_CHARS).collect()
}

/// Context carried between events of the trace being built. Never persisted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TraceCursor {
    pub pending_prompt: Option<String>,
    pub pending_model: Option<String>,
    pub last_response: Option<String>,
}

impl TraceCursor {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

struct EdgeSpec {
    kind: EdgeKind,
    preview: String,
    full_content: String,
    metadata: Metadata,
}

/// Builds one scan's [`WorkflowGraph`] from its output lines.
#[derive(Debug, Clone)]
pub struct WorkflowGraphBuilder {
    extractor: WorkflowEventExtractor,
    cursor: TraceCursor,
}

impl WorkflowGraphBuilder {
    pub fn new(vocabulary: Arc<WorkflowVocabulary>) -> Self {
        Self {
            extractor: WorkflowEventExtractor::new(vocabulary),
            cursor: TraceCursor::default(),
        }
    }

    pub fn cursor(&self) -> &TraceCursor {
        &self.cursor
    }

    /// Extracts an event from `line` and applies it. Returns the event, if any.
    pub fn process_line(
        &mut self,
        graph: &mut WorkflowGraph,
        line: &str,
    ) -> Option<WorkflowEvent> {
        let event = self.extractor.extract(line)?;
        self.apply(graph, &event, Utc::now());
        Some(event)
    }

    /// Applies `event` to `graph`, returning the id of the node it created.
    pub fn apply(
        &mut self,
        graph: &mut WorkflowGraph,
        event: &WorkflowEvent,
        at: DateTime<Utc>,
    ) -> Option<String> {
        debug!(scan_id = %graph.scan_id, event = event.name(), "Workflow event");
        match event {
            WorkflowEvent::ProbeStart { probe } => {
                Some(self.probe_start(graph, probe, at))
            }
            WorkflowEvent::GeneratorSelected { generator } => {
                let node_id = push_node(
                    graph,
                    NodeKind::Generator,
                    generator.clone(),
                    format!("Prompt generator: {generator}"),
                    Metadata::new(),
                    at,
                );
                append_to_trace(
                    graph,
                    &node_id,
                    EdgeSpec {
                        kind: EdgeKind::Chain,
                        preview: "Initiating generator".into(),
                        full_content: String::new(),
                        metadata: Metadata::new(),
                    },
                );
                Some(node_id)
            }
            WorkflowEvent::PromptIssued { prompt } => {
                graph.statistics.total_prompts += 1;
                graph.statistics.total_interactions += 1;
                if graph.current_trace().is_some()
                    && self.cursor.pending_prompt.is_none()
                {
                    self.cursor.pending_prompt = Some(prompt.clone());
                }
                None
            }
            WorkflowEvent::ModelInvoked { model } => {
                if graph.current_trace().is_some()
                    && self.cursor.pending_model.is_none()
                {
                    self.cursor.pending_model = Some(model.clone());
                }
                None
            }
            WorkflowEvent::ModelResponse {
                response,
                tokens,
                latency_ms,
            } => Some(self.model_response(graph, response, *tokens, *latency_ms, at)),
            WorkflowEvent::DetectorInvoked { detector } => {
                let node_id = push_node(
                    graph,
                    NodeKind::Detector,
                    detector.clone(),
                    format!("Detector: {detector}"),
                    Metadata::new(),
                    at,
                );
                let response = self.cursor.last_response.clone().unwrap_or_default();
                append_to_trace(
                    graph,
                    &node_id,
                    EdgeSpec {
                        kind: EdgeKind::Response,
                        preview: preview(&response),
                        full_content: response,
                        metadata: Metadata::new(),
                    },
                );
                Some(node_id)
            }
            WorkflowEvent::DetectorResult { result } => {
                if let Some(node) = graph
                    .nodes
                    .iter_mut()
                    .rev()
                    .find(|node| node.node_type == NodeKind::Detector)
                {
                    node.metadata
                        .insert("result".into(), Value::String(result.clone()));
                }
                None
            }
            WorkflowEvent::VulnerabilitySignal { evidence } => {
                Some(vulnerability(graph, evidence, at))
            }
            WorkflowEvent::ProbeComplete { probe } => {
                if let Some(node) = graph.nodes.iter_mut().find(|node| {
                    node.node_type == NodeKind::Probe
                        && node.name.contains(probe.as_str())
                }) {
                    node.metadata.insert("status".into(), json!("completed"));
                    node.metadata
                        .insert("completed_at".into(), json!(at.to_rfc3339()));
                }
                None
            }
        }
    }

    fn probe_start(
        &mut self,
        graph: &mut WorkflowGraph,
        probe: &str,
        at: DateTime<Utc>,
    ) -> String {
        let mut metadata = Metadata::new();
        metadata.insert("status".into(), json!("running"));
        let node_id = push_node(
            graph,
            NodeKind::Probe,
            probe.to_string(),
            format!("Security probe: {probe}"),
            metadata,
            at,
        );
        graph.statistics.probes_executed += 1;

        let mut trace = WorkflowTrace {
            trace_id: Uuid::new_v4().to_string(),
            scan_id: graph.scan_id.clone(),
            probe_name: probe.to_string(),
            node_ids: vec![node_id.clone()],
            edge_ids: Vec::new(),
            vulnerability_findings: Vec::new(),
            statistics: Default::default(),
        };
        trace.statistics.nodes = 1;
        graph.traces.push(trace);
        self.cursor.reset();
        node_id
    }

    fn model_response(
        &mut self,
        graph: &mut WorkflowGraph,
        response: &str,
        tokens: Option<u64>,
        latency_ms: Option<f64>,
        at: DateTime<Utc>,
    ) -> String {
        let model = self
            .cursor
            .pending_model
            .take()
            .unwrap_or_else(|| "unknown".to_string());
        let prompt = self.cursor.pending_prompt.take().unwrap_or_default();

        let mut metadata = Metadata::new();
        metadata.insert("model".into(), json!(model));
        if let Some(tokens) = tokens {
            metadata.insert("tokens".into(), json!(tokens));
        }
        if let Some(latency_ms) = latency_ms {
            metadata.insert("latency_ms".into(), json!(latency_ms));
        }

        let node_id = push_node(
            graph,
            NodeKind::LlmResponse,
            format!("{model} response"),
            format!("LLM response from {model}"),
            metadata,
            at,
        );
        graph.statistics.total_responses += 1;

        let mut edge_metadata = Metadata::new();
        edge_metadata.insert("prompt".into(), json!(prompt));
        let edge_preview = if prompt.is_empty() {
            preview(response)
        } else {
            preview(&prompt)
        };
        append_to_trace(
            graph,
            &node_id,
            EdgeSpec {
                kind: EdgeKind::Prompt,
                preview: edge_preview,
                full_content: prompt,
                metadata: edge_metadata,
            },
        );

        if let Some(trace) = graph.current_trace_mut() {
            trace.statistics.responses += 1;
            self.cursor.last_response = Some(response.to_string());
        }
        node_id
    }
}

fn vulnerability(
    graph: &mut WorkflowGraph,
    evidence: &str,
    at: DateTime<Utc>,
) -> String {
    let mut metadata = Metadata::new();
    metadata.insert("severity".into(), json!(DEFAULT_SEVERITY));
    let node_id = push_node(
        graph,
        NodeKind::Vulnerability,
        "Vulnerability Found".to_string(),
        evidence.to_string(),
        metadata.clone(),
        at,
    );
    graph.statistics.vulnerabilities_found += 1;

    append_to_trace(
        graph,
        &node_id,
        EdgeSpec {
            kind: EdgeKind::Detection,
            preview: "Vulnerability detected".into(),
            full_content: evidence.to_string(),
            metadata,
        },
    );

    if let Some(trace) = graph.current_trace_mut() {
        trace.statistics.vulnerabilities += 1;
        trace.vulnerability_findings.push(VulnerabilityFinding {
            vulnerability_type: "Security Issue".into(),
            severity: DEFAULT_SEVERITY.into(),
            probe_name: trace.probe_name.clone(),
            node_path: trace.node_ids.clone(),
            evidence: evidence.to_string(),
        });
    }
    node_id
}

fn push_node(
    graph: &mut WorkflowGraph,
    kind: NodeKind,
    name: String,
    description: String,
    metadata: Metadata,
    at: DateTime<Utc>,
) -> String {
    let node_id = format!("{}_{}", kind.id_prefix(), graph.count_kind(kind) + 1);
    graph.nodes.push(WorkflowNode {
        node_id: node_id.clone(),
        node_type: kind,
        name,
        description: Some(description),
        metadata,
        timestamp: at,
    });
    node_id
}

/// Appends `node_id` to the open trace and links it from the trace's
/// previous node. No trace open means no edge.
fn append_to_trace(graph: &mut WorkflowGraph, node_id: &str, spec: EdgeSpec) {
    let Some(trace) = graph.traces.last_mut() else {
        return;
    };
    trace.node_ids.push(node_id.to_string());
    trace.statistics.nodes += 1;

    let len = trace.node_ids.len();
    if len < 2 {
        return;
    }
    let edge = WorkflowEdge {
        edge_id: Uuid::new_v4().to_string(),
        source_id: trace.node_ids[len - 2].clone(),
        target_id: node_id.to_string(),
        edge_type: spec.kind,
        content_preview: spec.preview,
        full_content: spec.full_content,
        metadata: spec.metadata,
    };
    trace.edge_ids.push(edge.edge_id.clone());
    trace.statistics.edges += 1;
    graph.edges.push(edge);
}
