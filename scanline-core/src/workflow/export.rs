use std::fmt;
use std::str::FromStr;

use scanline_model::{EdgeKind, NodeKind, TimelineEvent, WorkflowGraph};

use crate::error::{Result, ScanError};

/// Supported workflow export encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Whole graph as pretty-printed JSON
    Json,
    /// Mermaid `graph TD` diagram
    Mermaid,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Mermaid => "mermaid",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "mermaid" => Ok(ExportFormat::Mermaid),
            _ => Err(ScanError::UnsupportedExportFormat(s.to_string())),
        }
    }
}

pub fn export(graph: &WorkflowGraph, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(graph)?),
        ExportFormat::Mermaid => Ok(to_mermaid(graph)),
    }
}

fn mermaid_shape(kind: NodeKind) -> (&'static str, &'static str) {
    match kind {
        NodeKind::Generator => ("(", ")"),
        NodeKind::Detector => ("{", "}"),
        NodeKind::LlmResponse => ("([", "])"),
        NodeKind::Vulnerability => ("[[", "]]"),
        NodeKind::Probe => ("[", "]"),
    }
}

pub fn to_mermaid(graph: &WorkflowGraph) -> String {
    let mut lines = vec!["graph TD".to_string()];
    for node in &graph.nodes {
        let (open, close) = mermaid_shape(node.node_type);
        let label = node.name.replace('"', "'");
        lines.push(format!("  {}{open}\"{label}\"{close}", node.node_id));
    }
    for edge in &graph.edges {
        lines.push(format!(
            "  {} -->|{}| {}",
            edge.source_id, edge.edge_type, edge.target_id
        ));
    }
    lines.join("\n")
}

/// Node-derived events in creation order.
pub fn timeline(graph: &WorkflowGraph) -> Vec<TimelineEvent> {
    let mut nodes: Vec<_> = graph.nodes.iter().collect();
    // stable, so equal timestamps keep insertion order
    nodes.sort_by_key(|node| node.timestamp);

    nodes
        .into_iter()
        .enumerate()
        .map(|(idx, node)| {
            let mut event = TimelineEvent {
                event_id: format!("event_{idx}"),
                event_type: node.node_type.to_string(),
                timestamp: node.timestamp,
                title: node.name.clone(),
                description: node.description.clone(),
                node_id: Some(node.node_id.clone()),
                prompt: None,
                response: None,
                duration_ms: node
                    .metadata
                    .get("latency_ms")
                    .and_then(|value| value.as_f64()),
                metadata: node.metadata.clone(),
            };
            for edge in graph.edges.iter().filter(|e| e.target_id == node.node_id) {
                match edge.edge_type {
                    EdgeKind::Prompt => event.prompt = Some(edge.full_content.clone()),
                    EdgeKind::Response => {
                        event.response = Some(edge.full_content.clone())
                    }
                    EdgeKind::Detection | EdgeKind::Chain => {}
                }
            }
            event
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use scanline_model::ScanId;

    use super::*;
    use crate::workflow::{WorkflowEvent, WorkflowGraphBuilder, WorkflowVocabulary};

    fn sample_graph() -> WorkflowGraph {
        let mut builder =
            WorkflowGraphBuilder::new(Arc::new(WorkflowVocabulary::default()));
        let mut graph = WorkflowGraph::new(ScanId::from("scan"));
        let start = Utc::now();
        let events = [
            WorkflowEvent::ProbeStart { probe: "dan.\"Dan\"".into() },
            WorkflowEvent::GeneratorSelected { generator: "openai".into() },
            WorkflowEvent::PromptIssued { prompt: "be evil".into() },
            WorkflowEvent::ModelResponse {
                response: "no".into(),
                tokens: None,
                latency_ms: Some(12.5),
            },
            WorkflowEvent::DetectorInvoked { detector: "dan.DAN".into() },
            WorkflowEvent::VulnerabilitySignal { evidence: "FAIL jailbreak".into() },
        ];
        for (offset, event) in events.iter().enumerate() {
            builder.apply(&mut graph, event, start + Duration::milliseconds(offset as i64));
        }
        graph
    }

    #[test]
    fn format_parsing_rejects_unknown() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("mermaid".parse::<ExportFormat>().unwrap(), ExportFormat::Mermaid);
        assert!(matches!(
            "svg".parse::<ExportFormat>(),
            Err(ScanError::UnsupportedExportFormat(f)) if f == "svg"
        ));
    }

    #[test]
    fn mermaid_uses_shape_per_node_type() {
        let mermaid = to_mermaid(&sample_graph());
        let lines: Vec<_> = mermaid.lines().collect();
        assert_eq!(lines[0], "graph TD");
        assert_eq!(lines[1], "  probe_1[\"dan.'Dan'\"]");
        assert_eq!(lines[2], "  gen_1(\"openai\")");
        assert_eq!(lines[3], "  llm_1([\"unknown response\"])");
        assert_eq!(lines[4], "  det_1{\"dan.DAN\"}");
        assert_eq!(lines[5], "  vuln_1[[\"Vulnerability Found\"]]");
        assert_eq!(lines[6], "  probe_1 -->|chain| gen_1");
        assert!(lines.contains(&"  det_1 -->|detection| vuln_1"));
    }

    #[test]
    fn json_export_round_trips() {
        let graph = sample_graph();
        let json = export(&graph, ExportFormat::Json).unwrap();
        let parsed: WorkflowGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, graph);
    }

    #[test]
    fn timeline_is_ordered_and_carries_edge_content() {
        let graph = sample_graph();
        let events = timeline(&graph);
        assert_eq!(events.len(), 5);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(events[0].event_id, "event_0");
        assert_eq!(events[0].event_type, "probe");

        let llm = &events[2];
        assert_eq!(llm.event_type, "llm_response");
        assert_eq!(llm.prompt.as_deref(), Some("be evil"));
        assert_eq!(llm.duration_ms, Some(12.5));

        let detector = &events[3];
        assert_eq!(detector.response.as_deref(), Some("no"));
    }

    #[test]
    fn equal_timestamps_keep_insertion_order() {
        let mut builder =
            WorkflowGraphBuilder::new(Arc::new(WorkflowVocabulary::default()));
        let mut graph = WorkflowGraph::new(ScanId::from("scan"));
        let at = Utc::now();
        for probe in ["a", "b", "c"] {
            builder.apply(&mut graph, &WorkflowEvent::ProbeStart { probe: probe.into() }, at);
        }
        let titles: Vec<_> = timeline(&graph).into_iter().map(|e| e.title).collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
    }
}
