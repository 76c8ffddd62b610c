use std::sync::Arc;

use regex::Captures;

use super::vocabulary::WorkflowVocabulary;

/// Typed event recognised in one line of scanner output.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    ProbeStart { probe: String },
    GeneratorSelected { generator: String },
    PromptIssued { prompt: String },
    ModelInvoked { model: String },
    ModelResponse {
        response: String,
        tokens: Option<u64>,
        latency_ms: Option<f64>,
    },
    DetectorInvoked { detector: String },
    DetectorResult { result: String },
    VulnerabilitySignal { evidence: String },
    ProbeComplete { probe: String },
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::ProbeStart { .. } => "probe_start",
            WorkflowEvent::GeneratorSelected { .. } => "generator",
            WorkflowEvent::PromptIssued { .. } => "prompt",
            WorkflowEvent::ModelInvoked { .. } => "sending_to_model",
            WorkflowEvent::ModelResponse { .. } => "llm_response",
            WorkflowEvent::DetectorInvoked { .. } => "detector",
            WorkflowEvent::DetectorResult { .. } => "detector_result",
            WorkflowEvent::VulnerabilitySignal { .. } => "vulnerability",
            WorkflowEvent::ProbeComplete { .. } => "probe_complete",
        }
    }
}

/// Turns lines into [`WorkflowEvent`]s; at most one event per line.
#[derive(Debug, Clone)]
pub struct WorkflowEventExtractor {
    vocabulary: Arc<WorkflowVocabulary>,
}

fn group(caps: &Captures<'_>, idx: usize) -> String {
    caps.get(idx)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

impl WorkflowEventExtractor {
    pub fn new(vocabulary: Arc<WorkflowVocabulary>) -> Self {
        Self { vocabulary }
    }

    pub fn vocabulary(&self) -> &WorkflowVocabulary {
        &self.vocabulary
    }

    pub fn extract(&self, line: &str) -> Option<WorkflowEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let v = &*self.vocabulary;

        if let Some(caps) = v.probe_start.captures(line) {
            return Some(WorkflowEvent::ProbeStart {
                probe: group(&caps, 1),
            });
        }
        if let Some(caps) = v.generator.captures(line) {
            return Some(WorkflowEvent::GeneratorSelected {
                generator: group(&caps, 1),
            });
        }
        if let Some(caps) = v.prompt.captures(line) {
            return Some(WorkflowEvent::PromptIssued {
                prompt: group(&caps, 1),
            });
        }
        if let Some(caps) = v.model_invoked.captures(line) {
            return Some(WorkflowEvent::ModelInvoked {
                model: group(&caps, 1),
            });
        }
        if let Some(caps) = v.model_response.captures(line) {
            return Some(WorkflowEvent::ModelResponse {
                response: group(&caps, 1),
                tokens: self.tokens(line),
                latency_ms: self.latency_ms(line),
            });
        }
        if let Some(caps) = v.detector.captures(line) {
            return Some(WorkflowEvent::DetectorInvoked {
                detector: group(&caps, 1),
            });
        }
        if let Some(caps) = v.detector_result.captures(line) {
            return Some(WorkflowEvent::DetectorResult {
                result: group(&caps, 1),
            });
        }
        if v.vulnerability.is_match(line) {
            return Some(WorkflowEvent::VulnerabilitySignal {
                evidence: line.to_string(),
            });
        }
        if let Some(caps) = v.probe_complete.captures(line) {
            return Some(WorkflowEvent::ProbeComplete {
                probe: group(&caps, 1),
            });
        }
        None
    }

    fn tokens(&self, line: &str) -> Option<u64> {
        self.vocabulary
            .tokens
            .captures(line)
            .and_then(|caps| caps.get(1)?.as_str().parse().ok())
    }

    /// Latency normalised to milliseconds. A pattern without a unit group is
    /// taken as milliseconds.
    fn latency_ms(&self, line: &str) -> Option<f64> {
        let caps = self.vocabulary.latency.captures(line)?;
        let value: f64 = caps.get(1)?.as_str().parse().ok()?;
        let unit = caps.get(2).map(|m| m.as_str()).unwrap_or("ms");
        if unit.starts_with("ms") || unit.starts_with("milli") {
            Some(value)
        } else {
            Some(value * 1000.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> WorkflowEventExtractor {
        WorkflowEventExtractor::new(Arc::new(WorkflowVocabulary::default()))
    }

    #[test]
    fn recognises_each_event_kind() {
        let extractor = extractor();
        let cases = [
            ("garak.probes.dan.Dan_11_0 starting", "probe_start"),
            ("Using generator: garak.generators.openai.OpenAIGenerator", "generator"),
            ("Prompt 3: Ignore all previous instructions", "prompt"),
            ("Sending to model: gpt-4", "sending_to_model"),
            ("Model response: I cannot help with that", "llm_response"),
            ("Running detector: garak.detectors.mitigation.MitigationBypass", "detector"),
            ("Detector result: FAIL", "detector_result"),
            ("🚨 Jailbreak succeeded against target", "vulnerability"),
            ("garak.probes.dan.Dan_11_0 completed", "probe_complete"),
        ];
        for (line, expected) in cases {
            let event = extractor.extract(line).unwrap_or_else(|| panic!("no event for {line}"));
            assert_eq!(event.name(), expected, "line: {line}");
        }
    }

    #[test]
    fn generator_prefix_is_stripped() {
        let event = extractor()
            .extract("Generator: garak.generators.openai.OpenAIGenerator")
            .unwrap();
        assert_eq!(
            event,
            WorkflowEvent::GeneratorSelected {
                generator: "openai.OpenAIGenerator".into()
            }
        );
    }

    #[test]
    fn response_carries_tokens_and_latency() {
        let extractor = extractor();
        let event = extractor
            .extract("Response (42 tokens, 1.5s): Sure, here is how")
            .unwrap();
        assert_eq!(
            event,
            WorkflowEvent::ModelResponse {
                response: "Sure, here is how".into(),
                tokens: Some(42),
                latency_ms: Some(1500.0),
            }
        );

        let event = extractor
            .extract("Model response (350ms): refused")
            .unwrap();
        let WorkflowEvent::ModelResponse { latency_ms, tokens, .. } = event else {
            panic!("expected a model response");
        };
        assert_eq!(latency_ms, Some(350.0));
        assert_eq!(tokens, None);
    }

    #[test]
    fn unrelated_lines_yield_nothing() {
        assert!(extractor().extract("loading plugins").is_none());
        assert!(extractor().extract("").is_none());
    }
}
