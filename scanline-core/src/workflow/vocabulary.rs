use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// Raw trigger patterns for workflow events.
///
/// The scanner's log wording changes between releases, so every pattern can
/// be overridden from configuration. Missing fields fall back to the
/// defaults below when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VocabularyPatterns {
    pub probe_start: String,
    pub probe_complete: String,
    pub generator: String,
    pub prompt: String,
    pub model_invoked: String,
    pub model_response: String,
    pub detector: String,
    pub detector_result: String,
    pub vulnerability: String,
    pub tokens: String,
    pub latency: String,
}

impl Default for VocabularyPatterns {
    fn default() -> Self {
        Self {
            probe_start: r"garak\.probes\.(\S+)\s+starting".into(),
            probe_complete: r"garak\.probes\.(\S+)\s+(?:completed|complete)".into(),
            generator: r"(?:Using generator|Generator):\s*(?:garak\.generators\.)?(\S+)"
                .into(),
            prompt: r"(?:Prompt|Generating|prompt)\s*(?:\d+)?:?\s*(.+)".into(),
            model_invoked: r"Sending to model:\s*(\S+)".into(),
            model_response: r"(?:Model response|response|Response)(?:\s*\(.*?\))?:\s*(.+)"
                .into(),
            detector: r"(?:Running detector|Detector):\s*(?:garak\.detectors\.)?(\S+)"
                .into(),
            detector_result: r"(?:Detector result|Result):\s*(PASS|FAIL)".into(),
            vulnerability: r"(?i)(?:🚨|Vulnerability found|FAIL).*?(?:Jailbreak|injection|bypass|leak)"
                .into(),
            tokens: r"(\d+)\s*tokens?".into(),
            latency: r"(\d+(?:\.\d+)?)\s*(milliseconds?|ms|seconds?|secs?|s)\b".into(),
        }
    }
}

/// Compiled trigger patterns.
#[derive(Debug, Clone)]
pub struct WorkflowVocabulary {
    pub(crate) probe_start: Regex,
    pub(crate) probe_complete: Regex,
    pub(crate) generator: Regex,
    pub(crate) prompt: Regex,
    pub(crate) model_invoked: Regex,
    pub(crate) model_response: Regex,
    pub(crate) detector: Regex,
    pub(crate) detector_result: Regex,
    pub(crate) vulnerability: Regex,
    pub(crate) tokens: Regex,
    pub(crate) latency: Regex,
}

fn compile(name: &'static str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| ScanError::InvalidPattern { name, source })
}

impl WorkflowVocabulary {
    pub fn compile(patterns: &VocabularyPatterns) -> Result<Self> {
        Ok(Self {
            probe_start: compile("probe_start", &patterns.probe_start)?,
            probe_complete: compile("probe_complete", &patterns.probe_complete)?,
            generator: compile("generator", &patterns.generator)?,
            prompt: compile("prompt", &patterns.prompt)?,
            model_invoked: compile("model_invoked", &patterns.model_invoked)?,
            model_response: compile("model_response", &patterns.model_response)?,
            detector: compile("detector", &patterns.detector)?,
            detector_result: compile("detector_result", &patterns.detector_result)?,
            vulnerability: compile("vulnerability", &patterns.vulnerability)?,
            tokens: compile("tokens", &patterns.tokens)?,
            latency: compile("latency", &patterns.latency)?,
        })
    }
}

impl Default for WorkflowVocabulary {
    fn default() -> Self {
        Self::compile(&VocabularyPatterns::default())
            .expect("default workflow vocabulary should compile")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_compile() {
        let vocabulary = WorkflowVocabulary::default();
        assert!(vocabulary.probe_start.is_match("garak.probes.dan.Dan_11_0 starting"));
    }

    #[test]
    fn partial_overrides_keep_defaults() {
        let patterns: VocabularyPatterns =
            serde_json::from_str(r#"{"probe_start": "probe (\\S+) begins"}"#).unwrap();
        assert_eq!(patterns.probe_start, r"probe (\S+) begins");
        assert_eq!(patterns.tokens, VocabularyPatterns::default().tokens);
        assert!(WorkflowVocabulary::compile(&patterns).is_ok());
    }

    #[test]
    fn invalid_override_names_the_pattern() {
        let patterns = VocabularyPatterns {
            detector: "(unclosed".into(),
            ..VocabularyPatterns::default()
        };
        let err = WorkflowVocabulary::compile(&patterns).unwrap_err();
        assert!(matches!(err, ScanError::InvalidPattern { name: "detector", .. }));
    }
}
