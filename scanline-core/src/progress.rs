//! Progress extraction from scanner output lines.
//!
//! Each line runs through [`PROGRESS_RULES`] in order. Terminal rules stop the
//! cascade once they match; annotating rules record their effect and let the
//! line continue, so a detector completion line can both bump the probe
//! counter and feed the pass/fail tally.

use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use scanline_model::ScanStatus;
use tracing::{debug, error, info, trace, warn};

use crate::state::ScanState;

static UNKNOWN_PROBES_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Unknown probes.*?:\s*(.+)")
        .expect("unknown probes regex should compile")
});
static ERROR_WORD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)error|failed").expect("error word regex should compile")
});
static FAILED_COUNTER_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^failed:\s*\d+")
        .expect("failed counter prefix regex should compile")
});
static FULL_PROGRESS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(probes\.\S+):\s+(\d+)%\|[^|]*\|\s*(\d+)/(\d+)\s+\[([^<]+)<([^,]+),")
        .expect("full progress regex should compile")
});
static SIMPLE_PROGRESS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(probes\.\S+):\s+(\d+)%")
        .expect("simple progress regex should compile")
});
static PROBE_ORDINAL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)\s+(\d+)/(\d+)\s+\[")
        .expect("probe ordinal regex should compile")
});
static PROBE_COMPLETION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([\w\.]+)\s+([\w\.]+):\s+(PASS|FAIL)")
        .expect("probe completion regex should compile")
});
static TALLY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)\s*/\s*(\d+)").expect("tally regex should compile")
});
static HTML_REPORT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"report html summary being written to\s+(.+\.html)")
        .expect("html report regex should compile")
});
static JSONL_REPORT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"report closed.*?([/\w\-\.]+\.jsonl)")
        .expect("jsonl report regex should compile")
});
static PASSED_COUNTER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)passed[:\s]+(\d+)")
        .expect("passed counter regex should compile")
});
static FAILED_COUNTER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)failed[:\s]+(\d+)")
        .expect("failed counter regex should compile")
});

/// One step of the progress cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressRule {
    UnknownProbes,
    ErrorMarker,
    FullProgressBar,
    SimpleProgress,
    ProbeOrdinal,
    ProbeCompletion,
    BareProbeToken,
    DetectorTally,
    ReportPath,
    CounterFallback,
}

/// What happens to the cascade after a rule matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFlow {
    Stop,
    Continue,
}

/// Evaluation order. Changing it changes which rule wins a line.
pub const PROGRESS_RULES: [ProgressRule; 10] = [
    ProgressRule::UnknownProbes,
    ProgressRule::ErrorMarker,
    ProgressRule::FullProgressBar,
    ProgressRule::SimpleProgress,
    ProgressRule::ProbeOrdinal,
    ProgressRule::ProbeCompletion,
    ProgressRule::BareProbeToken,
    ProgressRule::DetectorTally,
    ProgressRule::ReportPath,
    ProgressRule::CounterFallback,
];

impl ProgressRule {
    pub fn flow(self) -> RuleFlow {
        match self {
            ProgressRule::ErrorMarker
            | ProgressRule::ProbeCompletion
            | ProgressRule::BareProbeToken => RuleFlow::Continue,
            _ => RuleFlow::Stop,
        }
    }

    pub fn is_progress_bar(self) -> bool {
        matches!(
            self,
            ProgressRule::FullProgressBar | ProgressRule::SimpleProgress
        )
    }
}

/// Rules that matched a single line, in evaluation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressOutcome {
    pub matched: Vec<ProgressRule>,
}

impl ProgressOutcome {
    /// Nothing recognised the line. Expected for most scanner chatter.
    pub fn is_unmatched(&self) -> bool {
        self.matched.is_empty()
    }

    pub fn is_progress_bar(&self) -> bool {
        self.matched.iter().any(|rule| rule.is_progress_bar())
    }

    pub fn contains(&self, rule: ProgressRule) -> bool {
        self.matched.contains(&rule)
    }
}

/// Stateful per-scan line matcher.
#[derive(Debug, Default)]
pub struct ProgressExtractor {
    last_completed_probe: Option<String>,
}

impl ProgressExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_completed_probe(&self) -> Option<&str> {
        self.last_completed_probe.as_deref()
    }

    /// Applies one logical line to `state`.
    pub fn apply(&mut self, line: &str, state: &mut ScanState) -> ProgressOutcome {
        let mut outcome = ProgressOutcome::default();
        let line = line.trim();
        if line.is_empty() {
            return outcome;
        }

        for rule in PROGRESS_RULES {
            if !self.apply_rule(rule, line, state) {
                continue;
            }
            outcome.matched.push(rule);
            if rule.flow() == RuleFlow::Stop {
                break;
            }
        }

        if outcome.is_unmatched() {
            trace!(scan_id = %state.scan_id, "No progress pattern matched: {}", line);
        }
        outcome
    }

    fn apply_rule(
        &mut self,
        rule: ProgressRule,
        line: &str,
        state: &mut ScanState,
    ) -> bool {
        match rule {
            ProgressRule::UnknownProbes => unknown_probes(line, state),
            ProgressRule::ErrorMarker => error_marker(line, state),
            ProgressRule::FullProgressBar => full_progress_bar(line, state),
            ProgressRule::SimpleProgress => simple_progress(line, state),
            ProgressRule::ProbeOrdinal => probe_ordinal(line, state),
            ProgressRule::ProbeCompletion => self.probe_completion(line, state),
            ProgressRule::BareProbeToken => bare_probe_token(line, state),
            ProgressRule::DetectorTally => detector_tally(line, state),
            ProgressRule::ReportPath => report_path(line, state),
            ProgressRule::CounterFallback => counter_fallback(line, state),
        }
    }

    fn probe_completion(&mut self, line: &str, state: &mut ScanState) -> bool {
        let Some(caps) = PROBE_COMPLETION_PATTERN.captures(line) else {
            return false;
        };
        let probe = &caps[1];
        if self.last_completed_probe.as_deref() != Some(probe) {
            state.completed_probes += 1;
            self.last_completed_probe = Some(probe.to_string());
            info!(
                scan_id = %state.scan_id,
                "Probe completed: {} ({}/{})",
                probe, state.completed_probes, state.total_probes
            );
        }
        true
    }
}

fn unknown_probes(line: &str, state: &mut ScanState) -> bool {
    if !line.contains("Unknown probes") {
        return false;
    }
    let message = match UNKNOWN_PROBES_PATTERN.captures(line) {
        Some(caps) => format!("Unknown probes: {}", caps[1].trim()),
        None => "Unknown probes".to_string(),
    };
    // outranks whatever the generic error latch already holds
    error!(scan_id = %state.scan_id, "{}", message);
    state.status = ScanStatus::Failed;
    state.error_message = Some(message);
    true
}

/// `❌`, or ERROR/FAILED anywhere in the line regardless of case. A
/// `failed: N` counter is a tally, not an error.
fn has_error_marker(line: &str) -> bool {
    if line.contains('❌') {
        return true;
    }
    ERROR_WORD_PATTERN.find_iter(line).any(|found| {
        !(found.as_str().eq_ignore_ascii_case("failed")
            && FAILED_COUNTER_PREFIX.is_match(&line[found.start()..]))
    })
}

fn error_marker(line: &str, state: &mut ScanState) -> bool {
    if !has_error_marker(line) {
        return false;
    }
    if state.latch_error(line) {
        error!(scan_id = %state.scan_id, "Scanner reported an error: {}", line);
    }
    true
}

fn full_progress_bar(line: &str, state: &mut ScanState) -> bool {
    let Some(caps) = FULL_PROGRESS_PATTERN.captures(line) else {
        return false;
    };
    let (Ok(percent), Ok(current), Ok(total)) = (
        caps[2].parse::<u32>(),
        caps[3].parse::<u32>(),
        caps[4].parse::<u32>(),
    ) else {
        return false;
    };

    state.current_probe = Some(caps[1].to_string());
    state.progress = f64::from(percent);
    state.current_iteration = current;
    state.total_iterations = total;
    state.elapsed_time = Some(caps[5].trim().to_string());
    state.estimated_remaining = Some(caps[6].trim().to_string());
    debug!(
        scan_id = %state.scan_id,
        "Progress update: {} at {}% ({}/{})",
        &caps[1], percent, current, total
    );
    true
}

fn simple_progress(line: &str, state: &mut ScanState) -> bool {
    let Some(caps) = SIMPLE_PROGRESS_PATTERN.captures(line) else {
        return false;
    };
    let Ok(percent) = caps[2].parse::<u32>() else {
        return false;
    };
    state.current_probe = Some(caps[1].to_string());
    state.progress = f64::from(percent);
    debug!(scan_id = %state.scan_id, "Progress: {} at {}%", &caps[1], percent);
    true
}

// Counts which probe of the run is active; never touches the percentage.
fn probe_ordinal(line: &str, state: &mut ScanState) -> bool {
    if line.contains("probes.") || line.contains('%') {
        return false;
    }
    let Some(caps) = PROBE_ORDINAL_PATTERN.captures(line) else {
        return false;
    };
    let (Ok(completed), Ok(total)) = (caps[2].parse::<u32>(), caps[3].parse::<u32>())
    else {
        return false;
    };
    state.completed_probes = completed;
    state.total_probes = total;
    info!(scan_id = %state.scan_id, "Probe count: {}/{}", completed, total);
    true
}

fn bare_probe_token(line: &str, state: &mut ScanState) -> bool {
    let Some(token) = line
        .split_whitespace()
        .find(|token| token.starts_with("probes."))
    else {
        return false;
    };
    state.current_probe =
        Some(token.trim_end_matches([':', ',', ';']).to_string());
    true
}

fn detector_tally(line: &str, state: &mut ScanState) -> bool {
    let upper = line.to_uppercase();
    if !(upper.contains("PASS") || upper.contains("FAIL")) {
        return false;
    }
    if !line.to_lowercase().contains("ok on") {
        return false;
    }
    let Some(caps) = TALLY_PATTERN.captures(line) else {
        warn!(
            scan_id = %state.scan_id,
            "Found 'ok on' but could not extract numbers from: {}", line
        );
        return false;
    };
    let (Ok(passed), Ok(total)) = (caps[1].parse::<u64>(), caps[2].parse::<u64>())
    else {
        return false;
    };
    let failed = total.saturating_sub(passed);
    state.passed += passed;
    state.failed += failed;
    info!(
        scan_id = %state.scan_id,
        "Detector tally: {} passed, {} failed of {} (running total {} passed, {} failed)",
        passed, failed, total, state.passed, state.failed
    );
    true
}

fn report_path(line: &str, state: &mut ScanState) -> bool {
    if let Some(caps) = HTML_REPORT_PATTERN.captures(line) {
        let path = PathBuf::from(caps[1].trim());
        info!(scan_id = %state.scan_id, "HTML report path: {}", path.display());
        state.html_report_path = Some(path);
        return true;
    }
    if let Some(caps) = JSONL_REPORT_PATTERN.captures(line) {
        let path = PathBuf::from(caps[1].trim());
        info!(scan_id = %state.scan_id, "JSONL report path: {}", path.display());
        state.jsonl_report_path = Some(path);
        return true;
    }
    false
}

fn counter_fallback(line: &str, state: &mut ScanState) -> bool {
    let mut matched = false;
    if let Some(passed) = PASSED_COUNTER_PATTERN
        .captures(line)
        .and_then(|caps| caps[1].parse::<u64>().ok())
    {
        state.passed = passed;
        matched = true;
    }
    if let Some(failed) = FAILED_COUNTER_PATTERN
        .captures(line)
        .and_then(|caps| caps[1].parse::<u64>().ok())
    {
        state.failed = failed;
        matched = true;
    }
    matched
}
