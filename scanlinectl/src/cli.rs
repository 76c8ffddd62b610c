use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};
use scanline_core::ExportFormat;
use scanline_model::{Metadata, ScanConfig};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "scanlinectl", version)]
#[command(about = "Run garak scans with live progress and workflow graphs")]
pub struct Cli {
    /// Path to scanline.toml (default: ./scanline.toml or ./config/scanline.toml)
    #[arg(long, global = true, env = "SCANLINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to a .env file loaded before reading SCANLINE_* variables
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a scan and follow it until it finishes. Ctrl-C cancels it.
    Run(RunArgs),
    /// Show a finished scan from the runs directory
    Status {
        scan_id: String,
    },
    /// Show pass/fail results of a finished scan
    Results {
        scan_id: String,
    },
    /// List scans found in the runs directory, newest first
    List,
    /// Print the scanner version
    Version,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Generator type, e.g. openai or huggingface
    #[arg(long)]
    pub target_type: String,

    /// Model name, e.g. gpt-3.5-turbo
    #[arg(long)]
    pub target_name: String,

    /// Comma-separated probe list
    #[arg(long, value_delimiter = ',', default_value = "all")]
    pub probes: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    pub detectors: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    pub buffs: Vec<String>,

    #[arg(long, default_value_t = 5)]
    pub generations: u32,

    #[arg(long, default_value_t = 0.5)]
    pub eval_threshold: f64,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub parallel_requests: Option<u32>,

    #[arg(long)]
    pub parallel_attempts: Option<u32>,

    /// JSON object passed through as --generator_options
    #[arg(long, value_parser = parse_json_object)]
    pub generator_options: Option<Metadata>,

    /// JSON object passed through as --probe_options
    #[arg(long, value_parser = parse_json_object)]
    pub probe_options: Option<Metadata>,

    #[arg(long)]
    pub report_prefix: Option<String>,

    /// How often progress is polled, e.g. 500ms or 2s
    #[arg(long, default_value = "500ms", value_parser = humantime::parse_duration)]
    pub poll: Duration,

    /// Export the workflow graph when the scan ends (json or mermaid)
    #[arg(long, value_parser = parse_export_format)]
    pub workflow_format: Option<ExportFormat>,

    /// Write the workflow export here instead of stdout
    #[arg(long, requires = "workflow_format")]
    pub workflow_out: Option<PathBuf>,
}

impl RunArgs {
    pub fn scan_config(&self) -> ScanConfig {
        let non_empty = |items: &[String]| {
            let items: Vec<String> = items
                .iter()
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect();
            (!items.is_empty()).then_some(items)
        };

        let mut config = ScanConfig::new(&self.target_type, &self.target_name)
            .with_probes(non_empty(&self.probes).unwrap_or_default());
        config.detectors = non_empty(&self.detectors);
        config.buffs = non_empty(&self.buffs);
        config.generations = self.generations;
        config.eval_threshold = self.eval_threshold;
        config.seed = self.seed;
        config.parallel_requests = self.parallel_requests;
        config.parallel_attempts = self.parallel_attempts;
        config.generator_options = self.generator_options.clone();
        config.probe_options = self.probe_options.clone();
        config.report_prefix = self.report_prefix.clone();
        config
    }
}

fn parse_json_object(raw: &str) -> Result<Metadata, String> {
    serde_json::from_str(raw).map_err(|err| format!("expected a JSON object: {err}"))
}

fn parse_export_format(raw: &str) -> Result<ExportFormat, String> {
    raw.parse().map_err(|err: scanline_core::ScanError| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_arguments_map_onto_scan_config() {
        let cli = Cli::try_parse_from([
            "scanlinectl",
            "run",
            "--target-type",
            "openai",
            "--target-name",
            "gpt-4",
            "--probes",
            "dan.Dan_11_0, encoding",
            "--generator-options",
            r#"{"temperature": 0.2}"#,
            "--poll",
            "2s",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };

        assert_eq!(args.poll, Duration::from_secs(2));
        let config = args.scan_config();
        assert_eq!(config.probes, vec!["dan.Dan_11_0", "encoding"]);
        assert_eq!(config.detectors, None);
        assert_eq!(config.generations, 5);
        assert_eq!(
            config.generator_options.unwrap()["temperature"],
            serde_json::json!(0.2)
        );
    }

    #[test]
    fn options_must_be_json_objects() {
        let result = Cli::try_parse_from([
            "scanlinectl",
            "run",
            "--target-type",
            "openai",
            "--target-name",
            "gpt-4",
            "--probe-options",
            "[1, 2]",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn workflow_out_requires_a_format() {
        let result = Cli::try_parse_from([
            "scanlinectl",
            "run",
            "--target-type",
            "openai",
            "--target-name",
            "gpt-4",
            "--workflow-out",
            "graph.mmd",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn workflow_format_is_checked_while_parsing() {
        let base = [
            "scanlinectl",
            "run",
            "--target-type",
            "openai",
            "--target-name",
            "gpt-4",
            "--workflow-format",
        ];

        let result = Cli::try_parse_from(base.iter().copied().chain(["svg"]));
        assert!(result.is_err());

        let cli = Cli::try_parse_from(base.iter().copied().chain(["Mermaid"])).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.workflow_format, Some(ExportFormat::Mermaid));
    }
}
