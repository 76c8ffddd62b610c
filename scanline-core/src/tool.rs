use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use scanline_model::ScanConfig;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Result, ScanError};

/// Name of the scanner executable and Python module.
pub const SCANNER_NAME: &str = "garak";
pub const VERSION_TIMEOUT: Duration = Duration::from_secs(5);
const PYTHON: &str = "python";

/// How to invoke the scanner: a program plus arguments that precede the
/// scan flags (`-m garak` for module execution).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerTool {
    program: PathBuf,
    prefix_args: Vec<String>,
}

impl ScannerTool {
    pub fn executable(path: impl Into<PathBuf>) -> Self {
        Self {
            program: path.into(),
            prefix_args: Vec::new(),
        }
    }

    pub fn python_module() -> Self {
        Self {
            program: PathBuf::from(PYTHON),
            prefix_args: vec!["-m".into(), SCANNER_NAME.into()],
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn is_python_module(&self) -> bool {
        !self.prefix_args.is_empty()
    }

    /// Locates the scanner. A configured path wins; otherwise `PATH`, the
    /// usual install locations and finally `python -m garak` are tried.
    pub async fn discover(configured: Option<&Path>) -> Result<Self> {
        if let Some(path) = configured {
            if path.is_file() {
                info!("Using configured scanner at {}", path.display());
                return Ok(Self::executable(path));
            }
            if let Ok(found) = which::which(path) {
                info!("Using configured scanner at {}", found.display());
                return Ok(Self::executable(found));
            }
            return Err(ScanError::launch(format!(
                "configured scanner {} not found",
                path.display()
            )));
        }

        if let Ok(found) = which::which(SCANNER_NAME) {
            info!("Found scanner at {}", found.display());
            return Ok(Self::executable(found));
        }

        for candidate in well_known_locations() {
            if candidate.is_file() {
                info!("Found scanner at {}", candidate.display());
                return Ok(Self::executable(candidate));
            }
        }

        let module = Self::python_module();
        if module.is_installed().await {
            info!("Found scanner as Python module ({PYTHON} -m {SCANNER_NAME})");
            return Ok(module);
        }

        warn!("{SCANNER_NAME} not found in PATH or as a Python module");
        Err(ScanError::launch(format!(
            "{SCANNER_NAME} not found in PATH, common locations or as a Python module"
        )))
    }

    fn base_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.prefix_args).kill_on_drop(true);
        command
    }

    /// Runs `--version`, bounded by [`VERSION_TIMEOUT`].
    pub async fn version(&self) -> Option<String> {
        let mut command = self.base_command();
        command
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match timeout(VERSION_TIMEOUT, command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            Ok(Ok(output)) => {
                debug!("{} --version exited with {}", self.display(), output.status);
                None
            }
            Ok(Err(err)) => {
                debug!("Failed to run {} --version: {}", self.display(), err);
                None
            }
            Err(_) => {
                warn!("{} --version timed out", self.display());
                None
            }
        }
    }

    pub async fn is_installed(&self) -> bool {
        self.version().await.is_some()
    }

    /// Spawnable command for `config` with both output streams piped.
    pub fn command(&self, config: &ScanConfig) -> Result<Command> {
        let mut command = self.base_command();
        command
            .args(build_args(config)?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // progress is only useful if it arrives while the scan runs
            .env("PYTHONUNBUFFERED", "1");
        Ok(command)
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.prefix_args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn well_known_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from("/usr/local/bin").join(SCANNER_NAME)];
    if let Some(home) = dirs::home_dir() {
        locations.push(home.join(".local").join("bin").join(SCANNER_NAME));
    }
    locations
}

fn plugin_list(names: &[String], prefix: &str) -> String {
    names
        .iter()
        .map(|name| name.strip_prefix(prefix).unwrap_or(name))
        .collect::<Vec<_>>()
        .join(",")
}

/// Scanner flags for `config`, without the program itself.
pub fn build_args(config: &ScanConfig) -> Result<Vec<String>> {
    let mut args = vec![
        "--target_type".to_string(),
        config.target_type.clone(),
        "--target_name".to_string(),
        config.target_name.clone(),
    ];

    if !config.probes.is_empty() {
        args.push("--probes".into());
        args.push(plugin_list(&config.probes, "probes."));
    }
    if let Some(detectors) = config.detectors.as_deref().filter(|d| !d.is_empty()) {
        args.push("--detectors".into());
        args.push(plugin_list(detectors, "detectors."));
    }
    if let Some(buffs) = config.buffs.as_deref().filter(|b| !b.is_empty()) {
        args.push("--buffs".into());
        args.push(plugin_list(buffs, "buffs."));
    }

    args.push("--generations".into());
    args.push(config.generations.to_string());
    args.push("--eval_threshold".into());
    args.push(config.eval_threshold.to_string());

    if let Some(seed) = config.seed {
        args.push("--seed".into());
        args.push(seed.to_string());
    }
    if let Some(requests) = config.parallel_requests {
        args.push("--parallel_requests".into());
        args.push(requests.to_string());
    }
    if let Some(attempts) = config.parallel_attempts {
        args.push("--parallel_attempts".into());
        args.push(attempts.to_string());
    }

    if let Some(options) = config.generator_options.as_ref().filter(|o| !o.is_empty()) {
        args.push("--generator_options".into());
        args.push(serde_json::to_string(options)?);
    }
    if let Some(options) = config.probe_options.as_ref().filter(|o| !o.is_empty()) {
        args.push("--probe_options".into());
        args.push(serde_json::to_string(options)?);
    }

    if let Some(prefix) = config.report_prefix.as_deref().filter(|p| !p.is_empty()) {
        args.push("--report_prefix".into());
        args.push(prefix.to_string());
    }

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn args_strip_plugin_prefixes_once() {
        let mut config = ScanConfig::new("openai", "gpt-3.5-turbo")
            .with_probes(["probes.dan.Dan_11_0", "encoding"]);
        config.detectors = Some(vec!["detectors.mitigation.MitigationBypass".into()]);
        config.buffs = Some(vec!["buffs.probes.x".into()]);

        let args = build_args(&config).unwrap();
        let flag = |name: &str| {
            let idx = args.iter().position(|a| a == name).unwrap();
            args[idx + 1].clone()
        };
        assert_eq!(flag("--target_type"), "openai");
        assert_eq!(flag("--probes"), "dan.Dan_11_0,encoding");
        assert_eq!(flag("--detectors"), "mitigation.MitigationBypass");
        assert_eq!(flag("--buffs"), "probes.x");
        assert_eq!(flag("--generations"), "5");
        assert_eq!(flag("--eval_threshold"), "0.5");
        assert!(!args.contains(&"--seed".to_string()));
    }

    #[test]
    fn optional_flags_are_included_when_set() {
        let mut config = ScanConfig::new("huggingface", "gpt2");
        config.seed = Some(42);
        config.parallel_requests = Some(4);
        config.parallel_attempts = Some(2);
        config.report_prefix = Some("nightly".into());
        let mut options = serde_json::Map::new();
        options.insert("temperature".into(), json!(0.7));
        config.generator_options = Some(options);

        let args = build_args(&config).unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("--seed 42"));
        assert!(joined.contains("--parallel_requests 4"));
        assert!(joined.contains("--parallel_attempts 2"));
        assert!(joined.contains("--report_prefix nightly"));
        assert!(joined.contains(r#"--generator_options {"temperature":0.7}"#));
        assert!(!joined.contains("--probe_options"));
    }

    #[test]
    fn python_module_prefixes_arguments() {
        let tool = ScannerTool::python_module();
        assert!(tool.is_python_module());
        assert_eq!(tool.display(), "python -m garak");
    }

    #[tokio::test]
    async fn configured_path_must_exist() {
        let missing = Path::new("/definitely/not/here/garak");
        let err = ScannerTool::discover(Some(missing)).await.unwrap_err();
        assert!(matches!(err, ScanError::ProcessLaunch(_)));
    }

    #[tokio::test]
    async fn configured_file_is_used_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garak");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        let tool = ScannerTool::discover(Some(&path)).await.unwrap();
        assert_eq!(tool.program(), path.as_path());
        assert!(!tool.is_python_module());
    }
}
