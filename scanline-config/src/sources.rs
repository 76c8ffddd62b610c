use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use scanline_core::VocabularyPatterns;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub scanner: FileScannerConfig,
    #[serde(default)]
    pub logging: FileLoggingConfig,
    /// Partial overrides; omitted patterns keep their defaults.
    pub workflow: Option<VocabularyPatterns>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileScannerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runs_dir: Option<PathBuf>,
    /// Humantime string, e.g. `"1s"` or `"500ms"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_grace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_chunk_len: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLoggingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub scanner_path: Option<PathBuf>,
    pub runs_dir: Option<PathBuf>,
    pub cancel_grace: Option<String>,
    pub max_chunk_len: Option<String>,
    pub log_filter: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Self {
            config_path: var("SCANLINE_CONFIG").map(PathBuf::from),
            scanner_path: var("SCANLINE_SCANNER_PATH").map(PathBuf::from),
            runs_dir: var("SCANLINE_RUNS_DIR").map(PathBuf::from),
            cancel_grace: var("SCANLINE_CANCEL_GRACE"),
            max_chunk_len: var("SCANLINE_MAX_CHUNK_LEN"),
            log_filter: var("SCANLINE_LOG"),
        }
    }
}
