use std::time::Duration;

use thiserror::Error;

use crate::models::Config;

/// Smallest chunk bound that still holds a full progress-bar redraw.
pub const MIN_CHUNK_LEN: usize = 1024;
const LONG_CANCEL_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("max_chunk_len {value} is below the minimum of {MIN_CHUNK_LEN} bytes")]
    ChunkLenTooSmall { value: usize },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    if config.scanner.max_chunk_len < MIN_CHUNK_LEN {
        return Err(ConfigGuardRailError::ChunkLenTooSmall {
            value: config.scanner.max_chunk_len,
        });
    }

    if config.scanner.cancel_grace.is_zero() {
        warnings.push_with_hint(
            "cancel_grace is zero; cancelled scanners are killed without a chance to write reports",
            "Set scanner.cancel_grace to at least \"1s\"",
        );
    } else if config.scanner.cancel_grace > LONG_CANCEL_GRACE {
        warnings.push(format!(
            "cancel_grace of {} delays every cancellation",
            humantime::format_duration(config.scanner.cancel_grace)
        ));
    }

    if let Some(path) = config.scanner.path.as_ref()
        && path.is_absolute()
        && !path.exists()
    {
        warnings.push_with_hint(
            format!("scanner path {} does not exist", path.display()),
            "Scans will fail to launch until the path is fixed",
        );
    }

    match config.scanner.runs_dir.as_ref() {
        Some(dir) if !dir.is_dir() => warnings.push(format!(
            "runs directory {} not found; finished scans will only be visible while the process runs",
            dir.display()
        )),
        Some(_) => {}
        None => warnings.push("No runs directory could be determined"),
    }

    Ok(warnings)
}
