//! Configuration loading for scanline.
//!
//! Settings come from `SCANLINE_*` environment variables (optionally seeded
//! from a `.env` file), then `scanline.toml`, then built-in defaults. The
//! resolved [`Config`] converts directly into the supervisor settings, report
//! archive and workflow vocabulary used by `scanline-core`.

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{Config, ConfigMetadata, LoggingConfig, ScannerConfig};
pub use sources::{EnvConfig, FileConfig};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
