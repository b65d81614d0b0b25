//! Global configuration loader for Cadence.
//!
//! Reads `config.toml` (by default `<config_dir>/cadence/config.toml`) and
//! deserializes it into [`GlobalConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use cadence_core::workflow::default_max_concurrent_routines;
use cadence_types::config::GlobalConfig;

/// `<config_dir>/cadence/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cadence").join("config.toml"))
}

/// Load global configuration from `path`.
///
/// - If the file does not exist, returns [`GlobalConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_global_config(path: &Path) -> GlobalConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            GlobalConfig::default()
        }
    }
}

/// Resolve the routine concurrency cap.
///
/// Priority:
/// 1. `--max-concurrent` on the command line
/// 2. `maxConcurrentRoutines` in the workflow descriptor
/// 3. `max_concurrent_routines` in `config.toml`
/// 4. Available parallelism minus one
///
/// Zero is treated as unset at every level.
pub fn resolve_max_concurrency(
    cli: Option<usize>,
    descriptor: Option<usize>,
    config: &GlobalConfig,
) -> usize {
    [cli, descriptor, config.max_concurrent_routines]
        .into_iter()
        .flatten()
        .find(|&n| n > 0)
        .unwrap_or_else(default_max_concurrent_routines)
}
