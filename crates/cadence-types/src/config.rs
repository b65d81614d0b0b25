//! Global configuration types for Cadence.
//!
//! `GlobalConfig` represents the user-level `config.toml` that sets defaults
//! for every workflow run.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `<config_dir>/cadence/config.toml`. All fields have defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Cap on simultaneously running routines when neither the CLI nor the
    /// workflow descriptor sets one.
    #[serde(default)]
    pub max_concurrent_routines: Option<usize>,

    /// Capacity of the event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Shell used by the local engine (`<shell> -c <command>`).
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Target used when the descriptor names none.
    #[serde(default)]
    pub default_target: Option<String>,
}

fn default_event_capacity() -> usize {
    1024
}

fn default_shell() -> String {
    "sh".to_string()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            max_concurrent_routines: None,
            event_capacity: default_event_capacity(),
            shell: default_shell(),
            default_target: None,
        }
    }
}
