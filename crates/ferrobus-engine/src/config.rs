//! Configuration loading from a TOML file with defaults.

use ferrobus_types::EngineConfig;
use std::path::Path;
use tracing::{info, warn};

/// Load an engine configuration from a TOML file.
///
/// Missing file, unreadable file, and parse errors all fall back to the
/// defaults with a log line; a bad config never prevents startup.
pub fn load_config(path: Option<&Path>) -> EngineConfig {
    let Some(path) = path else {
        return EngineConfig::default();
    };

    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
        return EngineConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<EngineConfig>(&contents) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %path.display(),
                    "Failed to parse config, using defaults"
                );
                EngineConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %path.display(),
                "Failed to read config file, using defaults"
            );
            EngineConfig::default()
        }
    }
}
