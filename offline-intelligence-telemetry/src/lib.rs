// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Offline intelligence logging.
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and a single
//! fmt layer, JSON or human-readable. Nothing is exported off the machine.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit one JSON object per event instead of text lines.
    pub json: bool,
    /// Filter used when `RUST_LOG` is unset, e.g. `info` or
    /// `offline_intelligence_memory=debug`.
    pub level: String,
    /// Include file and line of each event.
    pub with_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: "info".to_string(),
            with_location: false,
        }
    }
}

impl LoggingConfig {
    /// Read `OI_LOG_JSON` and `OI_LOG_LEVEL`, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("OI_LOG_JSON") {
            config.json = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("OI_LOG_LEVEL") {
            if !v.trim().is_empty() {
                config.level = v.trim().to_string();
            }
        }
        config
    }

    /// Build the event filter: `RUST_LOG` wins over `level`.
    pub fn filter(&self) -> anyhow::Result<EnvFilter> {
        match std::env::var(EnvFilter::DEFAULT_ENV) {
            Ok(directives) if !directives.trim().is_empty() => Ok(EnvFilter::try_new(directives)?),
            _ => Ok(EnvFilter::try_new(&self.level)?),
        }
    }
}

/// Install the global subscriber.
///
/// Returns `Ok(false)` when a global subscriber was already installed, so it
/// is safe to call more than once.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<bool> {
    let filter = config.filter()?;

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(config.with_location)
            .with_line_number(config.with_location)
    });
    let text_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(config.with_location)
            .with_line_number(config.with_location)
    });

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(json = config.json, level = %config.level, "Logging initialized");
    }
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert!(!config.json);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let config = LoggingConfig {
            level: "memory=notalevel".to_string(),
            ..Default::default()
        };
        if std::env::var(EnvFilter::DEFAULT_ENV).is_err() {
            assert!(config.filter().is_err());
        }
    }

    #[test]
    fn test_init_twice() {
        let config = LoggingConfig::default();
        init_logging(&config).unwrap();
        assert!(!init_logging(&config).unwrap());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: LoggingConfig = serde_json::from_str(r#"{"json": true}"#).unwrap();
        assert!(config.json);
        assert_eq!(config.level, "info");
    }
}
