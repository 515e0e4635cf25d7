//! Configuration for the demo caster.

use std::path::Path;
use std::time::Duration;

use beamlink_core::EngineConfig;
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CastConfig {
    /// Animation settings.
    pub animation: AnimationConfig,
    /// Engine timeout tuning.
    pub engine: TimeoutConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Animation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Frames to animate before exiting (0 = idle keep-alive only).
    pub frames: u32,
    /// Target frames per second.
    pub fps: u8,
}

/// Engine timeouts, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub command_timeout_ms: u64,
    pub data_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub first_draw_timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for CastConfig {
    fn default() -> Self {
        Self {
            animation: AnimationConfig::default(),
            engine: TimeoutConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            frames: 120,
            fps: 30,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let defaults = EngineConfig::default();
        Self {
            command_timeout_ms: defaults.command_timeout.as_millis() as u64,
            data_timeout_ms: defaults.data_timeout.as_millis() as u64,
            idle_timeout_ms: defaults.idle_timeout.as_millis() as u64,
            first_draw_timeout_ms: defaults.first_draw_timeout.as_millis() as u64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CastConfig {
    /// Load from `path`, falling back to defaults if the file is
    /// missing or malformed.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match toml::from_str(&text) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("bad config {}: {e}; using defaults", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// The engine timeouts this config describes.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            command_timeout: Duration::from_millis(self.engine.command_timeout_ms),
            data_timeout: Duration::from_millis(self.engine.data_timeout_ms),
            idle_timeout: Duration::from_millis(self.engine.idle_timeout_ms),
            first_draw_timeout: Duration::from_millis(self.engine.first_draw_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let text = toml::to_string_pretty(&CastConfig::default()).unwrap();
        let parsed: CastConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.animation.fps, 30);
        assert_eq!(parsed.engine.idle_timeout_ms, 2000);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let parsed: CastConfig = toml::from_str("[animation]\nfps = 5\n").unwrap();
        assert_eq!(parsed.animation.fps, 5);
        assert_eq!(parsed.animation.frames, 120);
        assert_eq!(parsed.logging.level, "info");
    }
}
