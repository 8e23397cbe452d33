//! Runtime configuration
//!
//! Harmony is configured through the environment:
//!
//! - `HARMONY_OUTPUTS`: headless outputs, one mode each, comma separated
//!   (`1920x1080@60,1280x720@60`)
//! - `HARMONY_PLACEMENT`: fixed output positions (`HEADLESS-2=1920,0;DP-1=0,1080`)
//! - `HARMONY_EXIT_AFTER`: stop the event loop after this many seconds
//!
//! Log verbosity is controlled by `RUST_LOG`.

use std::collections::HashMap;
use std::time::Duration;

use log::debug;
use thiserror::Error;

use crate::compositor::{LayoutConfig, Mode, ModeParseError};

pub const OUTPUTS_VAR: &str = "HARMONY_OUTPUTS";
pub const PLACEMENT_VAR: &str = "HARMONY_PLACEMENT";
pub const EXIT_AFTER_VAR: &str = "HARMONY_EXIT_AFTER";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: {source}")]
    Mode {
        var: &'static str,
        #[source]
        source: ModeParseError,
    },
    #[error("{var}: expected NAME=X,Y, got {entry:?}")]
    Placement { var: &'static str, entry: String },
    #[error("{var}: invalid number {value:?}")]
    Number { var: &'static str, value: String },
}

/// Process configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// One entry per headless output
    pub outputs: Vec<Mode>,
    /// Explicit placements keyed by output name
    pub placements: HashMap<String, (i32, i32)>,
    /// Stop after this long, if set
    pub exit_after: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            outputs: vec![Mode::new(1920, 1080, 60_000)],
            placements: HashMap::new(),
            exit_after: None,
        }
    }
}

impl Config {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(value) = lookup(OUTPUTS_VAR).filter(|v| !v.trim().is_empty()) {
            config.outputs = value
                .split(',')
                .map(|mode| {
                    mode.parse::<Mode>().map_err(|source| ConfigError::Mode {
                        var: OUTPUTS_VAR,
                        source,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
        }

        if let Some(value) = lookup(PLACEMENT_VAR) {
            config.placements = parse_placements(&value)?;
        }

        if let Some(value) = lookup(EXIT_AFTER_VAR).filter(|v| !v.trim().is_empty()) {
            let exit_after = value
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| ConfigError::Number {
                    var: EXIT_AFTER_VAR,
                    value: value.clone(),
                })?;
            config.exit_after = Some(exit_after);
        }

        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Layout settings for the output layout manager
    pub fn layout_config(&self) -> LayoutConfig {
        LayoutConfig {
            placements: self.placements.clone(),
        }
    }
}

fn parse_placements(value: &str) -> Result<HashMap<String, (i32, i32)>, ConfigError> {
    let mut placements = HashMap::new();
    for entry in value.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let invalid = || ConfigError::Placement {
            var: PLACEMENT_VAR,
            entry: entry.to_string(),
        };
        let (name, position) = entry.split_once('=').ok_or_else(invalid)?;
        let (x, y) = position.split_once(',').ok_or_else(invalid)?;
        let x = x.trim().parse::<i32>().map_err(|_| invalid())?;
        let y = y.trim().parse::<i32>().map_err(|_| invalid())?;
        let name = name.trim();
        if name.is_empty() {
            return Err(invalid());
        }
        placements.insert(name.to_string(), (x, y));
    }
    Ok(placements)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.outputs, vec![Mode::new(1920, 1080, 60_000)]);
    }

    #[test]
    fn test_outputs_and_placements() {
        let config = Config::from_lookup(lookup(&[
            (OUTPUTS_VAR, "800x600@60, 1024x768@75"),
            (PLACEMENT_VAR, "HEADLESS-2=0,600; DP-1=-1920,0"),
            (EXIT_AFTER_VAR, "2.5"),
        ]))
        .unwrap();

        assert_eq!(
            config.outputs,
            vec![Mode::new(800, 600, 60_000), Mode::new(1024, 768, 75_000)]
        );
        assert_eq!(config.placements.get("HEADLESS-2"), Some(&(0, 600)));
        assert_eq!(config.placements.get("DP-1"), Some(&(-1920, 0)));
        assert_eq!(config.exit_after, Some(Duration::from_millis(2500)));
        assert_eq!(
            config.layout_config().placements.get("DP-1"),
            Some(&(-1920, 0))
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::from_lookup(lookup(&[(OUTPUTS_VAR, "huge")])),
            Err(ConfigError::Mode { .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[(PLACEMENT_VAR, "DP-1=10")])),
            Err(ConfigError::Placement { .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[(PLACEMENT_VAR, "=1,2")])),
            Err(ConfigError::Placement { .. })
        ));
        for value in ["soon", "1e30", "-1", "NaN"] {
            assert!(
                matches!(
                    Config::from_lookup(lookup(&[(EXIT_AFTER_VAR, value)])),
                    Err(ConfigError::Number { .. })
                ),
                "{value} should be rejected"
            );
        }
    }
}
