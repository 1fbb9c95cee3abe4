//! Data-driven configuration.
//!
//! Stages and their bindings are configuration data — a component name plus
//! string parameters — resolved into matcher/action objects through the
//! component registry. Duration and size values use the same literal forms
//! the rest of the configuration surface does (`100s`, `5m`, `13K`, `1M`).

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

// ── Pipeline configuration ──────────────────────────────────────────

/// The full stage graph, as data.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    pub stages: Vec<StageConfig>,
}

/// One named stage: ordered bindings plus an optional fallback parent.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

/// A `(matcher, action)` pair.
#[derive(Debug, Clone, Deserialize)]
pub struct BindingConfig {
    pub matcher: ComponentConfig,
    pub action: ComponentConfig,
}

/// A pluggable component reference: registry name + string parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentConfig {
    pub name: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl ComponentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: HashMap::new(),
        }
    }

    /// Builder-style parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingParameter {
            component: self.name.clone(),
            key: key.to_string(),
        })
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some("true") | Some("yes") => Ok(true),
            Some("false") | Some("no") => Ok(false),
            Some(other) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got {other:?}"),
            }),
        }
    }

    pub fn get_duration(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        self.get(key).map(|raw| parse_duration(key, raw)).transpose()
    }

    pub fn get_size(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        self.get(key).map(|raw| parse_size(key, raw)).transpose()
    }

    pub fn get_count(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        self.get(key)
            .map(|raw| {
                raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("expected an integer, got {raw:?}"),
                })
            })
            .transpose()
    }
}

// ── Literal parsers ─────────────────────────────────────────────────

/// Parse a duration literal: `500ms`, `100s`, `5m`, `2h`, `1d`.
/// A bare number means seconds.
pub fn parse_duration(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    let raw = raw.trim();
    let invalid = || ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("invalid duration {raw:?}"),
    };

    let (digits, unit) = split_literal(raw);
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    let duration = match unit {
        "ms" => Duration::from_millis(value),
        "" | "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 3600),
        "d" => Duration::from_secs(value * 86_400),
        _ => return Err(invalid()),
    };
    Ok(duration)
}

/// Parse a size literal: `4096`, `13K`, `20M`, `1G` (suffixes are
/// case-insensitive, 1024-based).
pub fn parse_size(key: &str, raw: &str) -> Result<u64, ConfigError> {
    let raw = raw.trim();
    let invalid = || ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("invalid size {raw:?}"),
    };

    let (digits, unit) = split_literal(raw);
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    let multiplier = match unit.to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" => 1024,
        "m" => 1024 * 1024,
        "g" => 1024 * 1024 * 1024,
        _ => return Err(invalid()),
    };
    value.checked_mul(multiplier).ok_or_else(invalid)
}

fn split_literal(raw: &str) -> (&str, &str) {
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    (&raw[..split], raw[split..].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_literals() {
        assert_eq!(parse_duration("d", "100s").unwrap(), Duration::from_secs(100));
        assert_eq!(parse_duration("d", "1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("d", "5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("d", "2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("d", "500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("d", "30").unwrap(), Duration::from_secs(30));
        assert!(parse_duration("d", "abc").is_err());
        assert!(parse_duration("d", "10y").is_err());
    }

    #[test]
    fn size_literals() {
        assert_eq!(parse_size("s", "4096").unwrap(), 4096);
        assert_eq!(parse_size("s", "13K").unwrap(), 13 * 1024);
        assert_eq!(parse_size("s", "20k").unwrap(), 20 * 1024);
        assert_eq!(parse_size("s", "1M").unwrap(), 1024 * 1024);
        assert_eq!(parse_size("s", "2G").unwrap(), 2 * 1024 * 1024 * 1024);
        assert!(parse_size("s", "lots").is_err());
    }

    #[test]
    fn component_params() {
        let config = ComponentConfig::new("to_repository")
            .param("repository", "memory://var/mail/error")
            .param("pass_through", "true")
            .param("delay", "30s")
            .param("size", "13K")
            .param("count", "2");

        assert_eq!(config.require("repository").unwrap(), "memory://var/mail/error");
        assert!(config.get_bool("pass_through", false).unwrap());
        assert!(config.get_bool("missing", true).unwrap());
        assert_eq!(
            config.get_duration("delay").unwrap(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.get_size("size").unwrap(), Some(13 * 1024));
        assert_eq!(config.get_count("count").unwrap(), Some(2));
        assert!(config.get_duration("missing").unwrap().is_none());
    }

    #[test]
    fn missing_parameter_names_component() {
        let config = ComponentConfig::new("sender_is");
        let err = config.require("senders").unwrap_err();
        assert!(matches!(err, ConfigError::MissingParameter { component, .. } if component == "sender_is"));
    }

    #[test]
    fn pipeline_config_deserializes() {
        let json = serde_json::json!({
            "stages": [
                {
                    "name": "root",
                    "bindings": [
                        {
                            "matcher": { "name": "all" },
                            "action": { "name": "to_stage", "params": { "stage": "transport" } }
                        }
                    ]
                },
                { "name": "transport", "parent": "root" }
            ]
        });
        let config: PipelineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.stages.len(), 2);
        assert_eq!(config.stages[0].bindings[0].action.name, "to_stage");
        assert_eq!(config.stages[1].parent.as_deref(), Some("root"));
    }
}
