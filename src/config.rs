//! Process configuration read from the environment

use crate::gemini::{GeminiClientConfig, MediaResolution, DEFAULT_MODEL};
use crate::ingress_queue::DEFAULT_QUEUE_CAPACITY;
use crate::relay::DEFAULT_TURN_TIMEOUT;
use crate::session::SessionOptions;
use std::time::Duration;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Instruction given to the model once per connection
pub const DIAGNOSTIC_INSTRUCTION: &str = r#"You assist emergency call operators. You receive the caller's audio and video.
Watch and listen for signs of stroke (facial droop, asymmetry, slurred speech), cardiac arrest
(agonal breathing, unresponsiveness) and shock (pale or blue skin, confusion, rapid breathing).
When cardiac arrest is suspected, estimate the chest compression rate you hear and set
"cpr_feedback" to "INSTRUCT: START CPR NOW" (no compressions), "INSTRUCT: PUSH FASTER" (below 100
per minute), "INSTRUCT: PUSH SLOWER" (above 120 per minute) or "GOOD RHYTHM".
Answer with JSON objects only, no markdown:
{"status": "NORMAL" | "WARNING" | "CRITICAL", "diagnosis": string, "confidence": 0.0-1.0,
 "symptoms": [string], "cpr_feedback": string (only for cardiac arrest)}"#;

/// Errors in environment-provided settings
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{0} must be at least 1")]
    Zero(&'static str),

    #[error("{name} must be one of low, medium, high, got {value:?}")]
    InvalidResolution { name: &'static str, value: String },
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub api_key: Option<String>,
    pub gemini: GeminiClientConfig,
    pub queue_capacity: usize,
    pub turn_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            api_key: None,
            gemini: GeminiClientConfig {
                system_instruction: Some(DIAGNOSTIC_INSTRUCTION.to_string()),
                ..Default::default()
            },
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        config.api_key = get("API_KEY").or_else(|| get("GEMINI_API_KEY"));
        if let Some(bind) = get("LAZARUS_BIND") {
            config.bind_addr = bind;
        }
        config.gemini.model = get("LAZARUS_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        if let Some(value) = get("LAZARUS_MEDIA_RESOLUTION") {
            let resolution =
                MediaResolution::parse(&value).ok_or_else(|| ConfigError::InvalidResolution {
                    name: "LAZARUS_MEDIA_RESOLUTION",
                    value: value.clone(),
                })?;
            config.gemini.media_resolution = Some(resolution);
        }

        if let Some(value) = get("LAZARUS_QUEUE_CAPACITY") {
            let capacity = parse_number("LAZARUS_QUEUE_CAPACITY", &value)?;
            if capacity == 0 {
                return Err(ConfigError::Zero("LAZARUS_QUEUE_CAPACITY"));
            }
            config.queue_capacity = capacity as usize;
        }
        if let Some(value) = get("LAZARUS_TURN_TIMEOUT_SECS") {
            let secs = parse_number("LAZARUS_TURN_TIMEOUT_SECS", &value)?;
            if secs == 0 {
                return Err(ConfigError::Zero("LAZARUS_TURN_TIMEOUT_SECS"));
            }
            config.turn_timeout = Duration::from_secs(secs);
        }
        if let Some(value) = get("LAZARUS_SHUTDOWN_TIMEOUT_SECS") {
            config.shutdown_timeout =
                Duration::from_secs(parse_number("LAZARUS_SHUTDOWN_TIMEOUT_SECS", &value)?);
        }

        Ok(config)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            queue_capacity: self.queue_capacity,
            turn_timeout: self.turn_timeout,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

fn parse_number(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            name,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert!(config.api_key.is_none());
        assert_eq!(config.queue_capacity, 20);
        assert_eq!(config.turn_timeout, Duration::from_secs(30));
        assert_eq!(config.gemini.model, DEFAULT_MODEL);
        assert!(config.gemini.system_instruction.is_some());
        assert_eq!(config.gemini.media_resolution, Some(MediaResolution::Medium));
    }

    #[test]
    fn test_api_key_fallback() {
        let config = config_from(&[("GEMINI_API_KEY", "fallback")]).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("fallback"));

        let config = config_from(&[("API_KEY", "primary"), ("GEMINI_API_KEY", "fallback")]).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("primary"));

        let config = config_from(&[("API_KEY", "  ")]).unwrap();
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("LAZARUS_BIND", "127.0.0.1:9000"),
            ("LAZARUS_MODEL", "models/other"),
            ("LAZARUS_QUEUE_CAPACITY", "5"),
            ("LAZARUS_TURN_TIMEOUT_SECS", "12"),
            ("LAZARUS_SHUTDOWN_TIMEOUT_SECS", "1"),
            ("LAZARUS_MEDIA_RESOLUTION", "High"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.gemini.model, "models/other");
        assert_eq!(config.gemini.media_resolution, Some(MediaResolution::High));
        let options = config.session_options();
        assert_eq!(options.queue_capacity, 5);
        assert_eq!(options.turn_timeout, Duration::from_secs(12));
        assert_eq!(options.shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        assert!(matches!(
            config_from(&[("LAZARUS_QUEUE_CAPACITY", "lots")]),
            Err(ConfigError::InvalidNumber { name: "LAZARUS_QUEUE_CAPACITY", .. })
        ));
        assert!(matches!(
            config_from(&[("LAZARUS_QUEUE_CAPACITY", "0")]),
            Err(ConfigError::Zero(_))
        ));
        assert!(matches!(
            config_from(&[("LAZARUS_TURN_TIMEOUT_SECS", "-3")]),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(matches!(
            config_from(&[("LAZARUS_MEDIA_RESOLUTION", "4k")]),
            Err(ConfigError::InvalidResolution { .. })
        ));
    }
}
