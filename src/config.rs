use std::path::PathBuf;

use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-image-1";
pub const DEFAULT_SIZE: &str = "1024x1024";
pub const DEFAULT_SESSION_TTL_SECS: i64 = 30 * 60;
pub const DEFAULT_MAX_SESSIONS: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("OpenAI API key not found. Please set the OPENAI_API_KEY environment variable.")]
    MissingApiKey,
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Kept optional so prompt composition works without credentials; image
    /// calls check it before touching the network.
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub size: String,
    pub output_dir: PathBuf,
    pub save_images: bool,
    pub port: u16,
    /// Idle time after which a session and its image bytes are dropped.
    pub session_ttl_secs: i64,
    pub max_sessions: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = match var("PORT") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid { name: "PORT", value: v })?,
            None => 8080,
        };
        let save_images = match var("SAVE_IMAGES") {
            Some(v) => {
                parse_flag(&v).ok_or(ConfigError::Invalid { name: "SAVE_IMAGES", value: v })?
            }
            None => true,
        };
        let session_ttl_secs = match var("SESSION_TTL_SECS") {
            Some(v) => parse_positive(&v)
                .ok_or(ConfigError::Invalid { name: "SESSION_TTL_SECS", value: v })?,
            None => DEFAULT_SESSION_TTL_SECS,
        };
        let max_sessions = match var("MAX_SESSIONS") {
            Some(v) => parse_positive(&v)
                .ok_or(ConfigError::Invalid { name: "MAX_SESSIONS", value: v })?,
            None => DEFAULT_MAX_SESSIONS,
        };

        Ok(Self {
            api_key: var("OPENAI_API_KEY"),
            api_base: var("OPENAI_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            model: var("IMAGE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            size: var("IMAGE_SIZE").unwrap_or_else(|| DEFAULT_SIZE.to_string()),
            output_dir: var("IMAGE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            save_images,
            port,
            session_ttl_secs,
            max_sessions,
        })
    }

    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or(ConfigError::MissingApiKey)
    }

    /// First few characters of the key, for startup logging.
    pub fn api_key_hint(&self) -> Option<String> {
        self.api_key.as_ref().map(|k| format!("{}...", k.chars().take(6).collect::<String>()))
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_positive<T: std::str::FromStr + PartialOrd + Default>(v: &str) -> Option<T> {
    v.parse().ok().filter(|n| *n > T::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.api_key, None);
        assert_eq!(cfg.api_base, DEFAULT_API_BASE);
        assert_eq!(cfg.model, "gpt-image-1");
        assert_eq!(cfg.size, "1024x1024");
        assert_eq!(cfg.output_dir, PathBuf::from("."));
        assert!(cfg.save_images);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.session_ttl_secs, 1800);
        assert_eq!(cfg.max_sessions, 256);
    }

    #[test]
    fn missing_key_is_reported_as_configuration_error() {
        let cfg = config(&[("OPENAI_API_KEY", "  ")]).unwrap();
        assert_eq!(cfg.require_api_key(), Err(ConfigError::MissingApiKey));
    }

    #[test]
    fn overrides_are_read() {
        let cfg = config(&[
            ("OPENAI_API_KEY", "sk-test-123456"),
            ("OPENAI_API_BASE", "http://localhost:9000/v1/"),
            ("IMAGE_MODEL", "dall-e-3"),
            ("SAVE_IMAGES", "off"),
            ("PORT", "3000"),
            ("SESSION_TTL_SECS", "60"),
            ("MAX_SESSIONS", "8"),
        ])
        .unwrap();
        assert_eq!(cfg.require_api_key(), Ok("sk-test-123456"));
        assert_eq!(cfg.api_key_hint().as_deref(), Some("sk-tes..."));
        assert_eq!(cfg.api_base, "http://localhost:9000/v1");
        assert_eq!(cfg.model, "dall-e-3");
        assert!(!cfg.save_images);
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.session_ttl_secs, 60);
        assert_eq!(cfg.max_sessions, 8);
    }

    #[test]
    fn bad_port_is_rejected() {
        assert_eq!(
            config(&[("PORT", "eighty")]).unwrap_err(),
            ConfigError::Invalid { name: "PORT", value: "eighty".into() }
        );
    }

    #[test]
    fn session_limits_must_be_positive() {
        assert_eq!(
            config(&[("MAX_SESSIONS", "0")]).unwrap_err(),
            ConfigError::Invalid { name: "MAX_SESSIONS", value: "0".into() }
        );
        assert_eq!(
            config(&[("SESSION_TTL_SECS", "-5")]).unwrap_err(),
            ConfigError::Invalid { name: "SESSION_TTL_SECS", value: "-5".into() }
        );
    }
}
