//! Configuration module for the Gadka Gateway server.
//!
//! Configuration comes from several sources with the priority
//! YAML > environment variables > `.env` values > defaults. The `.env` file
//! is loaded by the binary before [`ServerConfig::from_env`] runs, so it
//! simply appears as environment variables here.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::core::orchestrator::TurnConfig;
use crate::core::tts::VoiceOptions;

mod yaml;

pub use yaml::YamlConfig;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the configuration file failed
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// An environment variable holds an unparseable value
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    /// The resulting configuration is inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// TLS configuration for HTTPS and WSS on the main listener
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Everything needed to run the gateway: listener addresses, the viewer
/// channel, turn-taking behavior, voice options, and security settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional, main listener only)
    pub tls: Option<TlsConfig>,

    /// Hostname advertised to clients in the discovery endpoint; defaults to
    /// `host`, with the wildcard address rewritten to `localhost`.
    pub public_host: Option<String>,

    // Viewer channel
    pub viewer_port: u16,
    /// How many consecutive ports to try when `viewer_port` is taken.
    pub viewer_port_attempts: u16,
    pub frame_interval: Duration,
    pub animations_dir: Option<PathBuf>,

    // Turn-taking
    pub continuous_mode: bool,
    pub auto_greet: bool,
    pub greeting: String,
    pub reply_timeout: Duration,
    pub speaking_grace: Duration,
    pub idle_timeout: Duration,

    // Voice options for client-side synthesis
    pub voice: VoiceOptions,

    // Security
    pub cors_allowed_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            tls: None,
            public_host: None,
            viewer_port: 6080,
            viewer_port_attempts: 10,
            frame_interval: Duration::from_millis(250),
            animations_dir: None,
            continuous_mode: true,
            auto_greet: true,
            greeting: "Witaj! Jak mogę Ci dzisiaj pomóc?".to_string(),
            reply_timeout: Duration::from_secs(10),
            speaking_grace: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            voice: VoiceOptions::default(),
            cors_allowed_origins: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = string_env("HOST") {
            config.host = host;
        }
        if let Some(port) = parse_env("PORT")? {
            config.port = port;
        }
        config.tls = match (string_env("TLS_CERT_PATH"), string_env("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid(
                    "TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string(),
                ));
            }
        };
        config.public_host = string_env("PUBLIC_HOST");
        if let Some(port) = parse_env("VIEWER_PORT")? {
            config.viewer_port = port;
        }
        if let Some(attempts) = parse_env("VIEWER_PORT_ATTEMPTS")? {
            config.viewer_port_attempts = attempts;
        }
        if let Some(ms) = parse_env::<u64>("FRAME_INTERVAL_MS")? {
            config.frame_interval = Duration::from_millis(ms);
        }
        config.animations_dir = string_env("ANIMATIONS_DIR").map(PathBuf::from);
        if let Some(flag) = parse_env("CONTINUOUS_MODE")? {
            config.continuous_mode = flag;
        }
        if let Some(flag) = parse_env("AUTO_GREET")? {
            config.auto_greet = flag;
        }
        if let Some(greeting) = string_env("GREETING") {
            config.greeting = greeting;
        }
        if let Some(secs) = parse_env::<u64>("REPLY_TIMEOUT_SECS")? {
            config.reply_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("SPEAKING_GRACE_SECS")? {
            config.speaking_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("IDLE_TIMEOUT_SECS")? {
            config.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(lang) = string_env("VOICE_LANG") {
            config.voice.lang = lang;
        }
        if let Some(volume) = parse_env("VOICE_VOLUME")? {
            config.voice.volume = volume;
        }
        if let Some(rate) = parse_env("VOICE_RATE")? {
            config.voice.rate = rate;
        }
        if let Some(pitch) = parse_env("VOICE_PITCH")? {
            config.voice.pitch = pitch;
        }
        config.cors_allowed_origins = string_env("CORS_ALLOWED_ORIGINS");

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, with environment variables as
    /// the base layer underneath it.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let overlay: YamlConfig = serde_yaml::from_str(&content)?;

        let mut config = Self::from_env()?;
        overlay.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Main listener address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Hostname clients should use to reach this server.
    pub fn public_host(&self) -> &str {
        if let Some(public_host) = &self.public_host {
            return public_host;
        }
        if self.host == "0.0.0.0" || self.host == "::" {
            "localhost"
        } else {
            &self.host
        }
    }

    /// Turn-taking knobs for the orchestrator.
    pub fn turn_config(&self) -> TurnConfig {
        TurnConfig {
            continuous_mode: self.continuous_mode,
            auto_greet: self.auto_greet,
            greeting: self.greeting.clone(),
            reply_timeout: self.reply_timeout,
            speaking_grace: self.speaking_grace,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_interval < Duration::from_millis(10) {
            return Err(ConfigError::Invalid(
                "frame interval must be at least 10ms".to_string(),
            ));
        }
        if self.viewer_port_attempts == 0 {
            return Err(ConfigError::Invalid(
                "viewer port attempts must be at least 1".to_string(),
            ));
        }
        if self.viewer_port != 0 && self.viewer_port == self.port {
            return Err(ConfigError::Invalid(
                "viewer port must differ from the server port".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.voice.volume) {
            return Err(ConfigError::Invalid(
                "voice volume must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.voice.rate <= 0.0 || self.voice.pitch <= 0.0 {
            return Err(ConfigError::Invalid(
                "voice rate and pitch must be positive".to_string(),
            ));
        }
        if self.auto_greet && self.greeting.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "greeting must not be empty when auto_greet is on".to_string(),
            ));
        }
        Ok(())
    }
}

fn string_env(key: &'static str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn parse_env<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match string_env(key) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.address(), "0.0.0.0:3000");
        assert_eq!(config.viewer_port, 6080);
        assert!(config.continuous_mode);
    }

    #[test]
    fn test_public_host_rewrites_wildcard() {
        let config = ServerConfig::default();
        assert_eq!(config.public_host(), "localhost");

        let config = ServerConfig {
            host: "10.0.0.5".to_string(),
            ..Default::default()
        };
        assert_eq!(config.public_host(), "10.0.0.5");

        let config = ServerConfig {
            public_host: Some("avatar.example.com".to_string()),
            ..Default::default()
        };
        assert_eq!(config.public_host(), "avatar.example.com");
    }

    #[test]
    fn test_port_collision_is_rejected() {
        let config = ServerConfig {
            port: 6080,
            viewer_port: 6080,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_degenerate_frame_interval_is_rejected() {
        let config = ServerConfig {
            frame_interval: Duration::from_millis(1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_greeting_with_auto_greet_is_rejected() {
        let config = ServerConfig {
            greeting: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            greeting: "  ".to_string(),
            auto_greet: false,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_turn_config_mapping() {
        let config = ServerConfig {
            continuous_mode: false,
            reply_timeout: Duration::from_secs(3),
            ..Default::default()
        };
        let turn = config.turn_config();
        assert!(!turn.continuous_mode);
        assert_eq!(turn.reply_timeout, Duration::from_secs(3));
        assert_eq!(turn.greeting, config.greeting);
    }

    #[test]
    fn test_from_file_applies_overlay() {
        let dir = tempfile::tempdir().expect("Should create tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
server:
  port: 8443
viewer:
  port: 7000
  frame_interval_ms: 100
conversation:
  continuous_mode: false
  greeting: "Dzień dobry"
voice:
  lang: en-US
  rate: 1.2
"#,
        )
        .expect("Should write config");

        let config = ServerConfig::from_file(&path).expect("Should load");
        assert_eq!(config.port, 8443);
        assert_eq!(config.viewer_port, 7000);
        assert_eq!(config.frame_interval, Duration::from_millis(100));
        assert!(!config.continuous_mode);
        assert_eq!(config.greeting, "Dzień dobry");
        assert_eq!(config.voice.lang, "en-US");
        assert_eq!(config.voice.rate, 1.2);
        // Untouched fields keep their defaults.
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_from_file_rejects_invalid_overlay() {
        let dir = tempfile::tempdir().expect("Should create tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "viewer:\n  frame_interval_ms: 1\n").expect("Should write config");

        assert!(ServerConfig::from_file(&path).is_err());
    }
}
