//! YAML configuration file loading.
//!
//! Every field is optional; the file is an overlay applied on top of the
//! environment-derived configuration.
//!
//! # Example
//! ```yaml
//! server:
//!   host: 0.0.0.0
//!   port: 3000
//!   tls:
//!     cert_path: /etc/gadka/cert.pem
//!     key_path: /etc/gadka/key.pem
//! viewer:
//!   port: 6080
//!   frame_interval_ms: 250
//!   animations_dir: /opt/gadka/animations
//! conversation:
//!   continuous_mode: true
//!   greeting: "Witaj! Jak mogę Ci dzisiaj pomóc?"
//! voice:
//!   lang: pl-PL
//! security:
//!   cors_allowed_origins: "*"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::{ServerConfig, TlsConfig};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YamlConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    viewer: ViewerSection,
    #[serde(default)]
    conversation: ConversationSection,
    #[serde(default)]
    voice: VoiceSection,
    #[serde(default)]
    security: SecuritySection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerSection {
    host: Option<String>,
    port: Option<u16>,
    tls: Option<TlsSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TlsSection {
    cert_path: PathBuf,
    key_path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ViewerSection {
    port: Option<u16>,
    port_attempts: Option<u16>,
    public_host: Option<String>,
    frame_interval_ms: Option<u64>,
    animations_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConversationSection {
    continuous_mode: Option<bool>,
    auto_greet: Option<bool>,
    greeting: Option<String>,
    reply_timeout_secs: Option<u64>,
    speaking_grace_secs: Option<u64>,
    idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct VoiceSection {
    lang: Option<String>,
    volume: Option<f32>,
    rate: Option<f32>,
    pitch: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SecuritySection {
    cors_allowed_origins: Option<String>,
}

impl YamlConfig {
    /// Overlay the file's values onto `config`.
    pub fn apply(self, config: &mut ServerConfig) {
        if let Some(host) = self.server.host {
            config.host = host;
        }
        if let Some(port) = self.server.port {
            config.port = port;
        }
        if let Some(tls) = self.server.tls {
            config.tls = Some(TlsConfig {
                cert_path: tls.cert_path,
                key_path: tls.key_path,
            });
        }

        if let Some(port) = self.viewer.port {
            config.viewer_port = port;
        }
        if let Some(attempts) = self.viewer.port_attempts {
            config.viewer_port_attempts = attempts;
        }
        if let Some(public_host) = self.viewer.public_host {
            config.public_host = Some(public_host);
        }
        if let Some(ms) = self.viewer.frame_interval_ms {
            config.frame_interval = Duration::from_millis(ms);
        }
        if let Some(dir) = self.viewer.animations_dir {
            config.animations_dir = Some(dir);
        }

        if let Some(flag) = self.conversation.continuous_mode {
            config.continuous_mode = flag;
        }
        if let Some(flag) = self.conversation.auto_greet {
            config.auto_greet = flag;
        }
        if let Some(greeting) = self.conversation.greeting {
            config.greeting = greeting;
        }
        if let Some(secs) = self.conversation.reply_timeout_secs {
            config.reply_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.conversation.speaking_grace_secs {
            config.speaking_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = self.conversation.idle_timeout_secs {
            config.idle_timeout = Duration::from_secs(secs);
        }

        if let Some(lang) = self.voice.lang {
            config.voice.lang = lang;
        }
        if let Some(volume) = self.voice.volume {
            config.voice.volume = volume;
        }
        if let Some(rate) = self.voice.rate {
            config.voice.rate = rate;
        }
        if let Some(pitch) = self.voice.pitch {
            config.voice.pitch = pitch;
        }

        if let Some(origins) = self.security.cors_allowed_origins {
            config.cors_allowed_origins = Some(origins);
        }
    }
}
