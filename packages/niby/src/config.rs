use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use niby_client::{Mode, ReasoningPolicy, ReconnectPolicy, SessionConfig, WireFormat};
use serde::{Deserialize, Serialize};

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [server]
//                    port = 9000
//
//   env var:         NIBY_SERVER__PORT=9000   (double underscore = nesting)
//
//   (single underscore stays within field names: NIBY_SESSION__QUIET_PERIOD_MS)
//
// CLI flags on `niby chat` override all three.

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
    #[serde(default)]
    pub chat: ChatFileConfig,
}

/// Where the assistant lives (under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
    /// Use `wss://`. Needs the `tls` feature.
    #[serde(default)]
    pub secure: bool,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
            secure: false,
        }
    }
}

impl ServerFileConfig {
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let path = self.path.trim_start_matches('/');
        format!("{scheme}://{}:{}/{path}", self.host, self.port)
    }
}

/// Session timing (under `[session]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,
    /// 0 disables the handshake timeout.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: default_quiet_period_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Reconnect backoff (under `[reconnect]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectFileConfig {
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_growth")]
    pub growth: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for ReconnectFileConfig {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            growth: default_growth(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl ReconnectFileConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base: Duration::from_millis(self.base_ms),
            // Shrinking delays make no sense.
            growth: self.growth.max(1.0),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.base_ms)),
            max_jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}

/// Conversation behavior (under `[chat]`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatFileConfig {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub wire_format: WireFormat,
    #[serde(default)]
    pub reasoning: ReasoningPolicy,
    #[serde(default)]
    pub show_reasoning: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_path() -> String {
    "/niby-ws".to_string()
}
fn default_quiet_period_ms() -> u64 {
    400
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_base_ms() -> u64 {
    3000
}
fn default_growth() -> f64 {
    1.5
}
fn default_max_delay_ms() -> u64 {
    15000
}
fn default_jitter_ms() -> u64 {
    300
}

impl FileConfig {
    /// Runtime session settings; `url` overrides the `[server]` section.
    pub fn session_config(&self, url: Option<&str>) -> SessionConfig {
        let url = url.map_or_else(|| self.server.url(), str::to_string);
        let mut config = SessionConfig::new(url);
        config.quiet_period = Duration::from_millis(self.session.quiet_period_ms);
        config.connect_timeout = match self.session.connect_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        config.reconnect = self.reconnect.policy();
        config.wire_format = self.chat.wire_format;
        config.initial_mode = self.chat.mode;
        config.reasoning_policy = self.chat.reasoning;
        config
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

/// `~/.config/niby/config.toml` on Linux; `None` if the platform has no
/// config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("niby").join("config.toml"))
}

/// Build a figment that layers: defaults → config.toml → NIBY_* env vars.
///
/// A missing file is not an error; it contributes nothing.
///
/// Env vars use double-underscore for nesting into sections:
///   `NIBY_SERVER__PORT=9000`  →  `server.port = 9000`
///   `NIBY_CHAT__MODE=plan`  →  `chat.mode = "plan"`
pub fn load_config(config_path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()));
    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("NIBY_").split("__"))
}
