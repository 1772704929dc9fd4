//! Configuration for the messaging client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/ecodeli/messaging.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use ecodeli_proto::user::{Role, User, UserId};

use crate::api::http::HttpConfig;
use crate::controller::MessengerConfig;
use crate::transport::ws::WsConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The configured role is not a marketplace role.
    #[error("unknown role {0:?} (expected client, deliveryman, service_provider, shopkeeper or admin)")]
    InvalidRole(String),
}

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    backend: BackendFileConfig,
    session: SessionFileConfig,
    reconnect: ReconnectFileConfig,
    messaging: MessagingFileConfig,
}

/// `[backend]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BackendFileConfig {
    api_base_url: Option<String>,
    ws_url: Option<String>,
    auth_token: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// `[session]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    user_id: Option<i64>,
    role: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

/// `[reconnect]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    max_attempts: Option<u32>,
    delay_ms: Option<u64>,
    connect_timeout_secs: Option<u64>,
}

/// `[messaging]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct MessagingFileConfig {
    typing_timeout_secs: Option<u64>,
    resync_on_reconnect: Option<bool>,
}

/// Reconnection policy of the WebSocket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
    /// Timeout for one connection attempt.
    pub connect_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Backend --
    /// REST API root.
    pub api_base_url: String,
    /// WebSocket endpoint.
    pub ws_url: String,
    /// Bearer token for REST calls.
    pub auth_token: Option<String>,
    /// Per-request REST timeout.
    pub request_timeout: Duration,

    // -- Session --
    /// Logged-in user id. Required to start a session.
    pub user_id: Option<UserId>,
    /// Logged-in user's role.
    pub role: Option<Role>,
    /// Logged-in user's first name.
    pub first_name: String,
    /// Logged-in user's last name.
    pub last_name: String,

    // -- Transport --
    /// Reconnection policy.
    pub reconnect: ReconnectConfig,

    // -- Messaging --
    /// Typing indicator lifetime.
    pub typing_timeout: Duration,
    /// Re-fetch the inbox after a reconnect.
    pub resync_on_reconnect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:4000/api".to_string(),
            ws_url: "ws://127.0.0.1:4000/ws".to_string(),
            auth_token: None,
            request_timeout: Duration::from_secs(15),
            user_id: None,
            role: None,
            first_name: String::new(),
            last_name: String::new(),
            reconnect: ReconnectConfig::default(),
            typing_timeout: Duration::from_secs(3),
            resync_on_reconnect: true,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicit config file cannot be read, a
    /// file cannot be parsed, or the role is not recognized.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let role = match cli.role.as_ref().or(file.session.role.as_ref()) {
            Some(tag) => Some(Role::parse(tag).ok_or_else(|| ConfigError::InvalidRole(tag.clone()))?),
            None => None,
        };

        Ok(Self {
            api_base_url: cli
                .api_url
                .clone()
                .or_else(|| file.backend.api_base_url.clone())
                .unwrap_or(defaults.api_base_url),
            ws_url: cli
                .ws_url
                .clone()
                .or_else(|| file.backend.ws_url.clone())
                .unwrap_or(defaults.ws_url),
            auth_token: cli
                .token
                .clone()
                .or_else(|| file.backend.auth_token.clone()),
            request_timeout: file
                .backend
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            user_id: cli.user_id.or(file.session.user_id).map(UserId::new),
            role,
            first_name: file.session.first_name.clone().unwrap_or_default(),
            last_name: file.session.last_name.clone().unwrap_or_default(),
            reconnect: ReconnectConfig {
                max_attempts: file
                    .reconnect
                    .max_attempts
                    .unwrap_or(defaults.reconnect.max_attempts),
                delay: file
                    .reconnect
                    .delay_ms
                    .map_or(defaults.reconnect.delay, Duration::from_millis),
                connect_timeout: file
                    .reconnect
                    .connect_timeout_secs
                    .map_or(defaults.reconnect.connect_timeout, Duration::from_secs),
            },
            typing_timeout: file
                .messaging
                .typing_timeout_secs
                .map_or(defaults.typing_timeout, Duration::from_secs),
            resync_on_reconnect: file
                .messaging
                .resync_on_reconnect
                .unwrap_or(defaults.resync_on_reconnect),
        })
    }

    /// The logged-in user, if a user id is configured.
    #[must_use]
    pub fn local_user(&self) -> Option<User> {
        let mut user = User::new(self.user_id?, &self.first_name, &self.last_name);
        user.role = self.role;
        Some(user)
    }

    /// WebSocket session settings.
    #[must_use]
    pub fn ws_config(&self) -> WsConfig {
        WsConfig {
            url: self.ws_url.clone(),
            max_attempts: self.reconnect.max_attempts,
            retry_delay: self.reconnect.delay,
            connect_timeout: self.reconnect.connect_timeout,
        }
    }

    /// REST client settings.
    #[must_use]
    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            base_url: self.api_base_url.clone(),
            auth_token: self.auth_token.clone(),
            timeout: self.request_timeout,
        }
    }

    /// Controller settings.
    #[must_use]
    pub const fn messenger_config(&self) -> MessengerConfig {
        MessengerConfig {
            typing_timeout: self.typing_timeout,
            resync_on_reconnect: self.resync_on_reconnect,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Headless EcoDeli messaging client")]
pub struct CliArgs {
    /// REST API root URL.
    #[arg(long, env = "ECODELI_API_URL")]
    pub api_url: Option<String>,

    /// WebSocket endpoint URL.
    #[arg(long, env = "ECODELI_WS_URL")]
    pub ws_url: Option<String>,

    /// Bearer token for REST calls.
    #[arg(long, env = "ECODELI_TOKEN")]
    pub token: Option<String>,

    /// Logged-in user id.
    #[arg(long, env = "ECODELI_USER_ID")]
    pub user_id: Option<i64>,

    /// Logged-in user's role (client, deliveryman, service_provider,
    /// shopkeeper, admin).
    #[arg(long, env = "ECODELI_ROLE")]
    pub role: Option<String>,

    /// Path to config file (default: `~/.config/ecodeli/messaging.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "ECODELI_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/ecodeli-chat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist. Otherwise the default
/// path is tried and a missing file is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("ecodeli").join("messaging.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
