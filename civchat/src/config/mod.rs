//! Configuration system for the `CivChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/civchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

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

    /// A configured URL is not valid.
    #[error("invalid {field} URL: {source}")]
    InvalidUrl {
        /// Which setting was malformed.
        field: &'static str,
        /// Parser error.
        source: url::ParseError,
    },

    /// A setting required to go online is missing.
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    connection: ConnectionFileConfig,
    chat: ChatFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    api_url: Option<String>,
    socket_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// `[connection]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConnectionFileConfig {
    reconnect_delay_ms: Option<u64>,
    connect_timeout_secs: Option<u64>,
    handshake_timeout_secs: Option<u64>,
    max_reconnect_attempts: Option<u32>,
}

/// `[chat]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    page_size: Option<u32>,
    typing_idle_ms: Option<u64>,
    remote_typing_ttl_secs: Option<u64>,
    unread_poll_secs: Option<u64>,
    event_buffer: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Push channel settings (used by `ConnectionManager` and `WsConnector`).
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Delay before the single reconnect attempt after a transport drop.
    pub reconnect_delay: Duration,
    /// Timeout for the WebSocket connect.
    pub connect_timeout: Duration,
    /// Timeout for the `connected` acknowledgement.
    pub handshake_timeout: Duration,
    /// Consecutive failed reconnects tolerated; `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    /// Outbound queue and subscription buffer size.
    pub event_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(5000),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
            max_reconnect_attempts: None,
            event_buffer: 256,
        }
    }
}

/// Chat subsystem settings (used by `ChatClient` and `ChatView`).
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Messages per page for history loads.
    pub page_size: u32,
    /// Idle time after the last keystroke before `typing_stop` is sent.
    pub typing_idle: Duration,
    /// How long a remote typing flag survives without a stop; `None` keeps it.
    pub remote_typing_ttl: Option<Duration>,
    /// Interval of the unread-count resync.
    pub unread_poll: Duration,
    /// Buffer size for view and client update channels.
    pub event_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            typing_idle: Duration::from_millis(1000),
            remote_typing_ttl: Some(Duration::from_secs(5)),
            unread_poll: Duration::from_secs(30),
            event_buffer: 256,
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// Base URL of the REST API (e.g. `http://localhost:3000/api/`).
    pub api_url: Option<String>,
    /// WebSocket URL of the push channel.
    pub socket_url: Option<String>,
    /// Timeout for each REST request.
    pub request_timeout: Duration,

    // -- Session --
    /// Signed-in user id.
    pub user_id: Option<String>,
    /// Bearer token.
    pub token: Option<String>,
    /// Peer to open a chat with on startup.
    pub peer: Option<String>,

    // -- Subsystems --
    /// Push channel settings.
    pub connection: ConnectionConfig,
    /// Chat settings.
    pub chat: ChatConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            socket_url: None,
            request_timeout: Duration::from_secs(15),
            user_id: None,
            token: None,
            peer: None,
            connection: ConnectionConfig::default(),
            chat: ChatConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path
    /// (`~/.config/civchat/config.toml`) is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or if any config file cannot be parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let conn = &file.connection;
        let chat = &file.chat;

        Self {
            api_url: cli.api_url.clone().or_else(|| file.server.api_url.clone()),
            socket_url: cli
                .socket_url
                .clone()
                .or_else(|| file.server.socket_url.clone()),
            request_timeout: file
                .server
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            user_id: cli.user_id.clone(),
            token: cli.token.clone(),
            peer: cli.peer.clone(),
            connection: ConnectionConfig {
                reconnect_delay: conn
                    .reconnect_delay_ms
                    .map_or(defaults.connection.reconnect_delay, Duration::from_millis),
                connect_timeout: conn
                    .connect_timeout_secs
                    .map_or(defaults.connection.connect_timeout, Duration::from_secs),
                handshake_timeout: conn
                    .handshake_timeout_secs
                    .map_or(defaults.connection.handshake_timeout, Duration::from_secs),
                max_reconnect_attempts: conn
                    .max_reconnect_attempts
                    .or(defaults.connection.max_reconnect_attempts),
                event_buffer: chat
                    .event_buffer
                    .unwrap_or(defaults.connection.event_buffer),
            },
            chat: ChatConfig {
                page_size: chat.page_size.unwrap_or(defaults.chat.page_size),
                typing_idle: chat
                    .typing_idle_ms
                    .map_or(defaults.chat.typing_idle, Duration::from_millis),
                remote_typing_ttl: match chat.remote_typing_ttl_secs {
                    Some(0) => None,
                    Some(secs) => Some(Duration::from_secs(secs)),
                    None => defaults.chat.remote_typing_ttl,
                },
                unread_poll: chat
                    .unread_poll_secs
                    .map_or(defaults.chat.unread_poll, Duration::from_secs),
                event_buffer: chat.event_buffer.unwrap_or(defaults.chat.event_buffer),
            },
        }
    }

    /// Parsed REST base URL, normalized to end with `/`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] if unset, [`ConfigError::InvalidUrl`] if
    /// malformed.
    pub fn api_base(&self) -> Result<url::Url, ConfigError> {
        let raw = self.api_url.as_deref().ok_or(ConfigError::Missing("api_url"))?;
        let normalized = if raw.ends_with('/') {
            raw.to_string()
        } else {
            format!("{raw}/")
        };
        url::Url::parse(&normalized).map_err(|source| ConfigError::InvalidUrl {
            field: "api",
            source,
        })
    }

    /// Parsed push channel URL.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] if unset, [`ConfigError::InvalidUrl`] if
    /// malformed.
    pub fn socket(&self) -> Result<url::Url, ConfigError> {
        let raw = self
            .socket_url
            .as_deref()
            .ok_or(ConfigError::Missing("socket_url"))?;
        url::Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
            field: "socket",
            source,
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Real-time chat client for the civic network")]
pub struct CliArgs {
    /// Base URL of the REST API.
    #[arg(long, env = "CIVCHAT_API_URL")]
    pub api_url: Option<String>,

    /// WebSocket URL of the push channel.
    #[arg(long, env = "CIVCHAT_SOCKET_URL")]
    pub socket_url: Option<String>,

    /// Your user id.
    #[arg(long, env = "CIVCHAT_USER_ID")]
    pub user_id: Option<String>,

    /// Bearer token issued at login.
    #[arg(long, env = "CIVCHAT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Open a chat with this user on startup.
    #[arg(long)]
    pub peer: Option<String>,

    /// Path to config file (default: `~/.config/civchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CIVCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/civchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("civchat").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
