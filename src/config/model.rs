//! Configuration data model.
//!
//! All structs derive `Serialize`/`Deserialize` for TOML persistence.
//! Every field has a sensible default so the application works out of the box.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::nickname::generate_nickname;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub irc: IrcConfig,
    #[serde(default)]
    pub dcc: DccConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The chat network hosting the book catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrcConfig {
    /// Hostname of the IRC server.
    #[serde(default = "default_irc_server")]
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub tls: bool,
    /// Channel to join, with or without the leading `#`.
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Fixed nickname. A random one is generated per connection when unset.
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default = "default_realname")]
    pub realname: String,
    /// Name of the search bot, addressed as `@<search_bot> <query>`.
    #[serde(default = "default_search_bot")]
    pub search_bot: String,
    /// Give up on a connection attempt after this many seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for IrcConfig {
    fn default() -> Self {
        Self {
            server: default_irc_server(),
            port: default_port(),
            tls: true,
            channel: default_channel(),
            nickname: None,
            realname: default_realname(),
            search_bot: default_search_bot(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl IrcConfig {
    /// `host:port` of the IRC server.
    pub fn address(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    /// Nickname for a terminal-mode connection.
    pub fn nickname(&self) -> String {
        self.nickname.clone().unwrap_or_else(generate_nickname)
    }

    /// Nickname for one server-mode session. Several sessions share the
    /// network, so a configured nickname gets the session number appended.
    pub fn session_nickname(&self, session: u64) -> String {
        match &self.nickname {
            Some(nick) => format!("{}_{}", nick, session),
            None => generate_nickname(),
        }
    }
}

/// DCC file transfer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DccConfig {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default)]
    pub reject_private_ips: bool,
}

impl Default for DccConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_file_size: default_max_file_size(),
            reject_private_ips: false,
        }
    }
}

/// Whether search rate limiting is tracked per connected user or across the
/// whole hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitScope {
    #[default]
    Session,
    Hub,
}

/// Multi-user web front end settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Keep books in the download directory after they have been served.
    #[serde(default)]
    pub persist: bool,
    #[serde(default = "default_search_interval")]
    pub search_interval_secs: u64,
    #[serde(default)]
    pub rate_limit_scope: RateLimitScope,
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            persist: false,
            search_interval_secs: default_search_interval(),
            rate_limit_scope: RateLimitScope::Session,
            keepalive_secs: default_keepalive(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

/// Raw IRC traffic logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_dir: default_log_dir(),
        }
    }
}

fn default_irc_server() -> String {
    "irc.irchighway.net".to_string()
}
fn default_port() -> u16 {
    6697
}
fn default_true() -> bool {
    true
}
fn default_channel() -> String {
    "ebooks".to_string()
}
fn default_realname() -> String {
    "crabbooks".to_string()
}
fn default_search_bot() -> String {
    "search".to_string()
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}
fn default_max_file_size() -> u64 {
    500 * 1024 * 1024 // 500 MB
}
fn default_listen() -> String {
    "127.0.0.1:5228".to_string()
}
fn default_search_interval() -> u64 {
    10
}
fn default_keepalive() -> u64 {
    30
}
fn default_outbound_queue() -> usize {
    64
}
fn default_log_dir() -> String {
    "~/.local/share/crabbooks/logs".to_string()
}
