//! Configuration file – reads/writes `~/.go2gate/config.toml`.
//!
//! ```toml
//! bus_capacity = 256
//!
//! [robot]
//! host = "127.0.0.1"
//! port = 5555
//! transport = "tcp"
//! connect_timeout_ms = 3000
//!
//! [actions]
//! follow = "따라가라"
//! block = "길을 막아라"
//! research = "주변을 탐색하라"
//!
//! [listener]
//! enabled = true
//! host = "0.0.0.0"
//! port = 6000
//! transports = ["tcp"]
//! idle_timeout_ms = 2000
//!
//! [cockpit]
//! enabled = true
//! port = 8080
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use go2gate_hal::RobotClient;
use go2gate_middleware::ListenerConfig;
use go2gate_runtime::ActionTable;
use go2gate_types::{Action, Transport};

/// Where outbound commands go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotConfig {
    #[serde(default = "default_robot_host")]
    pub host: String,
    #[serde(default = "default_robot_port")]
    pub port: u16,
    #[serde(default)]
    pub transport: Transport,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Wire names per canonical action, plus extra phrases that select them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionsConfig {
    #[serde(default = "default_follow")]
    pub follow: String,
    #[serde(default = "default_block")]
    pub block: String,
    #[serde(default = "default_research")]
    pub research: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_synonyms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block_synonyms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub research_synonyms: Vec<String>,
}

/// Inbound event listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_listener_host")]
    pub host: String,
    #[serde(default = "default_listener_port")]
    pub port: u16,
    #[serde(default = "default_listener_transports")]
    pub transports: Vec<Transport>,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default)]
    pub stamp_peer_source: bool,
}

/// WebSocket relay for observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CockpitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cockpit_port")]
    pub port: u16,
}

/// Persisted configuration stored in `~/.go2gate/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Per-subscription queue capacity of the event bus.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
    #[serde(default)]
    pub robot: RobotConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
    #[serde(default)]
    pub listener: ListenerSection,
    #[serde(default)]
    pub cockpit: CockpitConfig,
}

fn default_true() -> bool {
    true
}
fn default_robot_host() -> String {
    "127.0.0.1".to_string()
}
fn default_robot_port() -> u16 {
    5555
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_follow() -> String {
    "따라가라".to_string()
}
fn default_block() -> String {
    "길을 막아라".to_string()
}
fn default_research() -> String {
    "주변을 탐색하라".to_string()
}
fn default_listener_host() -> String {
    "0.0.0.0".to_string()
}
fn default_listener_port() -> u16 {
    6000
}
fn default_listener_transports() -> Vec<Transport> {
    vec![Transport::Tcp]
}
fn default_idle_timeout_ms() -> u64 {
    2000
}
fn default_cockpit_port() -> u16 {
    go2gate_cockpit::DEFAULT_PORT
}
fn default_bus_capacity() -> usize {
    go2gate_middleware::bus::DEFAULT_CAPACITY
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            host: default_robot_host(),
            port: default_robot_port(),
            transport: Transport::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            follow: default_follow(),
            block: default_block(),
            research: default_research(),
            follow_synonyms: Vec::new(),
            block_synonyms: Vec::new(),
            research_synonyms: Vec::new(),
        }
    }
}

impl Default for ListenerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_listener_host(),
            port: default_listener_port(),
            transports: default_listener_transports(),
            idle_timeout_ms: default_idle_timeout_ms(),
            stamp_peer_source: false,
        }
    }
}

impl Default for CockpitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_cockpit_port(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus_capacity: default_bus_capacity(),
            robot: RobotConfig::default(),
            actions: ActionsConfig::default(),
            listener: ListenerSection::default(),
            cockpit: CockpitConfig::default(),
        }
    }
}

impl Config {
    pub fn robot_client(&self) -> RobotClient {
        RobotClient::new(&self.robot.host, self.robot.port, self.robot.transport)
            .with_connect_timeout(Duration::from_millis(self.robot.connect_timeout_ms))
    }

    pub fn action_table(&self) -> ActionTable {
        let a = &self.actions;
        ActionTable::new(&a.follow, &a.block, &a.research)
            .with_synonyms(Action::Follow, &a.follow_synonyms)
            .with_synonyms(Action::Block, &a.block_synonyms)
            .with_synonyms(Action::Research, &a.research_synonyms)
    }

    pub fn listener_config(&self) -> ListenerConfig {
        let l = &self.listener;
        ListenerConfig {
            idle_timeout: Duration::from_millis(l.idle_timeout_ms),
            stamp_peer_source: l.stamp_peer_source,
            ..ListenerConfig::new(&l.host, l.port, l.transports.clone())
        }
    }
}

/// Return the path to `~/.go2gate/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".go2gate").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `GO2GATE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `GO2GATE_ROBOT_HOST` | `robot.host` |
/// | `GO2GATE_ROBOT_PORT` | `robot.port` |
/// | `GO2GATE_ROBOT_TRANSPORT` | `robot.transport` |
/// | `GO2GATE_ACTION_FOLLOW` | `actions.follow` |
/// | `GO2GATE_ACTION_BLOCK` | `actions.block` |
/// | `GO2GATE_ACTION_RESEARCH` | `actions.research` |
/// | `GO2GATE_LISTENER_PORT` | `listener.port` |
/// | `GO2GATE_COCKPIT_PORT` | `cockpit.port` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("GO2GATE_ROBOT_HOST") {
        cfg.robot.host = v;
    }
    if let Ok(v) = std::env::var("GO2GATE_ROBOT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.robot.port = port;
    }
    if let Ok(v) = std::env::var("GO2GATE_ROBOT_TRANSPORT")
        && let Ok(transport) = v.parse::<Transport>()
    {
        cfg.robot.transport = transport;
    }
    if let Ok(v) = std::env::var("GO2GATE_ACTION_FOLLOW") {
        cfg.actions.follow = v;
    }
    if let Ok(v) = std::env::var("GO2GATE_ACTION_BLOCK") {
        cfg.actions.block = v;
    }
    if let Ok(v) = std::env::var("GO2GATE_ACTION_RESEARCH") {
        cfg.actions.research = v;
    }
    if let Ok(v) = std::env::var("GO2GATE_LISTENER_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.listener.port = port;
    }
    if let Ok(v) = std::env::var("GO2GATE_COCKPIT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.cockpit.port = port;
    }
}

/// Save the config to disk, creating `~/.go2gate/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
