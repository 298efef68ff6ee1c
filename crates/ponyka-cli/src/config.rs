//! Bridge configuration – `~/.ponyka/config.toml` plus environment overrides.
//!
//! Resolution order for the file: `--config <path>`, then `PONYKA_CONFIG`,
//! then `~/.ponyka/config.toml`. A missing file is not an error; every field
//! has a default.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ponyka_middleware::FeedDescriptor;
use ponyka_types::BridgeError;
use serde::{Deserialize, Serialize};

/// Ports and hosts of the robot's gRPC services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrpcConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_robot_state_port")]
    pub robot_state_port: u16,
    #[serde(default = "default_opstate_port")]
    pub opstate_port: u16,
    #[serde(default = "default_nav_command_port")]
    pub nav_command_port: u16,
    #[serde(default = "default_task_command_port")]
    pub task_command_port: u16,
}

/// Throttle windows and periods, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,
    #[serde(default = "default_log_interval_ms")]
    pub log_interval_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_command_period_ms")]
    pub command_period_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP command surface.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// WebSocket push endpoint.
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    #[serde(default)]
    pub grpc: GrpcConfig,

    #[serde(default)]
    pub timing: TimingConfig,
}

fn default_http_port() -> u16 {
    3001
}
fn default_ws_port() -> u16 {
    3005
}
fn default_host() -> String {
    "192.168.10.9".to_string()
}
fn default_robot_state_port() -> u16 {
    50053
}
fn default_opstate_port() -> u16 {
    50060
}
fn default_nav_command_port() -> u16 {
    50056
}
fn default_task_command_port() -> u16 {
    50052
}
fn default_broadcast_interval_ms() -> u64 {
    100
}
fn default_log_interval_ms() -> u64 {
    1000
}
fn default_reconnect_delay_ms() -> u64 {
    5000
}
fn default_command_period_ms() -> u64 {
    50
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            robot_state_port: default_robot_state_port(),
            opstate_port: default_opstate_port(),
            nav_command_port: default_nav_command_port(),
            task_command_port: default_task_command_port(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            broadcast_interval_ms: default_broadcast_interval_ms(),
            log_interval_ms: default_log_interval_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            command_period_ms: default_command_period_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            ws_port: default_ws_port(),
            grpc: GrpcConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl GrpcConfig {
    fn endpoint(&self, port: u16) -> String {
        format!("{}:{}", self.host, port)
    }

    pub fn robot_state_endpoint(&self) -> String {
        self.endpoint(self.robot_state_port)
    }

    pub fn opstate_endpoint(&self) -> String {
        self.endpoint(self.opstate_port)
    }

    pub fn nav_command_endpoint(&self) -> String {
        self.endpoint(self.nav_command_port)
    }

    pub fn task_command_endpoint(&self) -> String {
        self.endpoint(self.task_command_port)
    }
}

impl TimingConfig {
    pub fn command_period(&self) -> Duration {
        Duration::from_millis(self.command_period_ms)
    }

    fn apply(&self, feed: FeedDescriptor) -> FeedDescriptor {
        feed.with_broadcast_interval(Duration::from_millis(self.broadcast_interval_ms))
            .with_log_interval(Duration::from_millis(self.log_interval_ms))
            .with_reconnect_delay(Duration::from_millis(self.reconnect_delay_ms))
    }
}

impl Config {
    pub fn robot_state_feed(&self) -> FeedDescriptor {
        self.timing
            .apply(FeedDescriptor::robot_state(self.grpc.robot_state_endpoint()))
    }

    pub fn operation_state_feed(&self) -> FeedDescriptor {
        self.timing
            .apply(FeedDescriptor::operation_state(self.grpc.opstate_endpoint()))
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.grpc.host.trim().is_empty() {
            return Err(BridgeError::Config("grpc.host must not be empty".to_string()));
        }
        if self.timing.command_period_ms == 0 {
            return Err(BridgeError::Config("timing.command_period_ms must be > 0".to_string()));
        }
        if self.http_port != 0 && self.http_port == self.ws_port {
            return Err(BridgeError::Config(format!(
                "http_port and ws_port are both {}",
                self.http_port
            )));
        }
        Ok(())
    }
}

/// Return the path to `~/.ponyka/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".ponyka").join("config.toml")
}

/// Pick the config file: explicit path, then `PONYKA_CONFIG`, then the
/// home directory default.
pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match std::env::var("PONYKA_CONFIG") {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => config_path(),
    }
}

/// Load, apply environment overrides and validate.
pub fn load(explicit: Option<&Path>) -> Result<Config, BridgeError> {
    let mut cfg = load_from(&resolve_path(explicit))?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Parse the file at `path`, or return defaults when it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Config, BridgeError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        BridgeError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    toml::from_str(&raw).map_err(|e| {
        BridgeError::Config(format!("failed to parse config at {}: {e}", path.display()))
    })
}

/// Apply environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `PORT` | `http_port` |
/// | `WSS_PORT` | `ws_port` |
/// | `GRPC_SERVER_HOST` | `grpc.host` |
/// | `GRPC_ROBOT_STATE_SERVER_PORT` | `grpc.robot_state_port` |
/// | `GRPC_OPSTATE_SERVER_PORT` | `grpc.opstate_port` |
/// | `GRPC_NAV_COMMAND_SERVER_PORT` | `grpc.nav_command_port` |
/// | `GRPC_TASK_COMMAND_SERVER_PORT` | `grpc.task_command_port` |
///
/// Port values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let port = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u16>().ok());

    if let Some(p) = port("PORT") {
        cfg.http_port = p;
    }
    if let Some(p) = port("WSS_PORT") {
        cfg.ws_port = p;
    }
    if let Some(host) = lookup("GRPC_SERVER_HOST")
        && !host.trim().is_empty()
    {
        cfg.grpc.host = host.trim().to_string();
    }
    if let Some(p) = port("GRPC_ROBOT_STATE_SERVER_PORT") {
        cfg.grpc.robot_state_port = p;
    }
    if let Some(p) = port("GRPC_OPSTATE_SERVER_PORT") {
        cfg.grpc.opstate_port = p;
    }
    if let Some(p) = port("GRPC_NAV_COMMAND_SERVER_PORT") {
        cfg.grpc.nav_command_port = p;
    }
    if let Some(p) = port("GRPC_TASK_COMMAND_SERVER_PORT") {
        cfg.grpc.task_command_port = p;
    }
}
