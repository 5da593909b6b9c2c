//! Daemon configuration – reads `~/.gpio-bridge/config.toml`.

use gpiobridge_hal::sysfs::DEFAULT_SYSFS_ROOT;
use gpiobridge_middleware::BrokerConfig;
use gpiobridge_runtime::BridgeConfig;
use gpiobridge_types::BridgeError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which line backends drive the two banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-memory lines; commands can be typed on stdin.
    #[default]
    Sim,
    /// Linux sysfs GPIO, SoC pins plus the expander's gpiochip.
    Sysfs,
}

impl std::str::FromStr for Backend {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sim" => Ok(Backend::Sim),
            "sysfs" => Ok(Backend::Sysfs),
            other => Err(BridgeError::Config(format!("unknown backend '{other}'"))),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Sim => write!(f, "sim"),
            Backend::Sysfs => write!(f, "sysfs"),
        }
    }
}

/// Which bus the bridge talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// In-process bus; only the console and the status log see it.
    Local,
    /// MQTT broker at `broker_host:broker_port`.
    Mqtt,
}

impl std::str::FromStr for BusKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(BusKind::Local),
            "mqtt" => Ok(BusKind::Mqtt),
            other => Err(BridgeError::Config(format!("unknown bus '{other}'"))),
        }
    }
}

impl std::fmt::Display for BusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusKind::Local => write!(f, "local"),
            BusKind::Mqtt => write!(f, "mqtt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: Backend,

    /// Root of the sysfs GPIO class directory.
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,

    /// First global GPIO number of the port expander's gpiochip.
    #[serde(default = "default_expander_gpio_base")]
    pub expander_gpio_base: u32,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Settle time between line configuration and the first read.
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,

    /// How long an input contact must stay closed before it is reported.
    #[serde(default = "default_input_hold_ms")]
    pub input_hold_ms: u64,

    /// Bus selection; unset means `mqtt` for sysfs and `local` for sim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus: Option<BusKind>,

    #[serde(default = "default_broker_host")]
    pub broker_host: String,

    #[serde(default = "default_broker_port")]
    pub broker_port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Accept `topic payload` lines on stdin (sim backend only).
    #[serde(default = "default_console")]
    pub console: bool,
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from(DEFAULT_SYSFS_ROOT)
}
fn default_expander_gpio_base() -> u32 {
    496
}
fn default_poll_interval_ms() -> u64 {
    50
}
fn default_startup_delay_ms() -> u64 {
    1000
}
fn default_input_hold_ms() -> u64 {
    1000
}
fn default_broker_host() -> String {
    "localhost".to_string()
}
fn default_broker_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "gpio".to_string()
}
fn default_console() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            sysfs_root: default_sysfs_root(),
            expander_gpio_base: default_expander_gpio_base(),
            poll_interval_ms: default_poll_interval_ms(),
            startup_delay_ms: default_startup_delay_ms(),
            input_hold_ms: default_input_hold_ms(),
            bus: None,
            broker_host: default_broker_host(),
            broker_port: default_broker_port(),
            client_id: default_client_id(),
            console: default_console(),
        }
    }
}

impl Config {
    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.poll_interval_ms == 0 {
            return Err(BridgeError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.bus_kind() == BusKind::Mqtt && self.broker_host.trim().is_empty() {
            return Err(BridgeError::Config("broker_host must not be empty".to_string()));
        }
        if self.client_id.trim().is_empty() {
            return Err(BridgeError::Config("client_id must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            startup_delay: Duration::from_millis(self.startup_delay_ms),
            input_hold: Duration::from_millis(self.input_hold_ms),
        }
    }

    pub fn bus_kind(&self) -> BusKind {
        self.bus.unwrap_or(match self.backend {
            Backend::Sim => BusKind::Local,
            Backend::Sysfs => BusKind::Mqtt,
        })
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            host: self.broker_host.clone(),
            port: self.broker_port,
            ..BrokerConfig::new(self.client_id.clone())
        }
    }
}

/// Return the config path: `$GPIOBRIDGE_CONFIG`, else
/// `~/.gpio-bridge/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("GPIOBRIDGE_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".gpio-bridge").join("config.toml")
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `GPIOBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `GPIOBRIDGE_BACKEND` | `backend` |
/// | `GPIOBRIDGE_POLL_INTERVAL_MS` | `poll_interval_ms` |
/// | `GPIOBRIDGE_STARTUP_DELAY_MS` | `startup_delay_ms` |
/// | `GPIOBRIDGE_SYSFS_ROOT` | `sysfs_root` |
/// | `GPIOBRIDGE_INPUT_HOLD_MS` | `input_hold_ms` |
/// | `GPIOBRIDGE_BUS` | `bus` |
/// | `GPIOBRIDGE_BROKER_HOST` | `broker_host` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("GPIOBRIDGE_BACKEND")
        && let Ok(backend) = v.parse::<Backend>()
    {
        cfg.backend = backend;
    }
    if let Ok(v) = std::env::var("GPIOBRIDGE_POLL_INTERVAL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.poll_interval_ms = ms;
    }
    if let Ok(v) = std::env::var("GPIOBRIDGE_STARTUP_DELAY_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.startup_delay_ms = ms;
    }
    if let Ok(v) = std::env::var("GPIOBRIDGE_SYSFS_ROOT") {
        cfg.sysfs_root = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("GPIOBRIDGE_INPUT_HOLD_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.input_hold_ms = ms;
    }
    if let Ok(v) = std::env::var("GPIOBRIDGE_BUS")
        && let Ok(bus) = v.parse::<BusKind>()
    {
        cfg.bus = Some(bus);
    }
    if let Ok(v) = std::env::var("GPIOBRIDGE_BROKER_HOST") {
        cfg.broker_host = v;
    }
}

/// Load the config the daemon runs with, plus the reason defaults were used
/// if the file could not be.
///
/// A missing, unreadable or invalid file yields defaults; environment
/// overrides apply in every case.
pub fn resolve() -> (Config, Option<String>) {
    resolve_from(&config_path())
}

pub(crate) fn resolve_from(path: &Path) -> (Config, Option<String>) {
    let (mut cfg, problem) = match load_from(path) {
        Ok(Some(cfg)) => (cfg, None),
        Ok(None) => (Config::default(), None),
        Err(e) => (Config::default(), Some(e)),
    };
    apply_env_overrides(&mut cfg);
    fallback_if_invalid(cfg, problem)
}

fn fallback_if_invalid(cfg: Config, problem: Option<String>) -> (Config, Option<String>) {
    match cfg.validate() {
        Ok(()) => (cfg, problem),
        Err(e) => {
            let mut fallback = Config::default();
            apply_env_overrides(&mut fallback);
            if fallback.validate().is_err() {
                fallback = Config::default();
            }
            (fallback, Some(e.to_string()))
        }
    }
}
