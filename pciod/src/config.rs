//! Daemon configuration: TOML file, CLI overrides, validation.
//!
//! Built once at start-up and passed by reference afterwards. Resolution
//! order is defaults, then the optional `--config` file, then CLI flags.
//!
//! # TOML Example
//!
//! ```toml
//! frequency_hz = 50.0
//! full_current = true
//! command_expiry_ms = 150
//!
//! [channels]
//! command = "arm-cmd"
//! state = "arm-state"
//!
//! [position_profile]
//! velocity = 0.8
//! acceleration = 3.0
//!
//! [[bus]]
//! net = 0
//! modules = [12, 13, 14]
//! ```

use std::path::Path;
use std::time::Duration;

use pciod_common::bus::PositionProfile;
use pciod_common::config::{ConfigError, ConfigLoader, SharedConfig};
use pciod_common::consts::{
    DEFAULT_CMD_CHANNEL, DEFAULT_COMMAND_EXPIRY_MS, DEFAULT_FREQUENCY_HZ, DEFAULT_STATE_CHANNEL,
    MIN_FREQUENCY_HZ,
};
use pciod_common::group::{BusLayout, ModuleGroup};
use serde::{Deserialize, Serialize};

/// Default number of cycles between statistics log lines.
pub const DEFAULT_STATS_INTERVAL: u64 = 300;

/// Default bus driver.
pub const DEFAULT_DRIVER: &str = "simulation";

/// Command and state channel names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel the daemon reads reference commands from.
    #[serde(default = "default_command_channel")]
    pub command: String,
    /// Channel the daemon publishes motor state on.
    #[serde(default = "default_state_channel")]
    pub state: String,
}

fn default_command_channel() -> String {
    DEFAULT_CMD_CHANNEL.to_string()
}

fn default_state_channel() -> String {
    DEFAULT_STATE_CHANNEL.to_string()
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command: default_command_channel(),
            state: default_state_channel(),
        }
    }
}

/// Real-time thread placement. Only applied with the `rt` feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtConfig {
    /// CPU core to pin the loop thread to.
    #[serde(default = "default_cpu_core")]
    pub cpu_core: usize,
    /// SCHED_FIFO priority.
    #[serde(default = "default_rt_priority")]
    pub priority: i32,
}

fn default_cpu_core() -> usize {
    1
}

fn default_rt_priority() -> i32 {
    80
}

impl Default for RtConfig {
    fn default() -> Self {
        Self {
            cpu_core: default_cpu_core(),
            priority: default_rt_priority(),
        }
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Service name and log level.
    #[serde(default)]
    pub shared: SharedConfig,

    /// Channel names.
    #[serde(default)]
    pub channels: ChannelConfig,

    /// Control loop rate [Hz]; the command wait never exceeds one period.
    #[serde(default = "default_frequency")]
    pub frequency_hz: f64,

    /// Put the modules into full-current mode at start-up.
    #[serde(default)]
    pub full_current: bool,

    /// Run the homing procedure before entering the loop.
    #[serde(default)]
    pub home_on_start: bool,

    /// Validity window for commands whose header carries none [ms].
    #[serde(default = "default_command_expiry")]
    pub command_expiry_ms: u64,

    /// Velocity/acceleration ceiling for position commands.
    #[serde(default)]
    pub position_profile: PositionProfile,

    /// Per-module rated velocity. Read from the modules when absent.
    #[serde(default)]
    pub rated_velocity: Option<Vec<f64>>,

    /// Bus driver name.
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Cycles between statistics log lines.
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u64,

    /// Thread placement for the `rt` feature.
    #[serde(default)]
    pub rt: RtConfig,

    /// Buses in group order.
    #[serde(default, rename = "bus")]
    pub buses: Vec<BusLayout>,
}

fn default_frequency() -> f64 {
    DEFAULT_FREQUENCY_HZ
}

fn default_command_expiry() -> u64 {
    DEFAULT_COMMAND_EXPIRY_MS
}

fn default_driver() -> String {
    DEFAULT_DRIVER.to_string()
}

fn default_stats_interval() -> u64 {
    DEFAULT_STATS_INTERVAL
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            shared: SharedConfig::default(),
            channels: ChannelConfig::default(),
            frequency_hz: default_frequency(),
            full_current: false,
            home_on_start: false,
            command_expiry_ms: default_command_expiry(),
            position_profile: PositionProfile::default(),
            rated_velocity: None,
            driver: default_driver(),
            stats_interval: default_stats_interval(),
            rt: RtConfig::default(),
            buses: Vec::new(),
        }
    }
}

/// Values given on the command line. `None`/empty leaves the file value.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// `--cmd-channel`
    pub command_channel: Option<String>,
    /// `--state-channel`
    pub state_channel: Option<String>,
    /// `--frequency`
    pub frequency_hz: Option<f64>,
    /// `--full-current`
    pub full_current: bool,
    /// `--home`
    pub home: bool,
    /// `--driver`
    pub driver: Option<String>,
    /// `--bus`, replaces every `[[bus]]` table when non-empty.
    pub buses: Vec<BusLayout>,
    /// `--cpu-core`
    pub cpu_core: Option<usize>,
    /// `--rt-priority`
    pub rt_priority: Option<i32>,
}

impl DaemonConfig {
    /// Resolve defaults, optional file and CLI overrides, then validate.
    pub fn resolve(path: Option<&Path>, overrides: &CliOverrides) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Layer CLI values over this configuration.
    pub fn apply(&mut self, overrides: &CliOverrides) {
        if let Some(ref name) = overrides.command_channel {
            self.channels.command = name.clone();
        }
        if let Some(ref name) = overrides.state_channel {
            self.channels.state = name.clone();
        }
        if let Some(hz) = overrides.frequency_hz {
            self.frequency_hz = hz;
        }
        self.full_current |= overrides.full_current;
        self.home_on_start |= overrides.home;
        if let Some(ref driver) = overrides.driver {
            self.driver = driver.clone();
        }
        if !overrides.buses.is_empty() {
            self.buses = overrides.buses.clone();
        }
        if let Some(core) = overrides.cpu_core {
            self.rt.cpu_core = core;
        }
        if let Some(priority) = overrides.rt_priority {
            self.rt.priority = priority;
        }
    }

    /// Check every field; the first violation is reported.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        self.shared.validate()?;

        if !self.frequency_hz.is_finite() || self.frequency_hz < MIN_FREQUENCY_HZ {
            return invalid(format!(
                "frequency_hz must be finite and >= {MIN_FREQUENCY_HZ}, got {}",
                self.frequency_hz
            ));
        }
        if self.command_expiry_ms == 0 {
            return invalid("command_expiry_ms must be > 0".to_string());
        }
        if self.stats_interval == 0 {
            return invalid("stats_interval must be > 0".to_string());
        }
        if self.channels.command.is_empty() || self.channels.state.is_empty() {
            return invalid("channel names cannot be empty".to_string());
        }
        if self.channels.command == self.channels.state {
            return invalid(format!(
                "command and state channels must differ, both are '{}'",
                self.channels.command
            ));
        }
        let profile = &self.position_profile;
        if !(profile.velocity.is_finite() && profile.velocity > 0.0)
            || !(profile.acceleration.is_finite() && profile.acceleration > 0.0)
        {
            return invalid(format!(
                "position_profile values must be finite and > 0, got velocity={} acceleration={}",
                profile.velocity, profile.acceleration
            ));
        }

        let group = self
            .group()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if let Some(ref rated) = self.rated_velocity {
            if rated.len() != group.len() {
                return invalid(format!(
                    "rated_velocity has {} entries, group has {} modules",
                    rated.len(),
                    group.len()
                ));
            }
            if let Some((i, v)) = rated
                .iter()
                .enumerate()
                .find(|(_, v)| !v.is_finite() || **v <= 0.0)
            {
                return invalid(format!("rated_velocity[{i}] must be finite and > 0, got {v}"));
            }
        }
        Ok(())
    }

    /// Freeze the bus layout into a module group.
    pub fn group(&self) -> Result<ModuleGroup, pciod_common::group::GroupError> {
        ModuleGroup::new(&self.buses)
    }

    /// Control period, `1 / frequency_hz`.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frequency_hz)
    }

    /// Fallback validity window for commands.
    pub fn command_expiry(&self) -> Duration {
        Duration::from_millis(self.command_expiry_ms)
    }
}
