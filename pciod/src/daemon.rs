//! Daemon start-up and teardown.
//!
//! ```text
//! open group ─▶ home? ─▶ open channels ─▶ rated velocities ─▶ operating mode
//!     ─▶ initial state ─▶ RT setup ─▶ control loop (until shutdown)
//!     ─▶ drop channels, group
//! ```
//!
//! Every step before the loop is fatal on failure.

use std::sync::atomic::AtomicBool;

use pciod_common::bus::GroupBus;
use tracing::info;

use crate::channel::open_channels;
use crate::config::DaemonConfig;
use crate::cycle::{ControlContext, CycleStats, rt_setup};
use crate::drivers::open_group;
use crate::error::DaemonResult;

/// Freeze the configured layout and open it with the configured driver.
pub fn open_bus(config: &DaemonConfig) -> DaemonResult<Box<dyn GroupBus>> {
    let group = config.group()?;
    open_group(&config.driver, group)
}

/// Run the daemon until `shutdown` is set. Returns the final loop counters.
pub fn run(config: &DaemonConfig, shutdown: &AtomicBool) -> DaemonResult<CycleStats> {
    let mut bus = open_bus(config)?;

    if config.home_on_start {
        info!("homing module group");
        bus.home()?;
    }

    let (mut commands, mut states) = open_channels(&config.channels.command, &config.channels.state)?;

    let mut ctx = ControlContext::init(bus, config)?;

    rt_setup(config.rt.cpu_core, config.rt.priority)?;

    info!(
        service = %config.shared.service_name,
        frequency_hz = config.frequency_hz,
        command_channel = %config.channels.command,
        state_channel = %config.channels.state,
        modules = ctx.bus().size(),
        "daemon ready"
    );

    ctx.run(&mut commands, &mut states, shutdown);

    let stats = ctx.stats().clone();
    drop(commands);
    drop(states);
    drop(ctx);
    info!("channels and module group closed");
    Ok(stats)
}
