//! Bus driver implementations.
//!
//! - [`simulation`] - Software model of the module group
//!
//! # Adding New Drivers
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement `GroupBus` from `pciod_common::bus`
//! 3. Add a factory entry to [`DRIVERS`]

pub mod simulation;

use pciod_common::bus::GroupBus;
use pciod_common::group::ModuleGroup;
use tracing::info;

use crate::error::{DaemonError, DaemonResult};

/// Factory opening a driver on a frozen group layout.
pub type DriverFactory = fn(ModuleGroup) -> Box<dyn GroupBus>;

/// Built-in drivers by name.
pub const DRIVERS: &[(&str, DriverFactory)] = &[("simulation", simulation::create_driver)];

/// Names of every built-in driver.
pub fn driver_names() -> impl Iterator<Item = &'static str> {
    DRIVERS.iter().map(|(name, _)| *name)
}

/// Open `group` with the driver registered as `name`.
pub fn open_group(name: &str, group: ModuleGroup) -> DaemonResult<Box<dyn GroupBus>> {
    let (_, factory) = DRIVERS
        .iter()
        .find(|(driver, _)| *driver == name)
        .ok_or_else(|| DaemonError::UnknownDriver(name.to_string()))?;
    let bus = factory(group);
    info!(driver = name, modules = bus.size(), "module group opened");
    Ok(bus)
}
