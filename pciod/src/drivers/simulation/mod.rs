//! Simulation driver.
//!
//! A kinematic model of every module in the group, for development and
//! testing without a fieldbus.

mod driver;
mod module;

pub use driver::{SimOp, SimStats, SimulatedGroup};
pub use module::{DriveMode, SimModule};

use pciod_common::bus::GroupBus;
use pciod_common::group::ModuleGroup;

/// Factory: open a simulated group that moves in real time.
pub fn create_driver(group: ModuleGroup) -> Box<dyn GroupBus> {
    Box::new(SimulatedGroup::new(group))
}
