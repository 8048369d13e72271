//! Module group layout: ordered buses, each with ordered modules.
//!
//! The layout is described by [`BusLayout`] entries (from the CLI or the
//! config file) and frozen into a [`ModuleGroup`] once. The group's module
//! count `n` never changes afterwards and sizes every command and state
//! message the daemon handles.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::consts::MAX_MODULES;

/// Errors building or parsing a module group layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupError {
    /// No modules configured at all.
    #[error("module group is empty")]
    Empty,

    /// A bus entry carries no modules.
    #[error("bus {net} has no modules")]
    EmptyBus {
        /// Network id of the offending bus.
        net: u32,
    },

    /// The same network id is listed twice.
    #[error("bus {net} listed more than once")]
    DuplicateBus {
        /// Network id.
        net: u32,
    },

    /// The same module id appears twice on one bus.
    #[error("module {id} listed more than once on bus {net}")]
    DuplicateModule {
        /// Network id.
        net: u32,
        /// Bus-local module id.
        id: u32,
    },

    /// More modules than a wire frame can carry.
    #[error("{count} modules exceed the limit of {max}")]
    TooManyModules {
        /// Configured module count.
        count: usize,
        /// Frame capacity.
        max: usize,
    },

    /// A `NET:ID[,ID...]` spec failed to parse.
    #[error("invalid bus spec '{0}' (expected NET:ID[,ID...])")]
    InvalidSpec(String),
}

/// One bus as described by configuration: network id plus module ids in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusLayout {
    /// Fieldbus network identifier.
    pub net: u32,
    /// Bus-local module ids, in group order.
    pub modules: Vec<u32>,
}

impl FromStr for BusLayout {
    type Err = GroupError;

    /// Parse `NET:ID[,ID...]`, e.g. `0:12,13,14`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GroupError::InvalidSpec(s.to_string());
        let (net, ids) = s.split_once(':').ok_or_else(invalid)?;
        let net = net.trim().parse::<u32>().map_err(|_| invalid())?;
        let modules = ids
            .split(',')
            .map(|id| id.trim().parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { net, modules })
    }
}

impl fmt::Display for BusLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.net)?;
        for (i, id) in self.modules.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

/// A single servo module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Module {
    /// Bus-local module id.
    pub id: u32,
}

/// A fieldbus segment and the modules it hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bus {
    net: u32,
    modules: Box<[Module]>,
}

impl Bus {
    /// Network identifier.
    #[inline]
    pub fn net(&self) -> u32 {
        self.net
    }

    /// Modules on this bus, in group order.
    #[inline]
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }
}

/// Flattened address of one module within the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleAddress {
    /// Group-wide channel index (0..n).
    pub index: usize,
    /// Network id of the hosting bus.
    pub net: u32,
    /// Bus-local module id.
    pub id: u32,
}

/// Frozen group layout. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleGroup {
    buses: Box<[Bus]>,
    len: usize,
}

impl ModuleGroup {
    /// Build a group from bus layouts, preserving the given order.
    pub fn new(layout: &[BusLayout]) -> Result<Self, GroupError> {
        let mut nets = HashSet::new();
        let mut buses = Vec::with_capacity(layout.len());
        let mut len = 0usize;

        for entry in layout {
            if !nets.insert(entry.net) {
                return Err(GroupError::DuplicateBus { net: entry.net });
            }
            if entry.modules.is_empty() {
                return Err(GroupError::EmptyBus { net: entry.net });
            }
            let mut ids = HashSet::new();
            for &id in &entry.modules {
                if !ids.insert(id) {
                    return Err(GroupError::DuplicateModule { net: entry.net, id });
                }
            }
            len += entry.modules.len();
            buses.push(Bus {
                net: entry.net,
                modules: entry.modules.iter().map(|&id| Module { id }).collect(),
            });
        }

        if len == 0 {
            return Err(GroupError::Empty);
        }
        if len > MAX_MODULES {
            return Err(GroupError::TooManyModules {
                count: len,
                max: MAX_MODULES,
            });
        }

        Ok(Self {
            buses: buses.into_boxed_slice(),
            len,
        })
    }

    /// Total module count `n`.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false for a constructed group.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Buses in group order.
    #[inline]
    pub fn buses(&self) -> &[Bus] {
        &self.buses
    }

    /// Iterate all modules in group order with their flattened index.
    pub fn addresses(&self) -> impl Iterator<Item = ModuleAddress> + '_ {
        self.buses
            .iter()
            .flat_map(|bus| bus.modules.iter().map(move |m| (bus.net, m.id)))
            .enumerate()
            .map(|(index, (net, id))| ModuleAddress { index, net, id })
    }

    /// Layout entries equivalent to this group.
    pub fn layout(&self) -> Vec<BusLayout> {
        self.buses
            .iter()
            .map(|bus| BusLayout {
                net: bus.net,
                modules: bus.modules.iter().map(|m| m.id).collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(specs: &[&str]) -> Vec<BusLayout> {
        specs.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn parses_bus_spec() {
        let bus: BusLayout = "1: 12, 13,14".parse().unwrap();
        assert_eq!(bus.net, 1);
        assert_eq!(bus.modules, vec![12, 13, 14]);
        assert_eq!(bus.to_string(), "1:12,13,14");
    }

    #[test]
    fn rejects_malformed_spec() {
        assert!(matches!("12".parse::<BusLayout>(), Err(GroupError::InvalidSpec(_))));
        assert!(matches!("a:1".parse::<BusLayout>(), Err(GroupError::InvalidSpec(_))));
        assert!(matches!("0:1,,2".parse::<BusLayout>(), Err(GroupError::InvalidSpec(_))));
    }

    #[test]
    fn preserves_order_across_buses() {
        let group = ModuleGroup::new(&layout(&["3:14,12", "0:20"])).unwrap();
        assert_eq!(group.len(), 3);
        let addrs: Vec<_> = group.addresses().map(|a| (a.index, a.net, a.id)).collect();
        assert_eq!(addrs, vec![(0, 3, 14), (1, 3, 12), (2, 0, 20)]);
        assert_eq!(group.layout(), layout(&["3:14,12", "0:20"]));
    }

    #[test]
    fn rejects_empty_and_duplicates() {
        assert_eq!(ModuleGroup::new(&[]), Err(GroupError::Empty));
        assert_eq!(
            ModuleGroup::new(&layout(&["0:1", "0:2"])),
            Err(GroupError::DuplicateBus { net: 0 })
        );
        assert_eq!(
            ModuleGroup::new(&layout(&["0:1,1"])),
            Err(GroupError::DuplicateModule { net: 0, id: 1 })
        );
        let empty_bus = BusLayout { net: 4, modules: vec![] };
        assert_eq!(
            ModuleGroup::new(&[empty_bus]),
            Err(GroupError::EmptyBus { net: 4 })
        );
    }

    #[test]
    fn rejects_oversized_group() {
        let bus = BusLayout {
            net: 0,
            modules: (0..=MAX_MODULES as u32).collect(),
        };
        assert!(matches!(
            ModuleGroup::new(&[bus]),
            Err(GroupError::TooManyModules { .. })
        ));
    }
}
