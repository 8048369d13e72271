//! One-shot utility actions: query, set, reset, list, config bits.
//!
//! Each action runs once against the opened group and returns. A bus
//! failure aborts the action with [`DaemonError::Bus`]; there is no loop to
//! recover in.

use std::io::Write;
use std::str::FromStr;

use pciod_common::bus::GroupBus;
use pciod_common::codes::{ConfigFlags, Param, ParamType, StateFlags, render_code_tables};
use pciod_common::consts::{CONFIG_WORD_MASK, MAX_MODULES};
use pciod_common::group::ModuleAddress;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{DaemonError, DaemonResult};

/// What `--query` reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTarget {
    /// Decoded state words.
    State,
    /// Decoded config words.
    Config,
    /// Any named parameter.
    Param(Param),
}

impl FromStr for QueryTarget {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("state") {
            return Ok(Self::State);
        }
        if s.eq_ignore_ascii_case("config") {
            return Ok(Self::Config);
        }
        Param::lookup(s)
            .map(Self::Param)
            .ok_or_else(|| DaemonError::Usage(format!("unknown parameter '{s}' (see --list)")))
    }
}

/// Values for `--set`, already typed by the parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SetValues {
    /// Double values.
    F64(Vec<f64>),
    /// Word values.
    U32(Vec<u32>),
}

impl SetValues {
    fn len(&self) -> usize {
        match self {
            Self::F64(v) => v.len(),
            Self::U32(v) => v.len(),
        }
    }
}

/// One utility action.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Print one value per module.
    Query(QueryTarget),
    /// Write a parameter, one value per module or one broadcast value.
    Set {
        /// Target parameter.
        param: Param,
        /// Parsed values.
        values: SetValues,
    },
    /// Reset the whole group.
    Reset,
    /// Print the code tables.
    List,
    /// Set a config bit on every module.
    ConfigEnable(ConfigFlags),
    /// Clear a config bit on every module.
    ConfigDisable(ConfigFlags),
}

impl Action {
    /// Parse `--set <param> --value V...`.
    pub fn set(param: &str, values: &[String]) -> DaemonResult<Self> {
        let param = Param::lookup(param)
            .ok_or_else(|| DaemonError::Usage(format!("unknown parameter '{param}' (see --list)")))?;
        if values.is_empty() {
            return Err(DaemonError::Usage(format!("--set {param} needs at least one --value")));
        }
        let values = match param.value_type() {
            ParamType::F64 => SetValues::F64(
                values
                    .iter()
                    .map(|v| parse_f64(param, v))
                    .collect::<DaemonResult<_>>()?,
            ),
            ParamType::U32 => SetValues::U32(
                values
                    .iter()
                    .map(|v| parse_u32(param, v))
                    .collect::<DaemonResult<_>>()?,
            ),
        };
        Ok(Self::Set { param, values })
    }

    /// Parse `--config-enable <flag>` / `--config-disable <flag>`.
    pub fn config(flag: &str, enable: bool) -> DaemonResult<Self> {
        let flag = ConfigFlags::lookup(flag)
            .ok_or_else(|| DaemonError::Usage(format!("unknown config flag '{flag}' (see --list)")))?;
        Ok(if enable {
            Self::ConfigEnable(flag)
        } else {
            Self::ConfigDisable(flag)
        })
    }

    /// Whether the action talks to the bus.
    pub fn needs_bus(&self) -> bool {
        !matches!(self, Self::List)
    }
}

fn parse_f64(param: Param, raw: &str) -> DaemonResult<f64> {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(DaemonError::Usage(format!("invalid {param} value '{raw}'"))),
    }
}

fn parse_u32(param: Param, raw: &str) -> DaemonResult<u32> {
    let raw_trim = raw.trim();
    let parsed = match raw_trim
        .strip_prefix("0x")
        .or_else(|| raw_trim.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw_trim.parse::<u32>(),
    };
    parsed.map_err(|_| DaemonError::Usage(format!("invalid {param} value '{raw}'")))
}

/// Output switches shared by every action.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputOptions {
    /// Emit JSON instead of text.
    pub json: bool,
    /// Re-query after `--set`.
    pub verbose: bool,
}

#[derive(Serialize)]
struct Row<V> {
    index: usize,
    net: u32,
    id: u32,
    value: V,
}

#[derive(Serialize)]
struct FlagWord {
    bits: u32,
    flags: Vec<&'static str>,
}

impl FlagWord {
    fn state(flags: StateFlags) -> Self {
        Self {
            bits: flags.bits(),
            flags: flags.iter_names().map(|(name, _)| name).collect(),
        }
    }

    fn config(flags: ConfigFlags) -> Self {
        Self {
            bits: flags.bits(),
            flags: flags.iter_names().map(|(name, _)| name).collect(),
        }
    }
}

impl std::fmt::Display for FlagWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08x}", self.bits)?;
        if !self.flags.is_empty() {
            write!(f, " {}", self.flags.join(" "))?;
        }
        Ok(())
    }
}

fn write_rows<W, V>(out: &mut W, rows: &[Row<V>], json: bool) -> DaemonResult<()>
where
    W: Write,
    V: Serialize + std::fmt::Display,
{
    if json {
        serde_json::to_writer_pretty(&mut *out, rows).map_err(std::io::Error::from)?;
        writeln!(out)?;
    } else {
        for row in rows {
            writeln!(out, "[{}] bus {}, module {}: {}", row.index, row.net, row.id, row.value)?;
        }
    }
    Ok(())
}

fn rows<V>(addresses: impl Iterator<Item = ModuleAddress>, values: impl IntoIterator<Item = V>) -> Vec<Row<V>> {
    addresses
        .zip(values)
        .map(|(a, value)| Row {
            index: a.index,
            net: a.net,
            id: a.id,
            value,
        })
        .collect()
}

/// Read and print `target` for every module.
pub fn query<B, W>(bus: &mut B, target: QueryTarget, out: &mut W, json: bool) -> DaemonResult<()>
where
    B: GroupBus + ?Sized,
    W: Write,
{
    let n = bus.size();
    match target {
        QueryTarget::State => {
            let reports = bus.dump_error()?;
            let words = reports.iter().map(|r| FlagWord::state(r.state));
            write_rows(out, &rows(bus.group().addresses(), words), json)
        }
        QueryTarget::Config => {
            let reports = bus.dump_config()?;
            let words = reports.iter().map(|r| FlagWord::config(r.config));
            write_rows(out, &rows(bus.group().addresses(), words), json)
        }
        QueryTarget::Param(param) => match param.value_type() {
            ParamType::F64 => {
                let mut buf = [0.0f64; MAX_MODULES];
                bus.get_f64(param, &mut buf[..n])?;
                write_rows(out, &rows(bus.group().addresses(), buf[..n].iter().copied()), json)
            }
            ParamType::U32 => {
                let mut buf = [0u32; MAX_MODULES];
                bus.get_u32(param, &mut buf[..n])?;
                write_rows(out, &rows(bus.group().addresses(), buf[..n].iter().copied()), json)
            }
        },
    }
}

/// Write `values` to `param`, broadcasting a single value to all modules.
pub fn set<B: GroupBus + ?Sized>(bus: &mut B, param: Param, values: &SetValues) -> DaemonResult<()> {
    let n = bus.size();
    let given = values.len();
    if given != n && given != 1 {
        return Err(DaemonError::Usage(format!(
            "--set {param} got {given} values, group has {n} modules (give {n} or 1)"
        )));
    }
    match values {
        SetValues::F64(v) => {
            let expanded = if given == 1 { vec![v[0]; n] } else { v.clone() };
            bus.set_f64(param, &expanded)?;
            info!(%param, values = ?expanded, "parameter written");
        }
        SetValues::U32(v) => {
            let expanded = if given == 1 { vec![v[0]; n] } else { v.clone() };
            bus.set_u32(param, &expanded)?;
            info!(%param, values = ?expanded, "parameter written");
        }
    }
    Ok(())
}

/// Set or clear `flag` in every module's config word.
///
/// Each module's word is read, modified and masked to the significant bits
/// independently, then all words are written back in one call.
pub fn update_config<B: GroupBus + ?Sized>(bus: &mut B, flag: ConfigFlags, enable: bool) -> DaemonResult<()> {
    let n = bus.size();
    let mut words = [0u32; MAX_MODULES];
    bus.get_u32(Param::Config, &mut words[..n])?;
    for word in &mut words[..n] {
        let updated = if enable {
            *word | flag.bits()
        } else {
            *word & !flag.bits()
        };
        *word = updated & CONFIG_WORD_MASK;
    }
    debug!(words = ?&words[..n], "config words");
    bus.set_u32(Param::Config, &words[..n])?;
    info!(flag = ?flag, enable, modules = n, "config updated");
    Ok(())
}

/// Run `action`. The bus is only touched when [`Action::needs_bus`].
pub fn run_action<B, W>(bus: &mut B, action: &Action, out: &mut W, opts: OutputOptions) -> DaemonResult<()>
where
    B: GroupBus + ?Sized,
    W: Write,
{
    match action {
        Action::Query(target) => query(bus, *target, out, opts.json),
        Action::Set { param, values } => {
            set(bus, *param, values)?;
            if opts.verbose {
                query(bus, QueryTarget::Param(*param), out, opts.json)?;
            }
            Ok(())
        }
        Action::Reset => {
            bus.reset()?;
            info!(modules = bus.size(), "group reset");
            Ok(())
        }
        Action::List => list(out),
        Action::ConfigEnable(flag) => update_config(bus, *flag, true),
        Action::ConfigDisable(flag) => update_config(bus, *flag, false),
    }
}

/// Run an action that does not touch the bus.
pub fn run_offline<W: Write>(action: &Action, out: &mut W) -> DaemonResult<()> {
    match action {
        Action::List => list(out),
        other => Err(DaemonError::Usage(format!("{other:?} needs a module group"))),
    }
}

/// Print the state, config and parameter code tables.
pub fn list<W: Write>(out: &mut W) -> DaemonResult<()> {
    out.write_all(render_code_tables().as_bytes())?;
    Ok(())
}
