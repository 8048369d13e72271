//! Module parameter, state and config code tables.
//!
//! - [`Param`]: addressable module parameters with their value type.
//! - [`StateFlags`]: bits of the module state word.
//! - [`ConfigFlags`]: bits of the module config word.
//!
//! Lookups are case-insensitive and accept `-` in place of `_`, so
//! `--query act-pos` and `--config-enable BRAKE_PRESENT` both resolve.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};

/// Value type carried by a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// IEEE-754 double.
    F64,
    /// Unsigned 32-bit word.
    U32,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F64 => f.write_str("double"),
            Self::U32 => f.write_str("uint32"),
        }
    }
}

macro_rules! params {
    ($( $(#[$doc:meta])* $variant:ident = ($code:expr, $name:expr, $ty:ident), )*) => {
        /// Addressable module parameter.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum Param {
            $( $(#[$doc])* $variant, )*
        }

        impl Param {
            /// Every parameter, in code order.
            pub const ALL: &'static [Param] = &[ $( Param::$variant, )* ];

            /// Wire code of the parameter.
            pub const fn code(&self) -> u8 {
                match self { $( Param::$variant => $code, )* }
            }

            /// Canonical lowercase name.
            pub const fn name(&self) -> &'static str {
                match self { $( Param::$variant => $name, )* }
            }

            /// Value type carried by the parameter.
            pub const fn value_type(&self) -> ParamType {
                match self { $( Param::$variant => ParamType::$ty, )* }
            }
        }
    };
}

params! {
    /// Factory serial number.
    Serial = (0x0E, "serial", U32),
    /// Encoder pulses per turn.
    PulsesPerTurn = (0x0F, "pulses_per_turn", U32),
    /// Firmware version.
    Version = (0x10, "version", U32),
    /// State word, see [`StateFlags`].
    State = (0x27, "state", U32),
    /// Config word, see [`ConfigFlags`].
    Config = (0x39, "config", U32),
    /// Actual position.
    ActPos = (0x3C, "act_pos", F64),
    /// Largest allowed following error.
    MaxDeltaPos = (0x3F, "max_delta_pos", F64),
    /// Actual velocity.
    ActVel = (0x41, "act_vel", F64),
    /// Lower software position limit.
    MinPos = (0x45, "min_pos", F64),
    /// Upper software position limit.
    MaxPos = (0x46, "max_pos", F64),
    /// Actual motor current.
    ActCur = (0x4D, "act_cur", F64),
    /// Rated velocity.
    MaxVel = (0x4F, "max_vel", F64),
    /// Rated acceleration.
    MaxAcc = (0x50, "max_acc", F64),
    /// Rated current.
    MaxCur = (0x51, "max_cur", F64),
    /// Position target of the last ramp move.
    TargetPos = (0x52, "target_pos", F64),
    /// Velocity ceiling of ramp moves.
    TargetVel = (0x53, "target_vel", F64),
    /// Acceleration ceiling of ramp moves.
    TargetAcc = (0x54, "target_acc", F64),
    /// Offset applied after homing.
    HomeOffset = (0x5A, "home_offset", F64),
}

fn normalize_eq(candidate: &str, name: &str) -> bool {
    candidate.len() == name.len()
        && candidate
            .bytes()
            .zip(name.bytes())
            .all(|(c, n)| {
                let c = if c == b'-' { b'_' } else { c };
                c.eq_ignore_ascii_case(&n)
            })
}

impl Param {
    /// Case-insensitive lookup by name.
    pub fn lookup(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| normalize_eq(name, p.name()))
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Module state word bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StateFlags: u32 {
        const ERROR            = 0x0000_0001;
        const HOME_OK          = 0x0000_0002;
        const HALTED           = 0x0000_0004;
        const POWER_FAULT      = 0x0000_0008;
        const TOW_ERROR        = 0x0000_0010;
        const COMM_ERROR       = 0x0000_0020;
        const SWR              = 0x0000_0040;
        const SW1              = 0x0000_0080;
        const SW2              = 0x0000_0100;
        const BRAKE_ACTIVE     = 0x0000_0200;
        const CUR_LIMIT        = 0x0000_0400;
        const MOTION           = 0x0000_0800;
        const RAMP_ACC         = 0x0000_1000;
        const RAMP_STEADY      = 0x0000_2000;
        const RAMP_DEC         = 0x0000_4000;
        const RAMP_END         = 0x0000_8000;
        const IN_PROGRESS      = 0x0001_0000;
        const FULL_BUFFER      = 0x0002_0000;
        const POW_VOLT_ERR     = 0x0004_0000;
        const POW_FET_TEMP     = 0x0008_0000;
        const POW_WDG_TEMP     = 0x0010_0000;
        const POW_SHORT_CUR    = 0x0020_0000;
        const POW_HALL_ERR     = 0x0040_0000;
        const POW_INTEGRAL_ERR = 0x0080_0000;
        const CPU_OVERLOAD     = 0x0100_0000;
        const BEYOND_HARD      = 0x0200_0000;
        const BEYOND_SOFT      = 0x0400_0000;
        const POW_SETUP_ERR    = 0x0800_0000;
    }
}

impl StateFlags {
    /// Bits that mean the module needs a reset before it will move.
    pub const FAULT_MASK: Self = Self::from_bits_truncate(
        Self::ERROR.bits()
            | Self::POWER_FAULT.bits()
            | Self::TOW_ERROR.bits()
            | Self::COMM_ERROR.bits()
            | Self::BEYOND_HARD.bits(),
    );

    /// Returns true if any fault bit is set.
    #[inline]
    pub const fn has_fault(&self) -> bool {
        self.intersects(Self::FAULT_MASK)
    }

    /// Case-insensitive lookup by flag name.
    pub fn lookup(name: &str) -> Option<Self> {
        Self::all()
            .iter_names()
            .find(|(flag, _)| normalize_eq(name, flag))
            .map(|(_, bits)| bits)
    }
}

impl Default for StateFlags {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Module config word bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ConfigFlags: u32 {
        const BRAKE_PRESENT        = 0x0000_0008;
        const BRAKE_AT_POWERON     = 0x0000_0010;
        const SWR_WITH_ENCODERZERO = 0x0000_0020;
        const SWR_AT_FALLING_EDGE  = 0x0000_0040;
        const CHANGE_SWR_TO_LIMIT  = 0x0000_0080;
        const SWR_ENABLED          = 0x0000_0100;
        const SWR_LOW_ACTIVE       = 0x0000_0200;
        const SWR_USE_EXTERNAL     = 0x0000_0400;
        const SW1_ENABLED          = 0x0000_0800;
        const SW1_LOW_ACTIVE       = 0x0000_1000;
        const SW1_USE_EXTERNAL     = 0x0000_2000;
        const SW2_ENABLED          = 0x0000_4000;
        const SW2_LOW_ACTIVE       = 0x0000_8000;
        const SW2_USE_EXTERNAL     = 0x0001_0000;
        const LIMIT_SWITCH         = 0x0002_0000;
        const WATCHDOG_ENABLE      = 0x0004_0000;
        const SOFT_HIGH            = 0x0008_0000;
        const SOFT_LOW             = 0x0010_0000;
        const ABS_FEEDBACK         = 0x0020_0000;
        const DISABLE_ON_HALT      = 0x0040_0000;
        const ERROR_TO_HALT        = 0x0080_0000;
    }
}

impl ConfigFlags {
    /// Case-insensitive lookup by flag name.
    pub fn lookup(name: &str) -> Option<Self> {
        Self::all()
            .iter_names()
            .find(|(flag, _)| normalize_eq(name, flag))
            .map(|(_, bits)| bits)
    }
}

impl Default for ConfigFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Render the three code tables for `--list`.
pub fn render_code_tables() -> String {
    let mut out = String::new();

    let _ = writeln!(out, "STATE CODES\n-----------");
    for (name, flag) in StateFlags::all().iter_names() {
        let _ = writeln!(out, "{name:<24} 0x{:08x}", flag.bits());
    }

    let _ = writeln!(out, "\nCONFIG CODES\n------------");
    for (name, flag) in ConfigFlags::all().iter_names() {
        let _ = writeln!(out, "{name:<24} 0x{:08x}", flag.bits());
    }

    let _ = writeln!(out, "\nPARAM CODES\n-----------");
    for param in Param::ALL {
        let _ = writeln!(
            out,
            "{:<24} 0x{:02x} {}",
            param.name(),
            param.code(),
            param.value_type()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn param_codes_are_unique() {
        let codes: HashSet<u8> = Param::ALL.iter().map(|p| p.code()).collect();
        assert_eq!(codes.len(), Param::ALL.len());
    }

    #[test]
    fn param_lookup_is_case_insensitive() {
        assert_eq!(Param::lookup("act_pos"), Some(Param::ActPos));
        assert_eq!(Param::lookup("ACT-VEL"), Some(Param::ActVel));
        assert_eq!(Param::lookup("Config"), Some(Param::Config));
        assert_eq!(Param::lookup("act_posx"), None);
        assert_eq!(Param::Config.value_type(), ParamType::U32);
        assert_eq!(Param::MaxVel.value_type(), ParamType::F64);
    }

    #[test]
    fn flag_lookup() {
        assert_eq!(ConfigFlags::lookup("brake_present"), Some(ConfigFlags::BRAKE_PRESENT));
        assert_eq!(StateFlags::lookup("home-ok"), Some(StateFlags::HOME_OK));
        assert_eq!(ConfigFlags::lookup("home_ok"), None);
    }

    #[test]
    fn config_flags_fit_config_word() {
        assert_eq!(
            ConfigFlags::all().bits() & !crate::consts::CONFIG_WORD_MASK,
            0
        );
    }

    #[test]
    fn fault_mask() {
        assert!(StateFlags::ERROR.has_fault());
        assert!(!(StateFlags::HOME_OK | StateFlags::MOTION).has_fault());
    }

    #[test]
    fn listing_contains_all_tables() {
        let listing = render_code_tables();
        assert!(listing.contains("STATE CODES"));
        assert!(listing.contains("CONFIG CODES"));
        assert!(listing.contains("PARAM CODES"));
        assert!(listing.contains("HOME_OK"));
        assert!(listing.contains("act_pos"));
    }
}
