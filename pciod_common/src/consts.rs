//! System-wide constants for the pciod workspace.
//!
//! Single source of truth for numeric limits and default names.

/// Maximum number of modules in one group (fixed wire-frame capacity).
pub const MAX_MODULES: usize = 64;

/// Default command channel name.
pub const DEFAULT_CMD_CHANNEL: &str = "pciod-cmd";

/// Default state channel name.
pub const DEFAULT_STATE_CHANNEL: &str = "pciod-state";

/// Default state refresh frequency when no commands arrive [Hz].
pub const DEFAULT_FREQUENCY_HZ: f64 = 30.0;

/// Lowest accepted refresh frequency [Hz] (period of about 17 minutes).
pub const MIN_FREQUENCY_HZ: f64 = 1e-3;

/// Default validity window for a reference command whose header carries none [ms].
pub const DEFAULT_COMMAND_EXPIRY_MS: u64 = 200;

/// Default velocity ceiling for position moves.
pub const DEFAULT_POSITION_VELOCITY: f64 = 0.5;

/// Default acceleration ceiling for position moves.
pub const DEFAULT_POSITION_ACCELERATION: f64 = 4.0;

/// Config words only carry 28 significant bits.
pub const CONFIG_WORD_MASK: u32 = 0x0FFF_FFFF;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(MAX_MODULES > 0 && MAX_MODULES <= 256);
        assert!(DEFAULT_FREQUENCY_HZ > MIN_FREQUENCY_HZ);
        assert!(MIN_FREQUENCY_HZ > 0.0);
        assert!(DEFAULT_COMMAND_EXPIRY_MS > 0);
        assert_ne!(DEFAULT_CMD_CHANNEL, DEFAULT_STATE_CHANNEL);
    }
}
