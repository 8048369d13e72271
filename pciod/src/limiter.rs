//! Per-cycle motion limiting.
//!
//! Velocity targets are clamped to each module's rated velocity. Position
//! targets are clamped so that reaching them within one control period never
//! needs more than the rated velocity. Inputs are copied, never mutated.

use std::time::Duration;

use pciod_common::msg::Targets;

/// Rated-velocity limiter for one module group.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionLimiter {
    rated_velocity: Targets,
    period_s: f64,
}

impl MotionLimiter {
    /// Build a limiter from per-module rated velocities and the control period.
    ///
    /// Rated velocities are taken by magnitude.
    pub fn new(rated_velocity: &[f64], period: Duration) -> Self {
        Self {
            rated_velocity: rated_velocity.iter().map(|v| v.abs()).collect(),
            period_s: period.as_secs_f64(),
        }
    }

    /// Per-module rated velocity.
    #[inline]
    pub fn rated_velocity(&self) -> &[f64] {
        &self.rated_velocity
    }

    /// Control period [s].
    #[inline]
    pub fn period_s(&self) -> f64 {
        self.period_s
    }

    /// Clamp velocity targets to `±rated`.
    pub fn limit_velocity(&self, targets: &[f64]) -> Targets {
        targets
            .iter()
            .zip(self.rated_velocity.iter())
            .map(|(&v, &rated)| v.clamp(-rated, rated))
            .collect()
    }

    /// Clamp position targets to `last ± rated * period`.
    pub fn limit_position(&self, targets: &[f64], last_positions: &[f64]) -> Targets {
        targets
            .iter()
            .zip(last_positions.iter())
            .zip(self.rated_velocity.iter())
            .map(|((&target, &last), &rated)| {
                let step = rated * self.period_s;
                last + (target - last).clamp(-step, step)
            })
            .collect()
    }
}
