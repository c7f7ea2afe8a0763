//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Default round-trip budget, in the caller's tick unit (milliseconds on the daemon).
pub const DEFAULT_ROUND_TRIP_BUDGET: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// How long to wait for a response before reporting `Timeout`. Same unit as `tick`.
    #[serde(default = "default_round_trip_budget")]
    pub round_trip_budget: u32,
}

fn default_round_trip_budget() -> u32 {
    DEFAULT_ROUND_TRIP_BUDGET
}

impl Config {
    pub fn with_round_trip_budget(round_trip_budget: u32) -> Self {
        Self { round_trip_budget }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            round_trip_budget: default_round_trip_budget(),
        }
    }
}
