//! Engine configuration.
//!
//! Both dedup windows and the repair unit count are deployment
//! configuration, not constants: the observed production values are defaults
//! here, pending product-owner confirmation of the repair policy.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Tunables for the scan gate, the reconciler, and the repair policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Immediate-repeat suppression window in seconds: a second scan of the
    /// identical code within this window is rejected outright.
    pub immediate_repeat_secs: u64,

    /// Cooldown window in seconds: the same carrier and direction are not
    /// accepted twice within this window, even if the carrier state would
    /// otherwise permit it.
    pub duplicate_cooldown_secs: u64,

    /// Unit count assigned when repairing a stocked-in carrier with zero
    /// units. The historical default is 1.
    pub repair_units_default: i64,

    /// Interval in seconds between periodic reconciliation sweeps.
    pub reconcile_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            immediate_repeat_secs: 5,
            duplicate_cooldown_secs: 120,
            repair_units_default: 1,
            reconcile_interval_secs: 300,
        }
    }
}

impl EngineConfig {
    /// Immediate-repeat window as a time delta.
    #[must_use]
    pub fn immediate_repeat_window(&self) -> TimeDelta {
        TimeDelta::seconds(i64::try_from(self.immediate_repeat_secs).unwrap_or(i64::MAX))
    }

    /// Cooldown window as a time delta.
    #[must_use]
    pub fn duplicate_cooldown(&self) -> TimeDelta {
        TimeDelta::seconds(i64::try_from(self.duplicate_cooldown_secs).unwrap_or(i64::MAX))
    }

    /// Periodic sweep interval.
    #[must_use]
    pub const fn reconcile_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reconcile_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_observed_production_values() {
        let config = EngineConfig::default();
        assert_eq!(config.immediate_repeat_secs, 5);
        assert_eq!(config.duplicate_cooldown_secs, 120);
        assert_eq!(config.repair_units_default, 1);
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn deserializes_with_partial_fields() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"duplicate_cooldown_secs": 30}"#).expect("valid config json");
        assert_eq!(config.duplicate_cooldown_secs, 30);
        assert_eq!(config.immediate_repeat_secs, 5);
    }
}
