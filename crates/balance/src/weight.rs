use popsim_common::UnitId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::SplitError;

/// Raw per-unit counts sourced from the upstream world-construction
/// collaborators (population, company and commute distributors).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitActivity {
    pub n_people: u32,
    pub n_workers: u32,
    pub n_commuters: u32,
}

/// Coefficients turning activity counts into a scalar workload weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    pub population: f64,
    pub workers: f64,
    pub commuters: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            population: 3.0,
            workers: 1.0,
            commuters: 2.0,
        }
    }
}

impl WeightConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, SplitError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    pub fn weight_of(&self, activity: UnitActivity) -> f64 {
        self.population * f64::from(activity.n_people)
            + self.workers * f64::from(activity.n_workers)
            + self.commuters * f64::from(activity.n_commuters)
    }
}

/// Compute the workload weight of every listed unit.
///
/// Pure function. A unit missing from `activity` weighs 0.0; that is normal
/// for units with no resident population and not an error.
pub fn weigh_units(
    units: &[UnitId],
    activity: &BTreeMap<UnitId, UnitActivity>,
    config: &WeightConfig,
) -> BTreeMap<UnitId, f64> {
    units
        .iter()
        .map(|id| {
            let counts = activity.get(id).copied().unwrap_or_default();
            (*id, config.weight_of(counts))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_coefficients() {
        let config = WeightConfig::default();
        assert_eq!(config.population, 3.0);
        assert_eq!(config.workers, 1.0);
        assert_eq!(config.commuters, 2.0);
    }

    #[test]
    fn weight_is_linear_in_counts() {
        let config = WeightConfig::default();
        let activity = UnitActivity {
            n_people: 10,
            n_workers: 4,
            n_commuters: 3,
        };
        assert_eq!(config.weight_of(activity), 3.0 * 10.0 + 4.0 + 2.0 * 3.0);
    }

    #[test]
    fn missing_unit_defaults_to_zero() {
        let mut activity = BTreeMap::new();
        activity.insert(
            UnitId(1),
            UnitActivity {
                n_people: 5,
                n_workers: 0,
                n_commuters: 0,
            },
        );
        let weights = weigh_units(
            &[UnitId(1), UnitId(2)],
            &activity,
            &WeightConfig::default(),
        );
        assert_eq!(weights[&UnitId(1)], 15.0);
        assert_eq!(weights[&UnitId(2)], 0.0);
    }

    #[test]
    fn config_yaml_roundtrip() {
        let config = WeightConfig {
            population: 5.0,
            workers: 1.0,
            commuters: 1.0,
        };
        let text = serde_yaml::to_string(&config).unwrap();
        let parsed: WeightConfig = serde_yaml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
