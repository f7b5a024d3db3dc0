use popsim_common::{DomainId, UnitId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Errors from building the membership index.
#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error("{0} is assigned to more than one domain")]
    DuplicateUnit(UnitId),
}

/// The unit→domain map produced by the splitter, kept bidirectional.
///
/// Embedded in the persisted world container so that loading ranks agree on
/// ownership. Domain sets are pairwise disjoint by construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionMap {
    unit_to_domain: BTreeMap<UnitId, DomainId>,
    domain_to_units: BTreeMap<DomainId, Vec<UnitId>>,
}

impl PartitionMap {
    /// Build the index from per-domain unit lists, rejecting units that
    /// appear in more than one domain.
    pub fn new(domain_to_units: BTreeMap<DomainId, Vec<UnitId>>) -> Result<Self, MembershipError> {
        let mut unit_to_domain = BTreeMap::new();
        for (domain, units) in &domain_to_units {
            for unit in units {
                if unit_to_domain.insert(*unit, *domain).is_some() {
                    return Err(MembershipError::DuplicateUnit(*unit));
                }
            }
        }
        Ok(Self {
            unit_to_domain,
            domain_to_units,
        })
    }

    pub fn domain_of(&self, unit: UnitId) -> Option<DomainId> {
        self.unit_to_domain.get(&unit).copied()
    }

    pub fn units_of(&self, domain: DomainId) -> &[UnitId] {
        self.domain_to_units
            .get(&domain)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn domains(&self) -> impl Iterator<Item = DomainId> + '_ {
        self.domain_to_units.keys().copied()
    }

    pub fn domain_count(&self) -> usize {
        self.domain_to_units.len()
    }

    pub fn unit_count(&self) -> usize {
        self.unit_to_domain.len()
    }

    /// Whether every given unit is assigned to some domain.
    pub fn covers<I: IntoIterator<Item = UnitId>>(&self, units: I) -> bool {
        units
            .into_iter()
            .all(|unit| self.unit_to_domain.contains_key(&unit))
    }

    /// Aggregate weight per domain. Units absent from `weights` count as 0.
    pub fn domain_weights(&self, weights: &BTreeMap<UnitId, f64>) -> BTreeMap<DomainId, f64> {
        self.domain_to_units
            .iter()
            .map(|(domain, units)| {
                let total = units
                    .iter()
                    .map(|unit| weights.get(unit).copied().unwrap_or(0.0))
                    .sum();
                (*domain, total)
            })
            .collect()
    }

    /// Max domain weight over min domain weight; 1.0 is perfect balance.
    pub fn balance_ratio(&self, weights: &BTreeMap<UnitId, f64>) -> f64 {
        let totals = self.domain_weights(weights);
        let max = totals.values().copied().fold(f64::MIN, f64::max);
        let min = totals.values().copied().fold(f64::MAX, f64::min);
        max / min
    }
}
