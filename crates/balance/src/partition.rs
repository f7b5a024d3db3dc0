use glam::DVec2;
use popsim_common::{DomainId, SpatialUnit};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{MembershipError, PartitionMap};

/// Lloyd rounds used to seed the domain centroids from coordinates alone.
const KMEANS_ROUNDS: usize = 12;

/// Errors from the domain splitter.
#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    #[error("target domain count must be at least 1")]
    NoDomains,
    #[error("no spatial units to partition")]
    NoUnits,
    #[error("tolerance ladder must end with an unbounded rung")]
    InvalidLadder,
    #[error("tolerance assignment placed {assigned} of {total} units")]
    AssignmentIncomplete { assigned: usize, total: usize },
    #[error(transparent)]
    Membership(#[from] MembershipError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Splitter configuration. The tolerance ladder is an ordered list of load
/// slacks; the final unbounded rung guarantees every unit finds a domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    pub domains: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_tolerance_ladder")]
    pub tolerance_ladder: Vec<f64>,
    #[serde(default)]
    pub seed: u64,
}

impl SplitConfig {
    pub fn new(domains: u32) -> Self {
        Self {
            domains,
            iterations: default_iterations(),
            tolerance_ladder: default_tolerance_ladder(),
            seed: 0,
        }
    }
}

fn default_iterations() -> u32 {
    20
}

fn default_tolerance_ladder() -> Vec<f64> {
    vec![0.0, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, f64::INFINITY]
}

/// Result of a split: the membership map plus search statistics.
#[derive(Debug, Clone)]
pub struct SplitOutcome {
    pub map: PartitionMap,
    pub stats: SplitStats,
}

/// Statistics of the best-of-N centroid search.
#[derive(Debug, Clone, Copy)]
pub struct SplitStats {
    pub rounds: u32,
    pub best_round: u32,
    /// Balance ratio of the first clustering round.
    pub initial_ratio: f64,
    /// Lowest balance ratio seen; never worse than `initial_ratio`.
    pub best_ratio: f64,
}

/// Static nearest-neighbour index over one round's centroids.
///
/// Rebuilt once per round; D is small, so ranking all centroids per query
/// keeps the round at O(U · D log D).
struct CentroidIndex {
    centroids: Vec<DVec2>,
}

impl CentroidIndex {
    fn new(centroids: Vec<DVec2>) -> Self {
        Self { centroids }
    }

    fn nearest(&self, point: DVec2) -> usize {
        self.centroids
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                point
                    .distance_squared(**a)
                    .total_cmp(&point.distance_squared(**b))
            })
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Centroid indices ordered nearest to farthest from `point`.
    fn ranked(&self, point: DVec2) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.centroids.len()).collect();
        order.sort_by(|a, b| {
            point
                .distance_squared(self.centroids[*a])
                .total_cmp(&point.distance_squared(self.centroids[*b]))
        });
        order
    }
}

/// Splits spatial units into weight-balanced, geographically coherent
/// domains.
///
/// One offline batch computation per world build. Rounds are strictly
/// sequential; within a round the per-domain running weight is checked and
/// incremented at a single site, so no domain is charged past its budget
/// concurrently.
pub struct DomainSplitter<'a> {
    units: &'a [SpatialUnit],
    config: &'a SplitConfig,
    points: Vec<DVec2>,
    /// Unit indices ordered heaviest first (greedy bin-packing order).
    order: Vec<usize>,
    average_weight: f64,
}

impl<'a> DomainSplitter<'a> {
    pub fn new(units: &'a [SpatialUnit], config: &'a SplitConfig) -> Result<Self, SplitError> {
        if config.domains == 0 {
            return Err(SplitError::NoDomains);
        }
        if units.is_empty() {
            return Err(SplitError::NoUnits);
        }
        if !config
            .tolerance_ladder
            .last()
            .is_some_and(|t| t.is_infinite())
        {
            return Err(SplitError::InvalidLadder);
        }
        let points: Vec<DVec2> = units.iter().map(|u| u.position.to_dvec2()).collect();
        let mut order: Vec<usize> = (0..units.len()).collect();
        order.sort_by(|a, b| {
            units[*b]
                .weight
                .total_cmp(&units[*a].weight)
                .then(units[*a].id.cmp(&units[*b].id))
        });
        let total: f64 = units.iter().map(|u| u.weight).sum();
        let average_weight = total / f64::from(config.domains);
        Ok(Self {
            units,
            config,
            points,
            order,
            average_weight,
        })
    }

    /// Run the full split: k-means seeding, best-of-N tolerance-ladder
    /// rounds, then a nearest-centroid tessellation from the best centroids.
    pub fn split(units: &'a [SpatialUnit], config: &'a SplitConfig) -> Result<SplitOutcome, SplitError> {
        Self::new(units, config)?.run()
    }

    fn run(&self) -> Result<SplitOutcome, SplitError> {
        let _span = tracing::info_span!(
            "domain_split",
            domains = self.config.domains,
            units = self.units.len()
        )
        .entered();

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut centroids =
            kmeans_centroids(&self.points, self.config.domains as usize, &mut rng);

        let rounds = self.config.iterations.max(1);
        let mut best_centroids = centroids.clone();
        let mut best_ratio = f64::INFINITY;
        let mut best_round = 0;
        let mut initial_ratio = f64::INFINITY;

        for round in 0..rounds {
            let assignment = self.assign_with_ladder(&CentroidIndex::new(centroids.clone()))?;
            let ratio = self.ratio_of(&assignment);
            if round == 0 {
                initial_ratio = ratio;
            }
            centroids = self.recompute_centroids(&assignment, &centroids);
            // Best-of-N, not last-round-wins: the search is not monotonic.
            if ratio < best_ratio {
                best_ratio = ratio;
                best_round = round;
                best_centroids = centroids.clone();
            }
            tracing::debug!(round, ratio, "split round complete");
        }

        let assignment = self.tessellate(&CentroidIndex::new(best_centroids));
        let mut domain_to_units = BTreeMap::new();
        for (i, unit_indices) in assignment.iter().enumerate() {
            let units = unit_indices.iter().map(|idx| self.units[*idx].id).collect();
            domain_to_units.insert(DomainId(i as u32), units);
        }
        let map = PartitionMap::new(domain_to_units)?;
        if map.unit_count() != self.units.len() {
            return Err(SplitError::AssignmentIncomplete {
                assigned: map.unit_count(),
                total: self.units.len(),
            });
        }

        tracing::info!(best_round, best_ratio, initial_ratio, "domain split complete");
        Ok(SplitOutcome {
            map,
            stats: SplitStats {
                rounds,
                best_round,
                initial_ratio,
                best_ratio,
            },
        })
    }

    /// Greedy weight-balanced assignment: heaviest unit first, nearest
    /// acceptable domain wins, with the budget relaxed rung by rung.
    fn assign_with_ladder(&self, index: &CentroidIndex) -> Result<Vec<Vec<usize>>, SplitError> {
        let domains = self.config.domains as usize;
        let mut per_domain: Vec<Vec<usize>> = vec![Vec::new(); domains];
        let mut running = vec![0.0f64; domains];
        let mut placed = vec![false; self.units.len()];
        let mut assigned = 0usize;

        for tolerance in &self.config.tolerance_ladder {
            let budget = self.average_weight * (1.0 + tolerance);
            for &idx in &self.order {
                if placed[idx] {
                    continue;
                }
                for candidate in index.ranked(self.points[idx]) {
                    if running[candidate] < budget {
                        running[candidate] += self.units[idx].weight;
                        per_domain[candidate].push(idx);
                        placed[idx] = true;
                        assigned += 1;
                        break;
                    }
                }
            }
            if assigned == self.units.len() {
                break;
            }
        }

        // The unbounded rung accepts everything, so a shortfall here means
        // the ladder state is corrupt. A partial map is unusable downstream.
        if assigned != self.units.len() {
            return Err(SplitError::AssignmentIncomplete {
                assigned,
                total: self.units.len(),
            });
        }
        Ok(per_domain)
    }

    fn recompute_centroids(&self, assignment: &[Vec<usize>], previous: &[DVec2]) -> Vec<DVec2> {
        assignment
            .iter()
            .zip(previous)
            .map(|(indices, prev)| {
                if indices.is_empty() {
                    // A domain that won no units keeps its centroid.
                    *prev
                } else {
                    let sum = indices
                        .iter()
                        .fold(DVec2::ZERO, |acc, i| acc + self.points[*i]);
                    sum / indices.len() as f64
                }
            })
            .collect()
    }

    fn ratio_of(&self, assignment: &[Vec<usize>]) -> f64 {
        let mut max = f64::MIN;
        let mut min = f64::MAX;
        for indices in assignment {
            let weight: f64 = indices.iter().map(|i| self.units[*i].weight).sum();
            max = max.max(weight);
            min = min.min(weight);
        }
        max / min
    }

    /// Plain nearest-domain tessellation, no weight constraint.
    fn tessellate(&self, index: &CentroidIndex) -> Vec<Vec<usize>> {
        let mut per_domain: Vec<Vec<usize>> = vec![Vec::new(); self.config.domains as usize];
        for (idx, point) in self.points.iter().enumerate() {
            per_domain[index.nearest(*point)].push(idx);
        }
        per_domain
    }
}

/// Seed centroids with Lloyd's algorithm over coordinates only; unit
/// weights play no part in seeding.
fn kmeans_centroids(points: &[DVec2], k: usize, rng: &mut ChaCha8Rng) -> Vec<DVec2> {
    let mut centroids: Vec<DVec2> =
        rand::seq::index::sample(rng, points.len(), k.min(points.len()))
            .iter()
            .map(|i| points[i])
            .collect();
    // More domains than units: reuse points so every domain has a seed.
    while centroids.len() < k {
        centroids.push(points[centroids.len() % points.len()]);
    }

    for _ in 0..KMEANS_ROUNDS {
        let index = CentroidIndex::new(centroids.clone());
        let mut sums = vec![DVec2::ZERO; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for point in points {
            let nearest = index.nearest(*point);
            sums[nearest] += *point;
            counts[nearest] += 1;
        }
        for (i, centroid) in centroids.iter_mut().enumerate() {
            if counts[i] > 0 {
                *centroid = sums[i] / counts[i] as f64;
            }
        }
    }
    centroids
}

#[cfg(test)]
mod tests {
    use super::*;
    use popsim_common::{GeoPoint, UnitId};

    fn unit(id: u32, weight: f64, lat: f64, lon: f64) -> SpatialUnit {
        SpatialUnit {
            id: UnitId(id),
            name: format!("unit-{id}"),
            weight,
            position: GeoPoint::new(lat, lon),
        }
    }

    fn grid_units(side: u32) -> Vec<SpatialUnit> {
        let mut units = Vec::new();
        for i in 0..side * side {
            let lat = f64::from(i / side);
            let lon = f64::from(i % side);
            // Weights vary but stay positive.
            units.push(unit(i, 1.0 + f64::from(i % 7), lat, lon));
        }
        units
    }

    #[test]
    fn zero_domains_is_a_configuration_error() {
        let units = grid_units(3);
        let config = SplitConfig::new(0);
        assert!(matches!(
            DomainSplitter::split(&units, &config),
            Err(SplitError::NoDomains)
        ));
    }

    #[test]
    fn empty_units_is_a_data_error() {
        let config = SplitConfig::new(2);
        assert!(matches!(
            DomainSplitter::split(&[], &config),
            Err(SplitError::NoUnits)
        ));
    }

    #[test]
    fn bounded_ladder_is_rejected() {
        let units = grid_units(3);
        let mut config = SplitConfig::new(2);
        config.tolerance_ladder = vec![0.0, 0.5];
        assert!(matches!(
            DomainSplitter::split(&units, &config),
            Err(SplitError::InvalidLadder)
        ));
    }

    #[test]
    fn every_unit_lands_in_exactly_one_domain() {
        let units = grid_units(6);
        let config = SplitConfig::new(4);
        let outcome = DomainSplitter::split(&units, &config).unwrap();
        assert_eq!(outcome.map.unit_count(), units.len());
        assert!(outcome.map.covers(units.iter().map(|u| u.id)));
        assert_eq!(outcome.map.domain_count(), 4);
    }

    #[test]
    fn best_ratio_never_regresses_past_first_round() {
        let units = grid_units(7);
        let config = SplitConfig::new(3);
        let outcome = DomainSplitter::split(&units, &config).unwrap();
        assert!(outcome.stats.best_ratio <= outcome.stats.initial_ratio);
        assert!(outcome.stats.best_ratio >= 1.0);
    }

    #[test]
    fn same_seed_reproduces_the_split() {
        let units = grid_units(5);
        let config = SplitConfig::new(3);
        let first = DomainSplitter::split(&units, &config).unwrap();
        let second = DomainSplitter::split(&units, &config).unwrap();
        assert_eq!(first.map, second.map);
        assert_eq!(first.stats.best_ratio, second.stats.best_ratio);
    }

    #[test]
    fn heavy_units_are_separated() {
        // Two heavy units in opposite corners, each with a light neighbour.
        // Pairing them 100+1 / 100+1 gives a ratio near 1.0; the naive
        // 100+100 / 1+1 grouping would score 100.
        let units = vec![
            unit(0, 100.0, 0.0, 0.0),
            unit(1, 100.0, 10.0, 10.0),
            unit(2, 1.0, 0.5, 0.0),
            unit(3, 1.0, 10.0, 9.5),
        ];
        let config = SplitConfig::new(2);
        let outcome = DomainSplitter::split(&units, &config).unwrap();
        let map = &outcome.map;
        assert_ne!(map.domain_of(UnitId(0)), map.domain_of(UnitId(1)));
        assert_eq!(map.domain_of(UnitId(0)), map.domain_of(UnitId(2)));
        assert_eq!(map.domain_of(UnitId(1)), map.domain_of(UnitId(3)));

        let weights: BTreeMap<UnitId, f64> =
            units.iter().map(|u| (u.id, u.weight)).collect();
        let ratio = map.balance_ratio(&weights);
        assert!(ratio < 1.2, "expected near-perfect balance, got {ratio}");
    }

    #[test]
    fn single_domain_takes_everything() {
        let units = grid_units(4);
        let config = SplitConfig::new(1);
        let outcome = DomainSplitter::split(&units, &config).unwrap();
        assert_eq!(outcome.map.units_of(DomainId(0)).len(), units.len());
        assert_eq!(outcome.stats.best_ratio, 1.0);
    }

    #[test]
    fn more_domains_than_units_still_covers() {
        let units = vec![unit(0, 1.0, 0.0, 0.0), unit(1, 2.0, 5.0, 5.0)];
        let config = SplitConfig::new(4);
        let outcome = DomainSplitter::split(&units, &config).unwrap();
        assert_eq!(outcome.map.unit_count(), 2);
        assert_eq!(outcome.map.domain_count(), 4);
    }

    #[test]
    fn ranked_centroids_go_near_to_far() {
        let index = CentroidIndex::new(vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(5.0, 0.0),
            DVec2::new(1.0, 0.0),
        ]);
        assert_eq!(index.ranked(DVec2::new(0.1, 0.0)), vec![0, 2, 1]);
        assert_eq!(index.nearest(DVec2::new(4.0, 0.0)), 1);
    }
}
