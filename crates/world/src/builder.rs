use popsim_common::{EntityUid, GeoPoint, SpatialUnit, UidAllocator, UnitId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

use crate::entities::{EntityRef, Household, HouseholdKind, Person, Sex, Station, Venue};
use crate::world::World;

/// Parameters for the deterministic synthetic world.
#[derive(Debug, Clone, Copy)]
pub struct BuildParams {
    pub units: u32,
    pub people: u32,
    pub seed: u64,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            units: 16,
            people: 400,
            seed: 42,
        }
    }
}

/// Builds a small but structurally complete world: units on a jittered
/// grid, households filled to capacity, venues with commuting workers and
/// stations with cross-unit commuter lists.
///
/// Everything is driven by one seeded ChaCha stream, so the same params
/// always produce the same world.
pub struct WorldBuilder {
    params: BuildParams,
}

impl WorldBuilder {
    pub fn new(params: BuildParams) -> Self {
        Self { params }
    }

    pub fn build(&self) -> World {
        let units = self.params.units.max(1);
        let mut rng = ChaCha8Rng::seed_from_u64(self.params.seed);
        let mut alloc = UidAllocator::new();
        let mut world = World::new();

        let side = f64::from(units).sqrt().ceil() as u32;
        for u in 0..units {
            world.units.insert(
                UnitId(u),
                SpatialUnit {
                    id: UnitId(u),
                    name: format!("unit-{u:04}"),
                    weight: 0.0,
                    position: GeoPoint::new(
                        f64::from(u / side) + rng.gen_range(-0.2..0.2),
                        f64::from(u % side) + rng.gen_range(-0.2..0.2),
                    ),
                },
            );
        }

        let sectors = ["retail", "education", "manufacturing", "health"];
        let mut venues: Vec<(EntityUid, UnitId)> = Vec::new();
        for u in (0..units).step_by(3) {
            let uid = alloc.allocate();
            world.venues.insert(
                uid,
                Venue {
                    uid,
                    unit: UnitId(u),
                    sector: sectors[(u as usize / 3) % sectors.len()].to_string(),
                    workers: Vec::new(),
                },
            );
            venues.push((uid, UnitId(u)));
        }

        let mut stations: Vec<EntityUid> = Vec::new();
        for u in (0..units).step_by(5) {
            let uid = alloc.allocate();
            world.stations.insert(
                uid,
                Station {
                    uid,
                    unit: UnitId(u),
                    commuters: Vec::new(),
                },
            );
            stations.push(uid);
        }

        // One open household per unit; a new one opens when the current
        // fills up.
        let mut open: BTreeMap<UnitId, (EntityUid, u32)> = BTreeMap::new();
        for i in 0..self.params.people {
            let unit = UnitId(i % units);
            let uid = alloc.allocate();
            let age = rng.gen_range(0u32..95);
            let sex = if rng.gen_bool(0.5) {
                Sex::Female
            } else {
                Sex::Male
            };

            let mut home = None;
            if let Some(entry) = open.get_mut(&unit) {
                if entry.1 > 0 {
                    entry.1 -= 1;
                    home = Some(entry.0);
                }
            }
            let huid = match home {
                Some(huid) => huid,
                None => {
                    let huid = alloc.allocate();
                    let max_size = rng.gen_range(2u32..=5);
                    let kind = match rng.gen_range(0u32..10) {
                        0 => HouseholdKind::Student,
                        1 => HouseholdKind::Communal,
                        2 => HouseholdKind::Other,
                        _ => HouseholdKind::Family,
                    };
                    world.households.insert(
                        huid,
                        Household {
                            uid: huid,
                            unit,
                            kind,
                            max_size,
                            residents: Vec::new(),
                        },
                    );
                    open.insert(unit, (huid, max_size - 1));
                    huid
                }
            };

            let workplace = if (18..=64).contains(&age) && !venues.is_empty() && rng.gen_bool(0.6)
            {
                let (vuid, vunit) = venues[rng.gen_range(0..venues.len())];
                if let Some(venue) = world.venues.get_mut(&vuid) {
                    venue.workers.push(EntityRef::Local(uid));
                }
                // Cross-unit workers ride a station.
                if vunit != unit && !stations.is_empty() {
                    let suid = stations[rng.gen_range(0..stations.len())];
                    if let Some(station) = world.stations.get_mut(&suid) {
                        station.commuters.push(EntityRef::Local(uid));
                    }
                }
                EntityRef::Local(vuid)
            } else {
                EntityRef::Absent
            };

            world.people.insert(
                uid,
                Person {
                    uid,
                    age,
                    sex,
                    home_unit: unit,
                    household: EntityRef::Local(huid),
                    workplace,
                },
            );
            if let Some(household) = world.households.get_mut(&huid) {
                household.residents.push(EntityRef::Local(uid));
            }
        }

        tracing::debug!(
            units = world.units.len(),
            people = world.people.len(),
            households = world.households.len(),
            venues = world.venues.len(),
            stations = world.stations.len(),
            "synthetic world built"
        );
        world
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_is_deterministic() {
        let params = BuildParams::default();
        let a = WorldBuilder::new(params).build();
        let b = WorldBuilder::new(params).build();
        assert_eq!(a.people, b.people);
        assert_eq!(a.households, b.households);
        assert_eq!(a.units, b.units);
    }

    #[test]
    fn counts_match_params() {
        let params = BuildParams {
            units: 9,
            people: 120,
            seed: 7,
        };
        let world = WorldBuilder::new(params).build();
        assert_eq!(world.units.len(), 9);
        assert_eq!(world.people.len(), 120);
        assert!(!world.households.is_empty());
    }

    #[test]
    fn built_world_is_fully_hydrated() {
        let world = WorldBuilder::new(BuildParams::default()).build();
        let census = world.reference_census();
        assert_eq!(census.raw, 0);
        assert_eq!(census.external, 0);
        assert!(census.local > 0);
    }

    #[test]
    fn households_respect_capacity() {
        let world = WorldBuilder::new(BuildParams::default()).build();
        for household in world.households.values() {
            assert!(household.residents.len() as u32 <= household.max_size);
            for resident in &household.residents {
                let uid = resident.as_local().unwrap();
                assert_eq!(world.people[&uid].household.as_local(), Some(household.uid));
            }
        }
    }

    #[test]
    fn activity_people_sum_matches_population() {
        let world = WorldBuilder::new(BuildParams::default()).build();
        let total: u32 = world
            .activity_by_unit()
            .values()
            .map(|a| a.n_people)
            .sum();
        assert_eq!(total as usize, world.people.len());
    }
}
