use popsim_balance::UnitActivity;
use popsim_common::{EntityUid, SpatialUnit, UnitId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::entities::{EntityRef, Household, Person, Station, Venue};

/// The world as one rank sees it: geography plus flat, id-indexed entity
/// collections.
///
/// `BTreeMap` keeps iteration deterministic. A fully built (or unfiltered)
/// world holds every entity; a domain-filtered load holds only owned
/// entities, with stubs inside the reference slots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct World {
    pub units: BTreeMap<UnitId, SpatialUnit>,
    pub people: BTreeMap<EntityUid, Person>,
    pub households: BTreeMap<EntityUid, Household>,
    pub venues: BTreeMap<EntityUid, Venue>,
    pub stations: BTreeMap<EntityUid, Station>,
}

/// Counts of reference slot states across the whole world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefCensus {
    pub raw: usize,
    pub local: usize,
    pub external: usize,
    pub absent: usize,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_count(&self) -> usize {
        self.people.len() + self.households.len() + self.venues.len() + self.stations.len()
    }

    /// Per-unit activity counts, the weight aggregator's input.
    ///
    /// People count at their home unit, workers at their venue's unit,
    /// commuters at their station's unit.
    pub fn activity_by_unit(&self) -> BTreeMap<UnitId, UnitActivity> {
        let mut activity: BTreeMap<UnitId, UnitActivity> = BTreeMap::new();
        for person in self.people.values() {
            activity.entry(person.home_unit).or_default().n_people += 1;
        }
        for venue in self.venues.values() {
            activity.entry(venue.unit).or_default().n_workers += venue.workers.len() as u32;
        }
        for station in self.stations.values() {
            activity.entry(station.unit).or_default().n_commuters +=
                station.commuters.len() as u32;
        }
        activity
    }

    /// Visit every foreign-key slot in the world.
    pub fn for_each_ref(&self, mut f: impl FnMut(&EntityRef)) {
        for person in self.people.values() {
            f(&person.household);
            f(&person.workplace);
        }
        for household in self.households.values() {
            household.residents.iter().for_each(&mut f);
        }
        for venue in self.venues.values() {
            venue.workers.iter().for_each(&mut f);
        }
        for station in self.stations.values() {
            station.commuters.iter().for_each(&mut f);
        }
    }

    /// Tally reference slot states; useful for load reporting and for
    /// checking that hydration left nothing raw.
    pub fn reference_census(&self) -> RefCensus {
        let mut census = RefCensus::default();
        self.for_each_ref(|slot| match slot {
            EntityRef::Raw(_) => census.raw += 1,
            EntityRef::Local(_) => census.local += 1,
            EntityRef::External(_) => census.external += 1,
            EntityRef::Absent => census.absent += 1,
        });
        census
    }

    /// Highest entity uid present, for resuming a uid allocator.
    pub fn max_uid(&self) -> Option<EntityUid> {
        [
            self.people.keys().next_back(),
            self.households.keys().next_back(),
            self.venues.keys().next_back(),
            self.stations.keys().next_back(),
        ]
        .into_iter()
        .flatten()
        .max()
        .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{HouseholdKind, Sex};

    fn small_world() -> World {
        let mut world = World::new();
        world.people.insert(
            EntityUid(0),
            Person {
                uid: EntityUid(0),
                age: 34,
                sex: Sex::Female,
                home_unit: UnitId(1),
                household: EntityRef::Local(EntityUid(10)),
                workplace: EntityRef::Absent,
            },
        );
        world.households.insert(
            EntityUid(10),
            Household {
                uid: EntityUid(10),
                unit: UnitId(1),
                kind: HouseholdKind::Family,
                max_size: 4,
                residents: vec![EntityRef::Local(EntityUid(0))],
            },
        );
        world.stations.insert(
            EntityUid(20),
            Station {
                uid: EntityUid(20),
                unit: UnitId(2),
                commuters: vec![EntityRef::Local(EntityUid(0))],
            },
        );
        world
    }

    #[test]
    fn activity_counts_per_unit() {
        let world = small_world();
        let activity = world.activity_by_unit();
        assert_eq!(activity[&UnitId(1)].n_people, 1);
        assert_eq!(activity[&UnitId(2)].n_commuters, 1);
        assert_eq!(activity.get(&UnitId(2)).unwrap().n_people, 0);
    }

    #[test]
    fn census_counts_every_slot() {
        let world = small_world();
        let census = world.reference_census();
        assert_eq!(census.local, 3);
        assert_eq!(census.absent, 1);
        assert_eq!(census.raw, 0);
    }

    #[test]
    fn max_uid_spans_collections() {
        let world = small_world();
        assert_eq!(world.max_uid(), Some(EntityUid(20)));
        assert_eq!(World::new().max_uid(), None);
    }
}
