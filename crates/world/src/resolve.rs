use popsim_common::{DomainId, EntityUid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::entities::{CoreKinds, EntityRef, ExternalStub};
use crate::world::World;

/// Maps an entity uid to its owner domain. Backed by the store's owner
/// directory in production; tests use plain maps.
pub trait OwnerLookup {
    fn owner_of(&self, uid: EntityUid) -> Option<DomainId>;
}

impl OwnerLookup for std::collections::BTreeMap<EntityUid, DomainId> {
    fn owner_of(&self, uid: EntityUid) -> Option<DomainId> {
        self.get(&uid).copied()
    }
}

/// The set of domains a load session owns — usually one rank, or every
/// domain for an unfiltered load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainFilter {
    domains: BTreeSet<DomainId>,
}

impl DomainFilter {
    pub fn single(domain: DomainId) -> Self {
        Self {
            domains: BTreeSet::from([domain]),
        }
    }

    pub fn of<I: IntoIterator<Item = DomainId>>(domains: I) -> Self {
        Self {
            domains: domains.into_iter().collect(),
        }
    }

    pub fn contains(&self, domain: DomainId) -> bool {
        self.domains.contains(&domain)
    }

    pub fn domains(&self) -> impl Iterator<Item = DomainId> + '_ {
        self.domains.iter().copied()
    }
}

/// Errors from the reference resolve pass. Both abort the load; a world
/// with unresolved or dangling references must not reach the simulation.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("{uid} is not covered by any owner-domain entry (stale membership index)")]
    UnknownOwner { uid: EntityUid },
    #[error("{uid} is owned locally but missing from the loaded {kind} collection")]
    MissingLocal { uid: EntityUid, kind: &'static str },
}

/// Hydrate every raw reference in `world`.
///
/// Entity types reference each other cyclically (a resident references its
/// household, the household its residents), so construction defers local
/// links until all same-type entities exist; this pass finishes the job.
/// Afterwards every slot is `Local`, `External` or `Absent`.
pub fn resolve_world(
    world: &mut World,
    filter: &DomainFilter,
    owners: &dyn OwnerLookup,
    kinds: &CoreKinds,
) -> Result<(), ResolveError> {
    let people: BTreeSet<EntityUid> = world.people.keys().copied().collect();
    let households: BTreeSet<EntityUid> = world.households.keys().copied().collect();
    let venues: BTreeSet<EntityUid> = world.venues.keys().copied().collect();

    for person in world.people.values_mut() {
        resolve_slot(
            &mut person.household,
            &households,
            kinds.household,
            crate::kinds::HOUSEHOLD,
            filter,
            owners,
        )?;
        resolve_slot(
            &mut person.workplace,
            &venues,
            kinds.venue,
            crate::kinds::VENUE,
            filter,
            owners,
        )?;
    }
    for household in world.households.values_mut() {
        for slot in &mut household.residents {
            resolve_slot(slot, &people, kinds.person, crate::kinds::PERSON, filter, owners)?;
        }
    }
    for venue in world.venues.values_mut() {
        for slot in &mut venue.workers {
            resolve_slot(slot, &people, kinds.person, crate::kinds::PERSON, filter, owners)?;
        }
    }
    for station in world.stations.values_mut() {
        for slot in &mut station.commuters {
            resolve_slot(slot, &people, kinds.person, crate::kinds::PERSON, filter, owners)?;
        }
    }

    let census = world.reference_census();
    debug_assert_eq!(census.raw, 0);
    tracing::debug!(
        local = census.local,
        external = census.external,
        absent = census.absent,
        "reference resolve complete"
    );
    Ok(())
}

fn resolve_slot(
    slot: &mut EntityRef,
    arena: &BTreeSet<EntityUid>,
    kind: popsim_common::TypeTag,
    kind_name: &'static str,
    filter: &DomainFilter,
    owners: &dyn OwnerLookup,
) -> Result<(), ResolveError> {
    if let EntityRef::Raw(uid) = *slot {
        let domain = owners
            .owner_of(uid)
            .ok_or(ResolveError::UnknownOwner { uid })?;
        if filter.contains(domain) {
            if !arena.contains(&uid) {
                return Err(ResolveError::MissingLocal {
                    uid,
                    kind: kind_name,
                });
            }
            *slot = EntityRef::Local(uid);
        } else {
            *slot = EntityRef::External(ExternalStub { uid, domain, kind });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Household, HouseholdKind, Person, Sex, register_core_kinds};
    use popsim_common::{TypeRegistry, UnitId};
    use std::collections::BTreeMap;

    fn kinds() -> CoreKinds {
        let mut registry = TypeRegistry::new();
        register_core_kinds(&mut registry)
    }

    fn person(uid: u64, household: EntityRef) -> Person {
        Person {
            uid: EntityUid(uid),
            age: 30,
            sex: Sex::Male,
            home_unit: UnitId(0),
            household,
            workplace: EntityRef::Absent,
        }
    }

    fn household(uid: u64, residents: Vec<EntityRef>) -> Household {
        Household {
            uid: EntityUid(uid),
            unit: UnitId(0),
            kind: HouseholdKind::Family,
            max_size: 4,
            residents,
        }
    }

    #[test]
    fn raw_becomes_local_when_owned_and_present() {
        let mut world = World::new();
        world
            .people
            .insert(EntityUid(1), person(1, EntityRef::Raw(EntityUid(10))));
        world
            .households
            .insert(EntityUid(10), household(10, vec![EntityRef::Raw(EntityUid(1))]));

        let owners: BTreeMap<EntityUid, DomainId> =
            [(EntityUid(1), DomainId(0)), (EntityUid(10), DomainId(0))].into();
        let filter = DomainFilter::single(DomainId(0));
        resolve_world(&mut world, &filter, &owners, &kinds()).unwrap();

        assert_eq!(
            world.people[&EntityUid(1)].household.as_local(),
            Some(EntityUid(10))
        );
        assert_eq!(world.reference_census().raw, 0);
    }

    #[test]
    fn raw_becomes_stub_when_owned_elsewhere() {
        let mut world = World::new();
        world
            .people
            .insert(EntityUid(1), person(1, EntityRef::Raw(EntityUid(10))));

        let owners: BTreeMap<EntityUid, DomainId> =
            [(EntityUid(1), DomainId(0)), (EntityUid(10), DomainId(2))].into();
        let filter = DomainFilter::single(DomainId(0));
        resolve_world(&mut world, &filter, &owners, &kinds()).unwrap();

        let stub = world.people[&EntityUid(1)]
            .household
            .as_external()
            .copied()
            .unwrap();
        assert_eq!(stub.uid, EntityUid(10));
        assert_eq!(stub.domain, DomainId(2));
    }

    #[test]
    fn unknown_owner_is_fatal() {
        let mut world = World::new();
        world
            .people
            .insert(EntityUid(1), person(1, EntityRef::Raw(EntityUid(10))));

        let owners: BTreeMap<EntityUid, DomainId> = [(EntityUid(1), DomainId(0))].into();
        let filter = DomainFilter::single(DomainId(0));
        let err = resolve_world(&mut world, &filter, &owners, &kinds()).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::UnknownOwner {
                uid: EntityUid(10)
            }
        ));
    }

    #[test]
    fn locally_owned_but_missing_is_fatal() {
        let mut world = World::new();
        world
            .people
            .insert(EntityUid(1), person(1, EntityRef::Raw(EntityUid(10))));

        // Household 10 is owned by this domain but was never loaded.
        let owners: BTreeMap<EntityUid, DomainId> =
            [(EntityUid(1), DomainId(0)), (EntityUid(10), DomainId(0))].into();
        let filter = DomainFilter::single(DomainId(0));
        let err = resolve_world(&mut world, &filter, &owners, &kinds()).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::MissingLocal {
                uid: EntityUid(10),
                kind: "household"
            }
        ));
    }

    #[test]
    fn absent_slots_stay_absent() {
        let mut world = World::new();
        world.people.insert(EntityUid(1), person(1, EntityRef::Absent));
        let owners: BTreeMap<EntityUid, DomainId> = [(EntityUid(1), DomainId(0))].into();
        let filter = DomainFilter::single(DomainId(0));
        resolve_world(&mut world, &filter, &owners, &kinds()).unwrap();
        assert_eq!(world.people[&EntityUid(1)].household, EntityRef::Absent);
        assert_eq!(world.people[&EntityUid(1)].workplace, EntityRef::Absent);
    }
}
