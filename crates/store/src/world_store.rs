//! Whole-world save and domain-filtered load on top of the container.

use popsim_balance::{PartitionMap, UnitActivity};
use popsim_common::{DomainId, EntityUid, SpatialUnit, TypeRegistry, UnitId};
use popsim_world::{DomainFilter, OwnerLookup, World, kinds, register_core_kinds, resolve_world};
use std::collections::BTreeMap;
use std::path::Path;

use crate::container::{StoreContainer, StoreError};
use crate::records::{
    LoadContext, UNIT_GROUP, decode_household_frame, decode_person_frame, decode_station_frame,
    decode_unit_frame, decode_venue_frame, encode_household_frame, encode_person_frame,
    encode_station_frame, encode_unit_frame, encode_venue_frame, u32_col, uid_col,
};

const ENTITY_GROUPS: [&str; 4] = [kinds::PERSON, kinds::HOUSEHOLD, kinds::VENUE, kinds::STATION];

/// Write the whole world to a fresh store directory, `chunk_size` records
/// per chunk, with the membership index embedded.
///
/// Not transactional: a crash mid-save leaves an unusable store; re-run the
/// save from scratch.
pub fn save_world(
    world: &World,
    map: &PartitionMap,
    path: impl AsRef<Path>,
    chunk_size: usize,
) -> Result<(), StoreError> {
    if chunk_size == 0 {
        return Err(StoreError::InvalidChunkSize);
    }
    let mut container = StoreContainer::create(path)?;

    let activity = world.activity_by_unit();
    let units: Vec<&SpatialUnit> = world.units.values().collect();
    for batch in units.chunks(chunk_size) {
        container.append_chunk(UNIT_GROUP, &encode_unit_frame(batch, &activity))?;
    }

    let people: Vec<_> = world.people.values().collect();
    for batch in people.chunks(chunk_size) {
        container.append_chunk(kinds::PERSON, &encode_person_frame(batch))?;
    }
    let households: Vec<_> = world.households.values().collect();
    for batch in households.chunks(chunk_size) {
        container.append_chunk(kinds::HOUSEHOLD, &encode_household_frame(batch))?;
    }
    let venues: Vec<_> = world.venues.values().collect();
    for batch in venues.chunks(chunk_size) {
        container.append_chunk(kinds::VENUE, &encode_venue_frame(batch))?;
    }
    let stations: Vec<_> = world.stations.values().collect();
    for batch in stations.chunks(chunk_size) {
        container.append_chunk(kinds::STATION, &encode_station_frame(batch))?;
    }

    container.write_partition_map(map)?;
    tracing::info!(
        path = %container.root().display(),
        units = units.len(),
        entities = world.entity_count(),
        chunk_size,
        "world saved"
    );
    Ok(())
}

/// uid → owner domain for every persisted entity, built by scanning the
/// store's id and unit columns against the membership index.
#[derive(Debug, Clone, Default)]
pub struct OwnerDirectory {
    owners: BTreeMap<EntityUid, DomainId>,
}

impl OwnerDirectory {
    pub fn scan(container: &StoreContainer, map: &PartitionMap) -> Result<Self, StoreError> {
        let mut owners = BTreeMap::new();
        for group in ENTITY_GROUPS {
            let unit_column = if group == kinds::PERSON {
                "home_unit"
            } else {
                "unit"
            };
            for index in 1..=container.chunk_count(group) {
                let frame = container.read_chunk(group, index)?;
                let uids = uid_col(&frame, group, "uid")?;
                let units = u32_col(&frame, group, unit_column)?;
                for (uid, &unit) in uids.iter().zip(units) {
                    let unit = UnitId(unit);
                    let domain = map
                        .domain_of(unit)
                        .ok_or(StoreError::StaleIndex { unit })?;
                    owners.insert(*uid, domain);
                }
            }
        }
        tracing::debug!(entries = owners.len(), "owner directory scanned");
        Ok(Self { owners })
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

impl OwnerLookup for OwnerDirectory {
    fn owner_of(&self, uid: EntityUid) -> Option<DomainId> {
        self.owners.get(&uid).copied()
    }
}

/// Geography plus per-unit activity, read unfiltered. The repartitioning
/// path uses this without touching the entity groups.
pub fn read_units(
    container: &StoreContainer,
) -> Result<(BTreeMap<UnitId, SpatialUnit>, BTreeMap<UnitId, UnitActivity>), StoreError> {
    let mut units = BTreeMap::new();
    let mut activity = BTreeMap::new();
    for index in 1..=container.chunk_count(UNIT_GROUP) {
        let frame = container.read_chunk(UNIT_GROUP, index)?;
        for (unit, act) in decode_unit_frame(&frame)? {
            activity.insert(unit.id, act);
            units.insert(unit.id, unit);
        }
    }
    Ok((units, activity))
}

/// One rank's load session: rebuild the world for the filtered domains,
/// batch by batch, then hydrate every reference.
///
/// `chunk_size` only paces the decode; it need not match the size the
/// store was written with, nor divide the record count.
pub fn load_world(
    path: impl AsRef<Path>,
    chunk_size: usize,
    filter: &DomainFilter,
    owners: &OwnerDirectory,
    registry: &mut TypeRegistry,
) -> Result<World, StoreError> {
    if chunk_size == 0 {
        return Err(StoreError::InvalidChunkSize);
    }
    let container = StoreContainer::open(path)?;
    container.verify_integrity()?;
    let map = container.read_partition_map()?;
    let core = register_core_kinds(registry);

    let mut world = World::new();
    let (units, _activity) = read_units(&container)?;
    world.units = units;

    let ctx = LoadContext {
        filter,
        owners,
        kinds: core,
        map: &map,
    };
    for group in ENTITY_GROUPS {
        for index in 1..=container.chunk_count(group) {
            let frame = container.read_chunk(group, index)?;
            let rows = frame.rows as usize;
            let mut start = 0;
            while start < rows {
                let end = (start + chunk_size).min(rows);
                let batch = frame.slice(start, end);
                match group {
                    kinds::PERSON => decode_person_frame(&batch, &ctx, &mut world)?,
                    kinds::HOUSEHOLD => decode_household_frame(&batch, &ctx, &mut world)?,
                    kinds::VENUE => decode_venue_frame(&batch, &ctx, &mut world)?,
                    _ => decode_station_frame(&batch, &ctx, &mut world)?,
                }
                start = end;
            }
        }
    }

    resolve_world(&mut world, filter, owners, &core)?;
    let census = world.reference_census();
    tracing::info!(
        domains = ?filter.domains().collect::<Vec<_>>(),
        entities = world.entity_count(),
        local = census.local,
        external = census.external,
        "load session complete"
    );
    Ok(world)
}
