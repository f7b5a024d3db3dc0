//! Per-type columnar encode/decode.
//!
//! Encoding is write-once: frames are built from a fully resolved world and
//! never mutated. Decoding applies the domain filter — records owned by
//! out-of-filter domains are skipped entirely; in-filter records come back
//! with `Raw` slots for in-filter targets (hydrated by the resolve pass) and
//! immediate `External` stubs for foreign targets.

use popsim_balance::{PartitionMap, UnitActivity};
use popsim_common::{EntityUid, GeoPoint, SpatialUnit, UnitId};
use popsim_world::{
    CoreKinds, DomainFilter, EntityRef, ExternalStub, Household, HouseholdKind, OwnerLookup,
    Person, ResolveError, Sex, Station, Venue, World,
};
use std::collections::BTreeMap;

use crate::column::{Column, UidListColumn};
use crate::container::{ChunkFrame, StoreError};

/// The geography group; entity groups are named after their kinds.
pub const UNIT_GROUP: &str = "unit";

/// Everything a filtered decode needs to classify record and reference
/// ownership.
pub struct LoadContext<'a> {
    pub filter: &'a DomainFilter,
    pub owners: &'a dyn OwnerLookup,
    pub kinds: CoreKinds,
    pub map: &'a PartitionMap,
}

impl LoadContext<'_> {
    fn owner_of_unit(&self, unit: UnitId) -> Result<popsim_common::DomainId, StoreError> {
        self.map
            .domain_of(unit)
            .ok_or(StoreError::StaleIndex { unit })
    }

    fn owns_unit(&self, unit: UnitId) -> Result<bool, StoreError> {
        Ok(self.filter.contains(self.owner_of_unit(unit)?))
    }

    /// Sentinel becomes `Absent`; in-filter targets stay `Raw` for the
    /// resolve pass; foreign targets become stubs immediately.
    fn decode_ref(
        &self,
        target: Option<EntityUid>,
        kind: popsim_common::TypeTag,
    ) -> Result<EntityRef, StoreError> {
        let Some(uid) = target else {
            return Ok(EntityRef::Absent);
        };
        let domain = self
            .owners
            .owner_of(uid)
            .ok_or(ResolveError::UnknownOwner { uid })?;
        Ok(if self.filter.contains(domain) {
            EntityRef::Raw(uid)
        } else {
            EntityRef::External(ExternalStub { uid, domain, kind })
        })
    }
}

fn bad(group: &str, name: &'static str) -> StoreError {
    StoreError::BadColumn {
        group: group.to_string(),
        name,
    }
}

pub(crate) fn u32_col<'f>(
    frame: &'f ChunkFrame,
    group: &str,
    name: &'static str,
) -> Result<&'f [u32], StoreError> {
    frame
        .column(group, name)?
        .as_u32()
        .ok_or_else(|| bad(group, name))
}

fn f64_col<'f>(
    frame: &'f ChunkFrame,
    group: &str,
    name: &'static str,
) -> Result<&'f [f64], StoreError> {
    frame
        .column(group, name)?
        .as_f64()
        .ok_or_else(|| bad(group, name))
}

fn str_col<'f>(
    frame: &'f ChunkFrame,
    group: &str,
    name: &'static str,
) -> Result<&'f [String], StoreError> {
    frame
        .column(group, name)?
        .as_str_rows()
        .ok_or_else(|| bad(group, name))
}

pub(crate) fn uid_col<'f>(
    frame: &'f ChunkFrame,
    group: &str,
    name: &'static str,
) -> Result<&'f [EntityUid], StoreError> {
    frame
        .column(group, name)?
        .as_uid()
        .ok_or_else(|| bad(group, name))
}

fn opt_uid_col(
    frame: &ChunkFrame,
    group: &str,
    name: &'static str,
) -> Result<Vec<Option<EntityUid>>, StoreError> {
    frame
        .column(group, name)?
        .as_opt_uid()
        .ok_or_else(|| bad(group, name))
}

fn list_col(
    frame: &ChunkFrame,
    group: &str,
    name: &'static str,
) -> Result<Vec<Vec<EntityUid>>, StoreError> {
    Ok(frame
        .column(group, name)?
        .as_uid_list()
        .ok_or_else(|| bad(group, name))?
        .rows())
}

fn ref_target(slot: &EntityRef) -> Option<EntityUid> {
    slot.uid()
}

fn ref_list_targets(slots: &[EntityRef]) -> Vec<EntityUid> {
    slots.iter().filter_map(EntityRef::uid).collect()
}

pub fn encode_unit_frame(
    units: &[&SpatialUnit],
    activity: &BTreeMap<UnitId, UnitActivity>,
) -> ChunkFrame {
    let mut frame = ChunkFrame::new(units.len() as u32);
    let act = |u: &SpatialUnit| activity.get(&u.id).copied().unwrap_or_default();
    frame.columns.insert(
        "id".into(),
        Column::U32(units.iter().map(|u| u.id.0).collect()),
    );
    frame.columns.insert(
        "name".into(),
        Column::Str(units.iter().map(|u| u.name.clone()).collect()),
    );
    frame.columns.insert(
        "lat".into(),
        Column::F64(units.iter().map(|u| u.position.lat).collect()),
    );
    frame.columns.insert(
        "lon".into(),
        Column::F64(units.iter().map(|u| u.position.lon).collect()),
    );
    frame.columns.insert(
        "weight".into(),
        Column::F64(units.iter().map(|u| u.weight).collect()),
    );
    frame.columns.insert(
        "n_people".into(),
        Column::U32(units.iter().map(|u| act(u).n_people).collect()),
    );
    frame.columns.insert(
        "n_workers".into(),
        Column::U32(units.iter().map(|u| act(u).n_workers).collect()),
    );
    frame.columns.insert(
        "n_commuters".into(),
        Column::U32(units.iter().map(|u| act(u).n_commuters).collect()),
    );
    frame
}

/// Geography is shared: every rank decodes all units, unfiltered.
pub fn decode_unit_frame(
    frame: &ChunkFrame,
) -> Result<Vec<(SpatialUnit, UnitActivity)>, StoreError> {
    let g = UNIT_GROUP;
    let ids = u32_col(frame, g, "id")?;
    let names = str_col(frame, g, "name")?;
    let lats = f64_col(frame, g, "lat")?;
    let lons = f64_col(frame, g, "lon")?;
    let weights = f64_col(frame, g, "weight")?;
    let n_people = u32_col(frame, g, "n_people")?;
    let n_workers = u32_col(frame, g, "n_workers")?;
    let n_commuters = u32_col(frame, g, "n_commuters")?;

    let mut rows = Vec::with_capacity(ids.len());
    for i in 0..ids.len() {
        rows.push((
            SpatialUnit {
                id: UnitId(ids[i]),
                name: names[i].clone(),
                weight: weights[i],
                position: GeoPoint::new(lats[i], lons[i]),
            },
            UnitActivity {
                n_people: n_people[i],
                n_workers: n_workers[i],
                n_commuters: n_commuters[i],
            },
        ));
    }
    Ok(rows)
}

pub fn encode_person_frame(rows: &[&Person]) -> ChunkFrame {
    let mut frame = ChunkFrame::new(rows.len() as u32);
    frame.columns.insert(
        "uid".into(),
        Column::Uid(rows.iter().map(|p| p.uid).collect()),
    );
    frame.columns.insert(
        "age".into(),
        Column::U32(rows.iter().map(|p| p.age).collect()),
    );
    frame.columns.insert(
        "sex".into(),
        Column::Str(rows.iter().map(|p| p.sex.as_str().to_string()).collect()),
    );
    frame.columns.insert(
        "home_unit".into(),
        Column::U32(rows.iter().map(|p| p.home_unit.0).collect()),
    );
    frame.columns.insert(
        "household".into(),
        Column::opt_uid_from_rows(rows.iter().map(|p| ref_target(&p.household))),
    );
    frame.columns.insert(
        "workplace".into(),
        Column::opt_uid_from_rows(rows.iter().map(|p| ref_target(&p.workplace))),
    );
    frame
}

pub fn decode_person_frame(
    frame: &ChunkFrame,
    ctx: &LoadContext<'_>,
    world: &mut World,
) -> Result<(), StoreError> {
    let g = popsim_world::kinds::PERSON;
    let uids = uid_col(frame, g, "uid")?;
    let ages = u32_col(frame, g, "age")?;
    let sexes = str_col(frame, g, "sex")?;
    let home_units = u32_col(frame, g, "home_unit")?;
    let households = opt_uid_col(frame, g, "household")?;
    let workplaces = opt_uid_col(frame, g, "workplace")?;

    for i in 0..uids.len() {
        let home_unit = UnitId(home_units[i]);
        if !ctx.owns_unit(home_unit)? {
            continue;
        }
        let sex = Sex::parse(&sexes[i]).ok_or_else(|| bad(g, "sex"))?;
        world.people.insert(
            uids[i],
            Person {
                uid: uids[i],
                age: ages[i],
                sex,
                home_unit,
                household: ctx.decode_ref(households[i], ctx.kinds.household)?,
                workplace: ctx.decode_ref(workplaces[i], ctx.kinds.venue)?,
            },
        );
    }
    Ok(())
}

pub fn encode_household_frame(rows: &[&Household]) -> ChunkFrame {
    let mut frame = ChunkFrame::new(rows.len() as u32);
    frame.columns.insert(
        "uid".into(),
        Column::Uid(rows.iter().map(|h| h.uid).collect()),
    );
    frame.columns.insert(
        "unit".into(),
        Column::U32(rows.iter().map(|h| h.unit.0).collect()),
    );
    frame.columns.insert(
        "kind".into(),
        Column::Str(rows.iter().map(|h| h.kind.as_str().to_string()).collect()),
    );
    frame.columns.insert(
        "max_size".into(),
        Column::U32(rows.iter().map(|h| h.max_size).collect()),
    );
    let residents: Vec<Vec<EntityUid>> =
        rows.iter().map(|h| ref_list_targets(&h.residents)).collect();
    frame.columns.insert(
        "residents".into(),
        Column::UidList(UidListColumn::from_rows(&residents)),
    );
    frame
}

pub fn decode_household_frame(
    frame: &ChunkFrame,
    ctx: &LoadContext<'_>,
    world: &mut World,
) -> Result<(), StoreError> {
    let g = popsim_world::kinds::HOUSEHOLD;
    let uids = uid_col(frame, g, "uid")?;
    let units = u32_col(frame, g, "unit")?;
    let kinds = str_col(frame, g, "kind")?;
    let max_sizes = u32_col(frame, g, "max_size")?;
    let residents = list_col(frame, g, "residents")?;

    for i in 0..uids.len() {
        let unit = UnitId(units[i]);
        if !ctx.owns_unit(unit)? {
            continue;
        }
        let kind = HouseholdKind::parse(&kinds[i]).ok_or_else(|| bad(g, "kind"))?;
        let residents = residents[i]
            .iter()
            .map(|&uid| ctx.decode_ref(Some(uid), ctx.kinds.person))
            .collect::<Result<Vec<_>, _>>()?;
        world.households.insert(
            uids[i],
            Household {
                uid: uids[i],
                unit,
                kind,
                max_size: max_sizes[i],
                residents,
            },
        );
    }
    Ok(())
}

pub fn encode_venue_frame(rows: &[&Venue]) -> ChunkFrame {
    let mut frame = ChunkFrame::new(rows.len() as u32);
    frame.columns.insert(
        "uid".into(),
        Column::Uid(rows.iter().map(|v| v.uid).collect()),
    );
    frame.columns.insert(
        "unit".into(),
        Column::U32(rows.iter().map(|v| v.unit.0).collect()),
    );
    frame.columns.insert(
        "sector".into(),
        Column::Str(rows.iter().map(|v| v.sector.clone()).collect()),
    );
    let workers: Vec<Vec<EntityUid>> = rows.iter().map(|v| ref_list_targets(&v.workers)).collect();
    frame.columns.insert(
        "workers".into(),
        Column::UidList(UidListColumn::from_rows(&workers)),
    );
    frame
}

pub fn decode_venue_frame(
    frame: &ChunkFrame,
    ctx: &LoadContext<'_>,
    world: &mut World,
) -> Result<(), StoreError> {
    let g = popsim_world::kinds::VENUE;
    let uids = uid_col(frame, g, "uid")?;
    let units = u32_col(frame, g, "unit")?;
    let sectors = str_col(frame, g, "sector")?;
    let workers = list_col(frame, g, "workers")?;

    for i in 0..uids.len() {
        let unit = UnitId(units[i]);
        if !ctx.owns_unit(unit)? {
            continue;
        }
        let workers = workers[i]
            .iter()
            .map(|&uid| ctx.decode_ref(Some(uid), ctx.kinds.person))
            .collect::<Result<Vec<_>, _>>()?;
        world.venues.insert(
            uids[i],
            Venue {
                uid: uids[i],
                unit,
                sector: sectors[i].clone(),
                workers,
            },
        );
    }
    Ok(())
}

pub fn encode_station_frame(rows: &[&Station]) -> ChunkFrame {
    let mut frame = ChunkFrame::new(rows.len() as u32);
    frame.columns.insert(
        "uid".into(),
        Column::Uid(rows.iter().map(|s| s.uid).collect()),
    );
    frame.columns.insert(
        "unit".into(),
        Column::U32(rows.iter().map(|s| s.unit.0).collect()),
    );
    let commuters: Vec<Vec<EntityUid>> =
        rows.iter().map(|s| ref_list_targets(&s.commuters)).collect();
    frame.columns.insert(
        "commuters".into(),
        Column::UidList(UidListColumn::from_rows(&commuters)),
    );
    frame
}

pub fn decode_station_frame(
    frame: &ChunkFrame,
    ctx: &LoadContext<'_>,
    world: &mut World,
) -> Result<(), StoreError> {
    let g = popsim_world::kinds::STATION;
    let uids = uid_col(frame, g, "uid")?;
    let units = u32_col(frame, g, "unit")?;
    let commuters = list_col(frame, g, "commuters")?;

    for i in 0..uids.len() {
        let unit = UnitId(units[i]);
        if !ctx.owns_unit(unit)? {
            continue;
        }
        let commuters = commuters[i]
            .iter()
            .map(|&uid| ctx.decode_ref(Some(uid), ctx.kinds.person))
            .collect::<Result<Vec<_>, _>>()?;
        world.stations.insert(
            uids[i],
            Station {
                uid: uids[i],
                unit,
                commuters,
            },
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use popsim_common::DomainId;
    use popsim_world::register_core_kinds;

    fn two_domain_map() -> PartitionMap {
        PartitionMap::new(BTreeMap::from([
            (DomainId(0), vec![UnitId(0)]),
            (DomainId(1), vec![UnitId(1)]),
        ]))
        .unwrap()
    }

    fn kinds() -> CoreKinds {
        let mut registry = popsim_common::TypeRegistry::new();
        register_core_kinds(&mut registry)
    }

    fn person(uid: u64, unit: u32, household: EntityRef) -> Person {
        Person {
            uid: EntityUid(uid),
            age: 40,
            sex: Sex::Female,
            home_unit: UnitId(unit),
            household,
            workplace: EntityRef::Absent,
        }
    }

    #[test]
    fn filtered_person_decode_skips_foreign_records() {
        let a = person(1, 0, EntityRef::Absent);
        let b = person(2, 1, EntityRef::Absent);
        let frame = encode_person_frame(&[&a, &b]);

        let map = two_domain_map();
        let owners: BTreeMap<EntityUid, DomainId> =
            [(EntityUid(1), DomainId(0)), (EntityUid(2), DomainId(1))].into();
        let filter = DomainFilter::single(DomainId(0));
        let ctx = LoadContext {
            filter: &filter,
            owners: &owners,
            kinds: kinds(),
            map: &map,
        };

        let mut world = World::new();
        decode_person_frame(&frame, &ctx, &mut world).unwrap();
        assert_eq!(world.people.len(), 1);
        assert!(world.people.contains_key(&EntityUid(1)));
    }

    #[test]
    fn foreign_reference_decodes_to_stub() {
        let a = person(1, 0, EntityRef::Local(EntityUid(50)));
        let frame = encode_person_frame(&[&a]);

        let map = two_domain_map();
        let owners: BTreeMap<EntityUid, DomainId> =
            [(EntityUid(1), DomainId(0)), (EntityUid(50), DomainId(1))].into();
        let filter = DomainFilter::single(DomainId(0));
        let ctx = LoadContext {
            filter: &filter,
            owners: &owners,
            kinds: kinds(),
            map: &map,
        };

        let mut world = World::new();
        decode_person_frame(&frame, &ctx, &mut world).unwrap();
        let stub = world.people[&EntityUid(1)]
            .household
            .as_external()
            .copied()
            .unwrap();
        assert_eq!(stub.uid, EntityUid(50));
        assert_eq!(stub.domain, DomainId(1));
        assert_eq!(stub.kind, ctx.kinds.household);
    }

    #[test]
    fn unmapped_unit_is_a_stale_index() {
        let a = person(1, 7, EntityRef::Absent);
        let frame = encode_person_frame(&[&a]);

        let map = two_domain_map();
        let owners: BTreeMap<EntityUid, DomainId> = [(EntityUid(1), DomainId(0))].into();
        let filter = DomainFilter::single(DomainId(0));
        let ctx = LoadContext {
            filter: &filter,
            owners: &owners,
            kinds: kinds(),
            map: &map,
        };

        let mut world = World::new();
        let err = decode_person_frame(&frame, &ctx, &mut world).unwrap_err();
        assert!(matches!(err, StoreError::StaleIndex { unit: UnitId(7) }));
    }

    #[test]
    fn unit_frame_roundtrips_with_activity() {
        let unit = SpatialUnit {
            id: UnitId(3),
            name: "unit-0003".into(),
            weight: 12.5,
            position: GeoPoint::new(1.0, -2.0),
        };
        let activity = BTreeMap::from([(
            UnitId(3),
            UnitActivity {
                n_people: 10,
                n_workers: 4,
                n_commuters: 2,
            },
        )]);
        let frame = encode_unit_frame(&[&unit], &activity);
        let rows = decode_unit_frame(&frame).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, unit);
        assert_eq!(rows[0].1.n_commuters, 2);
    }
}
