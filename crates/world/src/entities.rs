use popsim_common::{DomainId, EntityUid, TypeRegistry, TypeTag, UnitId};
use serde::{Deserialize, Serialize};

/// Canonical entity type names, interned through the caller's
/// [`TypeRegistry`].
pub mod kinds {
    pub const PERSON: &str = "person";
    pub const HOUSEHOLD: &str = "household";
    pub const VENUE: &str = "venue";
    pub const STATION: &str = "station";
}

/// The interned tags for the core entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreKinds {
    pub person: TypeTag,
    pub household: TypeTag,
    pub venue: TypeTag,
    pub station: TypeTag,
}

pub fn register_core_kinds(registry: &mut TypeRegistry) -> CoreKinds {
    CoreKinds {
        person: registry.register(kinds::PERSON),
        household: registry.register(kinds::HOUSEHOLD),
        venue: registry.register(kinds::VENUE),
        station: registry.register(kinds::STATION),
    }
}

/// Placeholder for an entity owned by another domain.
///
/// Carries nothing beyond id, owner domain and type; it exists for
/// cross-rank message routing and is never dereferenced for attributes.
/// Equality and ordering are by id alone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExternalStub {
    pub uid: EntityUid,
    pub domain: DomainId,
    pub kind: TypeTag,
}

impl PartialEq for ExternalStub {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl Eq for ExternalStub {}

impl PartialOrd for ExternalStub {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExternalStub {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.uid.cmp(&other.uid)
    }
}

impl std::hash::Hash for ExternalStub {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uid.hash(state);
    }
}

/// A foreign-key slot. Freshly loaded slots are `Raw`; the resolve pass
/// leaves every slot as exactly one of `Local`, `External` or `Absent`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EntityRef {
    /// Bare id, not yet hydrated.
    Raw(EntityUid),
    /// Target lives in this rank's arena.
    Local(EntityUid),
    /// Target is owned by another domain.
    External(ExternalStub),
    /// Explicit "no reference".
    Absent,
}

impl EntityRef {
    pub fn uid(&self) -> Option<EntityUid> {
        match self {
            EntityRef::Raw(uid) | EntityRef::Local(uid) => Some(*uid),
            EntityRef::External(stub) => Some(stub.uid),
            EntityRef::Absent => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, EntityRef::Raw(_))
    }

    pub fn as_local(&self) -> Option<EntityUid> {
        match self {
            EntityRef::Local(uid) => Some(*uid),
            _ => None,
        }
    }

    pub fn as_external(&self) -> Option<&ExternalStub> {
        match self {
            EntityRef::External(stub) => Some(stub),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    Female,
    Male,
}

impl Sex {
    pub fn as_str(self) -> &'static str {
        match self {
            Sex::Female => "f",
            Sex::Male => "m",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "f" => Some(Sex::Female),
            "m" => Some(Sex::Male),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HouseholdKind {
    Family,
    Student,
    Communal,
    Other,
}

impl HouseholdKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HouseholdKind::Family => "family",
            HouseholdKind::Student => "student",
            HouseholdKind::Communal => "communal",
            HouseholdKind::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "family" => Some(HouseholdKind::Family),
            "student" => Some(HouseholdKind::Student),
            "communal" => Some(HouseholdKind::Communal),
            "other" => Some(HouseholdKind::Other),
            _ => None,
        }
    }
}

/// A resident. Owned by the domain of their home unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub uid: EntityUid,
    pub age: u32,
    pub sex: Sex,
    pub home_unit: UnitId,
    pub household: EntityRef,
    /// Optional: not everyone works.
    pub workplace: EntityRef,
}

/// A residence; back-references its residents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Household {
    pub uid: EntityUid,
    pub unit: UnitId,
    pub kind: HouseholdKind,
    pub max_size: u32,
    pub residents: Vec<EntityRef>,
}

/// A workplace. Workers may commute in from other domains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub uid: EntityUid,
    pub unit: UnitId,
    pub sector: String,
    pub workers: Vec<EntityRef>,
}

/// A commute hub with a variable-length commuter list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub uid: EntityUid,
    pub unit: UnitId,
    pub commuters: Vec<EntityRef>,
}
