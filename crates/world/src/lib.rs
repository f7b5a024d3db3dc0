//! The in-memory entity model: flat id-indexed collections, external stubs
//! for entities owned by other domains, and the second-pass reference
//! resolver that hydrates raw ids after a load.
//!
//! # Invariants
//! - References are ids, not live pointers; collections are `BTreeMap`s so
//!   iteration order is deterministic.
//! - After a successful resolve pass, no `EntityRef::Raw` remains anywhere.

mod builder;
mod entities;
mod resolve;
mod world;

pub use builder::{BuildParams, WorldBuilder};
pub use entities::{
    CoreKinds, EntityRef, ExternalStub, Household, HouseholdKind, Person, Sex, Station, Venue,
    kinds, register_core_kinds,
};
pub use resolve::{DomainFilter, OwnerLookup, ResolveError, resolve_world};
pub use world::{RefCensus, World};

pub fn crate_info() -> &'static str {
    "popsim-world v0.1.0"
}
