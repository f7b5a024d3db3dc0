//! Shared types for the popsim core: stable ids, geographic coordinates,
//! the uid allocator and the entity type registry.
//!
//! # Invariants
//! - `EntityUid` values are process-wide unique; `ABSENT_UID` is reserved
//!   and never allocated.
//! - `TypeRegistry` is caller-owned state, never a module-level singleton.

mod registry;
mod types;

pub use registry::{TypeRegistry, TypeTag};
pub use types::{ABSENT_UID, DomainId, EntityUid, GeoPoint, SpatialUnit, UidAllocator, UnitId};

pub fn crate_info() -> &'static str {
    "popsim-common v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("common"));
    }
}
