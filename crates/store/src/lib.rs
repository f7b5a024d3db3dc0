//! Partition-aware persistence: a chunked columnar store with an embedded
//! membership index, so each rank can load just the domains it owns.
//!
//! # Invariants
//! - Chunk files are write-once; the sha256 manifest chains them in append
//!   order and verification fails closed.
//! - `partition.json` is rewritable (repartitioning) and sits outside the
//!   hash chain.
//! - A filtered load materializes an entity exactly once, on the rank that
//!   owns its unit's domain.

mod column;
mod container;
mod records;
mod world_store;

pub use column::{Column, UidListColumn};
pub use container::{
    ChunkFrame, GroupMeta, IntegrityManifest, ManifestEntry, STORE_SCHEMA_VERSION, StoreContainer,
    StoreError, StoreMeta,
};
pub use records::{LoadContext, UNIT_GROUP};
pub use world_store::{OwnerDirectory, load_world, read_units, save_world};

pub fn crate_info() -> &'static str {
    "popsim-store v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("store"));
    }
}
