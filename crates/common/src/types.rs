use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Stable identifier of a spatial unit (the indivisible geographic block).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub u32);

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unit:{}", self.0)
    }
}

/// Identifier of a domain (one compute rank's share of the world), in `[0, N)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainId(pub u32);

impl std::fmt::Display for DomainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "domain:{}", self.0)
    }
}

/// Process-wide unique 64-bit entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityUid(pub u64);

impl std::fmt::Display for EntityUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "uid:{}", self.0)
    }
}

/// Reserved sentinel meaning "no reference" in persisted optional
/// foreign-key columns. Never handed out by [`UidAllocator`].
pub const ABSENT_UID: EntityUid = EntityUid(u64::MAX);

/// Monotone allocator for [`EntityUid`] values.
///
/// Owned by the world builder and passed explicitly; there is no global
/// counter behind it.
#[derive(Debug, Default)]
pub struct UidAllocator {
    next: u64,
}

impl UidAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume allocation above ids already present in a loaded world.
    pub fn starting_at(next: u64) -> Self {
        Self { next }
    }

    pub fn allocate(&mut self) -> EntityUid {
        debug_assert!(self.next < ABSENT_UID.0);
        let uid = EntityUid(self.next);
        self.next += 1;
        uid
    }
}

/// Geographic coordinate (latitude, longitude) treated as planar for
/// centroid math.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn to_dvec2(self) -> DVec2 {
        DVec2::new(self.lat, self.lon)
    }

    /// Squared Euclidean distance; enough for nearest-centroid ordering.
    pub fn distance2(self, other: GeoPoint) -> f64 {
        self.to_dvec2().distance_squared(other.to_dvec2())
    }
}

/// A spatial unit as seen by the balancer: immutable for the duration of
/// one partitioning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialUnit {
    pub id: UnitId,
    pub name: String,
    /// Scalar workload weight produced by the weight aggregator.
    pub weight: f64,
    pub position: GeoPoint,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_allocator_is_monotone() {
        let mut alloc = UidAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        assert!(a < b);
        assert_ne!(a, ABSENT_UID);
    }

    #[test]
    fn uid_allocator_resumes() {
        let mut alloc = UidAllocator::starting_at(100);
        assert_eq!(alloc.allocate(), EntityUid(100));
    }

    #[test]
    fn geo_point_distance() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(3.0, 4.0);
        assert_eq!(a.distance2(b), 25.0);
    }

    #[test]
    fn id_display_names_the_kind() {
        assert_eq!(UnitId(3).to_string(), "unit:3");
        assert_eq!(DomainId(0).to_string(), "domain:0");
        assert_eq!(EntityUid(7).to_string(), "uid:7");
    }
}
