#![allow(dead_code)]

use trackfit::constants::UM;
use trackfit::geometry::{PlaneRegistry, PlaneSpec};
use trackfit::measurements::{event::EventHits, HitInput};
use trackfit::track::TrackCandidate;

pub const TRUE_SLOPE: (f64, f64) = (0.001, 0.0005);

/// Six planes at z = 0, 100, …, 500 mm with 5 µm resolution.
pub fn six_plane_telescope(excluded: &[u32]) -> PlaneRegistry {
    let mut registry = PlaneRegistry::new();
    for id in 0..6u32 {
        let spec = PlaneSpec::new(id, 100.0 * id as f64, 5.0 * UM, 5.0 * UM)
            .excluded(excluded.contains(&id));
        registry.add_plane(spec).unwrap();
    }
    registry
}

/// Exact intersections of the reference track, hit id = plane index.
pub fn true_hits(registry: &PlaneRegistry) -> Vec<HitInput> {
    registry
        .planes()
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let z = p.z();
            HitInput::new(TRUE_SLOPE.0 * z, TRUE_SLOPE.1 * z, z, i as u64)
        })
        .collect()
}

/// Index of the measurement with identifier `origin` on `plane`.
pub fn hit_index(event: &EventHits, plane: usize, origin: u64) -> usize {
    (0..)
        .map_while(|h| event.measurement((plane, h)).map(|m| (h, m.origin)))
        .find(|&(_, id)| id == origin)
        .map(|(h, _)| h)
        .unwrap()
}

/// Every hit weight lies in [0, 1] and each plane leaves a non-negative no-hit weight.
pub fn assert_weights_normalised(candidate: &TrackCandidate) {
    for (plane, row) in candidate.weights.iter().enumerate() {
        assert!(row.iter().all(|w| (0.0..=1.0).contains(w)));
        assert!(candidate.no_hit_weight(plane) >= -1e-12);
    }
}
