//! # Cluster track finder
//!
//! Every hit of an included plane is projected to a reference z along the nominal beam
//! slope. Hits of the same straight track land close together there, so single-linkage
//! clustering with a fixed radius groups them:
//!
//! ```text
//! p_ref = p − slope_nominal · (z − z_ref)
//! i ~ j  ⇔  |p_ref(i) − p_ref(j)| < cluster_radius
//! ```
//!
//! A cluster becomes a candidate when it covers at least `N_included − max_skips` planes.
//! On each covered plane the hit closest to the cluster centroid is taken, a straight line
//! is fitted, and the picks are redone against that line so that the slope is corrected
//! before the final fit.
use std::collections::BTreeMap;

use itertools::Itertools;
use log::debug;
use nalgebra::Vector2;
use ordered_float::OrderedFloat;

use crate::{
    constants::{HitRef, HitRefs, Millimeter},
    geometry::PlaneRegistry,
    measurements::event::EventHits,
    params::TrackFitParams,
    track::TrackCandidate,
};

use super::{build_candidate, fit_hits, FinderKind, HitAssignment, LineFit, TrackFinder};

/// Single-linkage cluster finder.
#[derive(Debug, Clone)]
pub struct ClusterFinder {
    radius: Millimeter,
    reference_z: Option<Millimeter>,
    nominal_slope: Vector2<f64>,
    assignment: HitAssignment,
    max_skips: usize,
}

/// Hit projected to the reference z.
#[derive(Debug, Clone, Copy)]
struct Projected {
    hit: HitRef,
    position: Vector2<f64>,
}

impl ClusterFinder {
    pub fn from_params(params: &TrackFitParams) -> Self {
        ClusterFinder {
            radius: params.cluster_radius,
            reference_z: params.reference_z,
            nominal_slope: Vector2::new(params.nominal_slope[0], params.nominal_slope[1]),
            assignment: params.hit_assignment,
            max_skips: params.max_skips,
        }
    }

    fn project(&self, registry: &PlaneRegistry, event: &EventHits, z_ref: f64) -> Vec<Projected> {
        registry
            .planes()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_included())
            .flat_map(|(i, p)| {
                let shift = self.nominal_slope * (p.z() - z_ref);
                event
                    .on_plane(i)
                    .iter()
                    .enumerate()
                    .map(move |(h, m)| Projected {
                        hit: (i, h),
                        position: m.position - shift,
                    })
            })
            .collect()
    }

    /// Single-linkage clusters, as lists of indices into `points`.
    ///
    /// Clusters are ordered by their first member, members by index.
    fn link(&self, points: &[Projected]) -> Vec<Vec<usize>> {
        let mut forest = UnionFind::new(points.len());
        // Sweep along x: only pairs closer than the radius in x can be linked.
        let order: Vec<usize> = (0..points.len())
            .sorted_by_key(|&i| (OrderedFloat(points[i].position.x), i))
            .collect();
        for (k, &i) in order.iter().enumerate() {
            for &j in &order[k + 1..] {
                if points[j].position.x - points[i].position.x >= self.radius {
                    break;
                }
                if (points[j].position - points[i].position).norm() < self.radius {
                    forest.union(i, j);
                }
            }
        }

        let mut clusters: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..points.len() {
            clusters.entry(forest.find(i)).or_default().push(i);
        }
        clusters
            .into_values()
            .sorted_by_key(|members| members[0])
            .collect()
    }

    /// Closest hit of each covered plane to `target(z)`.
    fn pick_closest<F>(
        registry: &PlaneRegistry,
        event: &EventHits,
        members: &[HitRef],
        target: F,
    ) -> Vec<HitRef>
    where
        F: Fn(f64) -> Vector2<f64>,
    {
        members
            .iter()
            .copied()
            .chunk_by(|hit| hit.0)
            .into_iter()
            .filter_map(|(plane, hits)| {
                let z = registry.planes().get(plane)?.z();
                let goal = target(z);
                hits.filter_map(|hit| {
                    let m = event.measurement(hit)?;
                    Some((hit, (m.position - goal).norm()))
                })
                .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
                .map(|(hit, _)| hit)
            })
            .collect()
    }

    fn assign(
        &self,
        registry: &PlaneRegistry,
        event: &EventHits,
        members: &[HitRef],
        line: &LineFit,
        picked: &[HitRef],
    ) -> HitRefs {
        match self.assignment {
            HitAssignment::Closest => picked.iter().copied().collect(),
            HitAssignment::AllWithinRadius => members
                .iter()
                .copied()
                .filter(|&hit| {
                    picked.contains(&hit)
                        || match (event.measurement(hit), registry.planes().get(hit.0)) {
                            (Some(m), Some(p)) => (m.position - line.at(p.z())).norm() < self.radius,
                            _ => false,
                        }
                })
                .collect(),
        }
    }
}

impl TrackFinder for ClusterFinder {
    fn find_candidates(&self, registry: &PlaneRegistry, event: &EventHits) -> Vec<TrackCandidate> {
        let included = registry.included_indices();
        let Some(&first) = included.first() else {
            return Vec::new();
        };
        let z_ref = self
            .reference_z
            .unwrap_or_else(|| registry.planes()[first].z());
        let min_planes = included.len().saturating_sub(self.max_skips).max(2);

        let points = self.project(registry, event, z_ref);
        let clusters = self.link(&points);

        let mut candidates = Vec::new();
        for cluster in &clusters {
            let members: Vec<HitRef> = cluster.iter().map(|&i| points[i].hit).collect();
            let n_planes = members.iter().map(|h| h.0).dedup().count();
            if n_planes < min_planes {
                continue;
            }
            let centroid = cluster
                .iter()
                .fold(Vector2::zeros(), |acc, &i| acc + points[i].position)
                / cluster.len() as f64;

            // Pick around the centroid, then against the fitted line.
            let slope = self.nominal_slope;
            let picked = Self::pick_closest(registry, event, &members, |z| {
                centroid + slope * (z - z_ref)
            });
            let Some(first_fit) = fit_hits(registry, event, &picked) else {
                continue;
            };
            let picked = Self::pick_closest(registry, event, &members, |z| first_fit.at(z));
            let Some(line) = fit_hits(registry, event, &picked) else {
                continue;
            };

            let assigned = self.assign(registry, event, &members, &line, &picked);
            if let Some(candidate) = build_candidate(registry, event, &assigned) {
                candidates.push(candidate);
            }
        }
        debug!(
            "Cluster finder: {} hits, {} clusters, {} candidates",
            points.len(),
            clusters.len(),
            candidates.len()
        );
        candidates
    }

    fn kind(&self) -> FinderKind {
        FinderKind::Cluster
    }
}

/// Disjoint-set forest with path halving; roots are the smallest index of their set.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        UnionFind {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

#[cfg(test)]
mod test_cluster {
    use super::*;
    use crate::geometry::PlaneSpec;
    use crate::measurements::HitInput;

    fn telescope(n: usize) -> PlaneRegistry {
        let mut r = PlaneRegistry::new();
        for i in 0..n {
            r.add_plane(PlaneSpec::new(i as u32, 100.0 * i as f64, 0.005, 0.005))
                .unwrap();
        }
        r
    }

    fn fill(r: &PlaneRegistry, tracks: &[(f64, f64, f64, f64)]) -> EventHits {
        let mut event = EventHits::new(r);
        let mut id = 0;
        for &(x0, y0, tx, ty) in tracks {
            for p in r.planes() {
                let z = p.z();
                event.add_hit(r, &HitInput::new(x0 + tx * z, y0 + ty * z, z, id));
                id += 1;
            }
        }
        event
    }

    #[test]
    fn test_union_find_roots() {
        let mut uf = UnionFind::new(5);
        uf.union(3, 4);
        uf.union(4, 1);
        assert_eq!(uf.find(3), 1);
        assert_eq!(uf.find(0), 0);
    }

    #[test]
    fn test_two_separated_tracks() {
        let r = telescope(5);
        let event = fill(&r, &[(0.0, 0.0, 1e-3, 0.0), (3.0, -2.0, 0.0, 5e-4)]);
        let finder = ClusterFinder::from_params(&TrackFitParams::default());
        let cands = finder.find_candidates(&r, &event);
        assert_eq!(cands.len(), 2);
        for c in &cands {
            assert_eq!(c.hits_above(0.5).len(), 5);
        }
        // First candidate is the cluster holding the first hit
        assert!((cands[0].estimates[0].state[2] - 1e-3).abs() < 1e-9);
    }

    #[test]
    fn test_cluster_missing_planes_rejected() {
        let r = telescope(5);
        let mut event = EventHits::new(&r);
        for i in 0..3 {
            event.add_hit(&r, &HitInput::new(0.0, 0.0, 100.0 * i as f64, i));
        }
        let finder = ClusterFinder::from_params(&TrackFitParams::default());
        assert!(finder.find_candidates(&r, &event).is_empty());

        let params = TrackFitParams::builder().max_skips(2).build().unwrap();
        let finder = ClusterFinder::from_params(&params);
        assert_eq!(finder.find_candidates(&r, &event).len(), 1);
    }

    #[test]
    fn test_all_within_radius_assignment() {
        let r = telescope(4);
        let mut event = fill(&r, &[(0.0, 0.0, 0.0, 0.0)]);
        event.add_hit(&r, &HitInput::new(0.1, 0.0, 200.0, 99));

        let finder = ClusterFinder::from_params(&TrackFitParams::default());
        let closest = finder.find_candidates(&r, &event);
        assert_eq!(closest[0].hits_above(0.5).len(), 4);

        let params = TrackFitParams::builder()
            .hit_assignment(HitAssignment::AllWithinRadius)
            .build()
            .unwrap();
        let all = ClusterFinder::from_params(&params).find_candidates(&r, &event);
        assert_eq!(all[0].hits_above(0.5).len(), 5);
    }
}
