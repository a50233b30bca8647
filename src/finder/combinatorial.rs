//! # Combinatorial track finder
//!
//! Seeds are hit pairs on two included planes `a < b` chosen so that the planes before
//! `b` that the seed skips stay within `max_skips`. A seed survives when its slope lies
//! within `slope_deviation` of the nominal slope on both axes.
//!
//! Each seed grows plane by plane in increasing z. At every plane a branch is extended
//! with each hit compatible with its prediction (`χ² ≤ finder_chi2_cut`) and, while skips
//! remain, with a "no hit" continuation. The prediction uses two independent Kalman
//! filters on `(x, dx/dz)` and `(y, dy/dz)` without hit competition, which is enough to
//! gate hits; the full fit is left to the DAF.
//!
//! Finished branches are ranked by (number of hits desc, chi2 asc, hit references) and
//! accepted greedily as long as they share at most `max_shared_hits` hits with the
//! candidates already accepted.
use std::collections::HashSet;

use ahash::RandomState;
use itertools::{iproduct, Itertools};
use log::{debug, warn};
use nalgebra::{Matrix2, Vector2};
use ordered_float::OrderedFloat;

use crate::{
    constants::{HitRef, HitRefs, EPS},
    geometry::PlaneRegistry,
    measurements::event::EventHits,
    params::TrackFitParams,
    track::TrackCandidate,
};

use super::{build_candidate, FinderKind, TrackFinder};

/// Seed-and-follow finder with overlap pruning.
#[derive(Debug, Clone)]
pub struct CombinatorialFinder {
    nominal_slope: Vector2<f64>,
    slope_deviation: f64,
    chi2_cut: f64,
    max_branches: usize,
    max_shared_hits: usize,
    max_skips: usize,
}

/// `(position, slope)` estimate along one axis.
#[derive(Debug, Clone, Copy)]
struct AxisState {
    u: f64,
    t: f64,
    cov: Matrix2<f64>,
}

impl AxisState {
    /// Two-point seed: state at the second point.
    fn from_pair(u_a: f64, u_b: f64, dz: f64, var_a: f64, var_b: f64) -> Self {
        AxisState {
            u: u_b,
            t: (u_b - u_a) / dz,
            cov: Matrix2::new(
                var_b,
                var_b / dz,
                var_b / dz,
                (var_a + var_b) / (dz * dz),
            ),
        }
    }

    /// Straight-line transport; scattering is ignored at this stage.
    fn predict(&self, dz: f64) -> Self {
        let f = Matrix2::new(1.0, dz, 0.0, 1.0);
        AxisState {
            u: self.u + self.t * dz,
            t: self.t,
            cov: f * self.cov * f.transpose(),
        }
    }

    /// `(residual, residual variance)` of a measurement `m` with variance `var`.
    fn innovation(&self, m: f64, var: f64) -> (f64, f64) {
        (m - self.u, self.cov[(0, 0)] + var)
    }

    fn update(&self, m: f64, var: f64) -> Self {
        let (r, s) = self.innovation(m, var);
        let k = Vector2::new(self.cov[(0, 0)], self.cov[(1, 0)]) / s;
        let mut cov = self.cov;
        for i in 0..2 {
            for j in 0..2 {
                cov[(i, j)] -= k[i] * self.cov[(0, j)];
            }
        }
        AxisState {
            u: self.u + k[0] * r,
            t: self.t + k[1] * r,
            cov,
        }
    }
}

#[derive(Debug, Clone)]
struct Branch {
    axes: [AxisState; 2],
    z: f64,
    hits: HitRefs,
    chi2: f64,
    skipped: usize,
}

impl Branch {
    fn rank_key(&self) -> (std::cmp::Reverse<usize>, OrderedFloat<f64>) {
        (std::cmp::Reverse(self.hits.len()), OrderedFloat(self.chi2))
    }
}

impl CombinatorialFinder {
    pub fn from_params(params: &TrackFitParams) -> Self {
        CombinatorialFinder {
            nominal_slope: Vector2::new(params.nominal_slope[0], params.nominal_slope[1]),
            slope_deviation: params.slope_deviation,
            chi2_cut: params.finder_chi2_cut,
            max_branches: params.max_branches,
            max_shared_hits: params.max_shared_hits,
            max_skips: params.max_skips,
        }
    }

    /// Seed plane pairs, as positions in the included-plane list.
    ///
    /// The seed skips the `a` planes before `a` and the `b − a − 1` planes between them.
    fn seed_pairs(&self, n_included: usize) -> Vec<(usize, usize)> {
        (0..n_included)
            .tuple_combinations()
            .filter(|&(a, b)| a + (b - a - 1) <= self.max_skips)
            .collect()
    }

    fn seed(
        &self,
        registry: &PlaneRegistry,
        event: &EventHits,
        pa: usize,
        pb: usize,
        skipped: usize,
    ) -> Vec<Branch> {
        let planes = registry.planes();
        let (plane_a, plane_b) = (&planes[pa], &planes[pb]);
        let dz = plane_b.z() - plane_a.z();
        if !(dz.abs() > EPS) {
            return Vec::new();
        }
        let (vax, vay) = plane_a.variances();
        let (vbx, vby) = plane_b.variances();

        iproduct!(
            event.on_plane(pa).iter().enumerate(),
            event.on_plane(pb).iter().enumerate()
        )
        .filter_map(|((ha, ma), (hb, mb))| {
            let slope = (mb.position - ma.position) / dz;
            let deviation = (slope - self.nominal_slope).abs();
            // NaN slopes fail the gate
            if !(deviation.x <= self.slope_deviation && deviation.y <= self.slope_deviation) {
                return None;
            }
            let mut hits = HitRefs::new();
            hits.push((pa, ha));
            hits.push((pb, hb));
            Some(Branch {
                axes: [
                    AxisState::from_pair(ma.position.x, mb.position.x, dz, vax, vbx),
                    AxisState::from_pair(ma.position.y, mb.position.y, dz, vay, vby),
                ],
                z: plane_b.z(),
                hits,
                chi2: 0.0,
                skipped,
            })
        })
        .collect()
    }

    /// Follow the branches of one seed through the remaining planes.
    fn follow(
        &self,
        registry: &PlaneRegistry,
        event: &EventHits,
        mut branches: Vec<Branch>,
        remaining: &[usize],
    ) -> Vec<Branch> {
        let mut truncated = false;
        for &p in remaining {
            let plane = &registry.planes()[p];
            let (vx, vy) = plane.variances();
            let hits = event.on_plane(p);

            let mut next = Vec::with_capacity(branches.len());
            for branch in &branches {
                let dz = plane.z() - branch.z;
                let pred = [
                    branch.axes[0].predict(dz),
                    branch.axes[1].predict(dz),
                ];
                for (h, m) in hits.iter().enumerate() {
                    let (rx, sx) = pred[0].innovation(m.position.x, vx);
                    let (ry, sy) = pred[1].innovation(m.position.y, vy);
                    let chi2 = rx * rx / sx + ry * ry / sy;
                    if !(chi2 <= self.chi2_cut) {
                        continue;
                    }
                    let mut child_hits = branch.hits.clone();
                    child_hits.push((p, h));
                    next.push(Branch {
                        axes: [pred[0].update(m.position.x, vx), pred[1].update(m.position.y, vy)],
                        z: plane.z(),
                        hits: child_hits,
                        chi2: branch.chi2 + chi2,
                        skipped: branch.skipped,
                    });
                }
                if branch.skipped < self.max_skips {
                    next.push(Branch {
                        axes: pred,
                        z: plane.z(),
                        hits: branch.hits.clone(),
                        chi2: branch.chi2,
                        skipped: branch.skipped + 1,
                    });
                }
            }

            if next.len() > self.max_branches {
                truncated = true;
                next.sort_by_key(Branch::rank_key);
                next.truncate(self.max_branches);
            }
            branches = next;
            if branches.is_empty() {
                break;
            }
        }
        if truncated {
            warn!(
                "Combinatorial finder: branch limit {} reached, keeping the best branches",
                self.max_branches
            );
        }
        branches
    }

    /// Greedy overlap pruning over ranked branches.
    fn prune(&self, mut finished: Vec<Branch>) -> Vec<HitRefs> {
        for b in &mut finished {
            b.hits.sort_unstable();
        }
        finished.sort_by(|a, b| {
            a.rank_key()
                .cmp(&b.rank_key())
                .then_with(|| a.hits.cmp(&b.hits))
        });

        let mut used: HashSet<HitRef, RandomState> = HashSet::default();
        let mut accepted = Vec::new();
        for branch in finished {
            let shared = branch.hits.iter().filter(|h| used.contains(*h)).count();
            if shared > self.max_shared_hits || shared == branch.hits.len() {
                continue;
            }
            used.extend(branch.hits.iter().copied());
            accepted.push(branch.hits);
        }
        accepted
    }
}

impl TrackFinder for CombinatorialFinder {
    fn find_candidates(&self, registry: &PlaneRegistry, event: &EventHits) -> Vec<TrackCandidate> {
        let included = registry.included_indices();
        let min_hits = included.len().saturating_sub(self.max_skips).max(2);

        let mut finished = Vec::new();
        let mut n_seeds = 0;
        for (a, b) in self.seed_pairs(included.len()) {
            let seeds = self.seed(registry, event, included[a], included[b], b - 1);
            n_seeds += seeds.len();
            if seeds.is_empty() {
                continue;
            }
            let grown = self.follow(registry, event, seeds, &included[b + 1..]);
            finished.extend(grown.into_iter().filter(|br| br.hits.len() >= min_hits));
        }
        let n_finished = finished.len();

        let candidates: Vec<TrackCandidate> = self
            .prune(finished)
            .iter()
            .filter_map(|hits| build_candidate(registry, event, hits))
            .collect();
        debug!(
            "Combinatorial finder: {n_seeds} seeds, {n_finished} finished branches, {} candidates",
            candidates.len()
        );
        candidates
    }

    fn kind(&self) -> FinderKind {
        FinderKind::Combinatorial
    }
}

#[cfg(test)]
mod test_combinatorial {
    use super::*;
    use crate::geometry::PlaneSpec;
    use crate::measurements::HitInput;
    use approx::assert_relative_eq;

    fn telescope(n: usize) -> PlaneRegistry {
        let mut r = PlaneRegistry::new();
        for i in 0..n {
            r.add_plane(PlaneSpec::new(i as u32, 100.0 * i as f64, 0.005, 0.005))
                .unwrap();
        }
        r
    }

    #[test]
    fn test_seed_pairs() {
        let finder = CombinatorialFinder::from_params(&TrackFitParams::default());
        assert_eq!(finder.seed_pairs(4), vec![(0, 1)]);
        let params = TrackFitParams::builder().max_skips(1).build().unwrap();
        let finder = CombinatorialFinder::from_params(&params);
        assert_eq!(finder.seed_pairs(4), vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn test_axis_update_matches_measurement() {
        let s = AxisState::from_pair(0.0, 0.1, 100.0, 2.5e-5, 2.5e-5);
        assert_relative_eq!(s.t, 1e-3, epsilon = 1e-12);
        let p = s.predict(100.0);
        assert_relative_eq!(p.u, 0.2, epsilon = 1e-12);
        let u = p.update(0.2, 2.5e-5);
        assert_relative_eq!(u.u, 0.2, epsilon = 1e-12);
        assert!(u.cov[(0, 0)] < p.cov[(0, 0)]);
    }

    #[test]
    fn test_single_track_with_noise_hit() {
        let r = telescope(5);
        let mut event = EventHits::new(&r);
        for (i, p) in r.planes().iter().enumerate() {
            let z = p.z();
            event.add_hit(&r, &HitInput::new(1e-3 * z, -5e-4 * z, z, i as u64));
        }
        event.add_hit(&r, &HitInput::new(2.0, 2.0, 200.0, 99));

        let finder = CombinatorialFinder::from_params(&TrackFitParams::default());
        let cands = finder.find_candidates(&r, &event);
        assert_eq!(cands.len(), 1);
        let hits = cands[0].hits_above(0.5);
        assert_eq!(hits.len(), 5);
        assert!(!hits.contains(&(2, 1)));
    }

    #[test]
    fn test_steep_seed_rejected() {
        let r = telescope(3);
        let mut event = EventHits::new(&r);
        for p in r.planes() {
            let z = p.z();
            event.add_hit(&r, &HitInput::new(0.05 * z, 0.0, z, 0));
        }
        let finder = CombinatorialFinder::from_params(&TrackFitParams::default());
        assert!(finder.find_candidates(&r, &event).is_empty());
    }

    #[test]
    fn test_skip_allows_missing_plane() {
        let r = telescope(5);
        let mut event = EventHits::new(&r);
        for p in r.planes().iter().filter(|p| p.z() != 200.0) {
            event.add_hit(&r, &HitInput::new(0.0, 0.0, p.z(), 0));
        }
        let finder = CombinatorialFinder::from_params(&TrackFitParams::default());
        assert!(finder.find_candidates(&r, &event).is_empty());

        let params = TrackFitParams::builder().max_skips(1).build().unwrap();
        let cands = CombinatorialFinder::from_params(&params).find_candidates(&r, &event);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].hits_above(0.5).len(), 4);
    }

    #[test]
    fn test_prune_shared_hits() {
        let finder = CombinatorialFinder::from_params(&TrackFitParams::default());
        let state = AxisState::from_pair(0.0, 0.0, 1.0, 1.0, 1.0);
        let branch = |hits: &[HitRef], chi2: f64| Branch {
            axes: [state, state],
            z: 0.0,
            hits: hits.iter().copied().collect(),
            chi2,
            skipped: 0,
        };
        let accepted = finder.prune(vec![
            branch(&[(0, 0), (1, 1), (2, 0)], 3.0),
            branch(&[(0, 0), (1, 0), (2, 0)], 1.0),
            branch(&[(0, 1), (1, 2), (2, 1)], 2.0),
        ]);
        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[0].as_slice(), &[(0, 0), (1, 0), (2, 0)]);
        assert_eq!(accepted[1].as_slice(), &[(0, 1), (1, 2), (2, 1)]);
    }
}
