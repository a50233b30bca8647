//! # Synthetic events
//!
//! Straight beam tracks through a registered telescope, with optional Gaussian smearing
//! of the hits by the plane resolution, Gaussian multiple-scattering kicks at every plane,
//! plane inefficiency and uniform noise hits. All randomness comes from the caller's RNG,
//! so a seeded `StdRng` reproduces an event exactly.
//!
//! ```rust
//! use rand::{rngs::StdRng, SeedableRng};
//! use trackfit::geometry::{PlaneRegistry, PlaneSpec};
//! use trackfit::simulation::{EventGenerator, StraightTrack};
//!
//! let mut registry = PlaneRegistry::new();
//! for i in 0..6 {
//!     registry.add_plane(PlaneSpec::new(i, 100.0 * i as f64, 0.005, 0.005)).unwrap();
//! }
//! let mut rng = StdRng::seed_from_u64(42);
//! let event = EventGenerator::new()
//!     .noise_hits_per_plane(2)
//!     .generate(&registry, &[StraightTrack::new(0.0, 0.0, 1e-3, 5e-4)], &mut rng)
//!     .unwrap();
//! assert_eq!(event.hits.len(), 6 + 12);
//! ```
use nalgebra::Vector2;
use rand::Rng;
use rand_distr::{Distribution, Normal, StandardNormal};

use crate::{
    constants::{HitId, Millimeter},
    geometry::PlaneRegistry,
    measurements::HitInput,
    trackfit_errors::TrackFitError,
};

/// Straight track `p(z) = origin + slope · z`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StraightTrack {
    pub origin: Vector2<f64>,
    pub slope: Vector2<f64>,
}

impl StraightTrack {
    pub fn new(x0: Millimeter, y0: Millimeter, tx: f64, ty: f64) -> Self {
        StraightTrack {
            origin: Vector2::new(x0, y0),
            slope: Vector2::new(tx, ty),
        }
    }

    /// Exact intersection with the plane at `z`.
    pub fn at(&self, z: Millimeter) -> Vector2<f64> {
        self.origin + self.slope * z
    }
}

/// Hits of one synthetic event and the identifiers produced by each track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulatedEvent {
    pub hits: Vec<HitInput>,
    /// `truth[k]` lists the hit ids of track `k`, in plane order.
    pub truth: Vec<Vec<HitId>>,
}

/// Synthetic event generator.
#[derive(Debug, Clone, PartialEq)]
pub struct EventGenerator {
    smearing: bool,
    scattering: bool,
    efficiency: f64,
    noise_hits_per_plane: usize,
    noise_half_width: Millimeter,
}

impl Default for EventGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl EventGenerator {
    /// Perfect detector: no smearing, no scattering, full efficiency, no noise.
    pub fn new() -> Self {
        EventGenerator {
            smearing: false,
            scattering: false,
            efficiency: 1.0,
            noise_hits_per_plane: 0,
            noise_half_width: 5.0,
        }
    }

    /// Smear hits with the plane resolution.
    pub fn with_smearing(mut self, on: bool) -> Self {
        self.smearing = on;
        self
    }

    /// Apply scattering kicks drawn from each plane scattering variance.
    pub fn with_scattering(mut self, on: bool) -> Self {
        self.scattering = on;
        self
    }

    /// Probability that a track leaves a hit on a plane.
    pub fn efficiency(mut self, efficiency: f64) -> Self {
        self.efficiency = efficiency.clamp(0.0, 1.0);
        self
    }

    pub fn noise_hits_per_plane(mut self, n: usize) -> Self {
        self.noise_hits_per_plane = n;
        self
    }

    /// Noise hits are uniform in `[-w, w]²`.
    pub fn noise_half_width(mut self, w: Millimeter) -> Self {
        self.noise_half_width = w.abs();
        self
    }

    /// Generate one event.
    ///
    /// Arguments
    /// -----------------
    /// * `registry` – telescope geometry; hits are produced at the aligned plane z.
    /// * `tracks` – true tracks, given at z = 0.
    /// * `rng` – random source.
    ///
    /// Return
    /// ----------
    /// * Track hits (track by track, in plane order) followed by noise hits (plane by
    ///   plane), with consecutive identifiers starting at 0.
    pub fn generate(
        &self,
        registry: &PlaneRegistry,
        tracks: &[StraightTrack],
        rng: &mut impl Rng,
    ) -> Result<SimulatedEvent, TrackFitError> {
        let mut event = SimulatedEvent::default();
        let mut next_id: HitId = 0;

        for track in tracks {
            let mut ids = Vec::with_capacity(registry.len());
            let mut z = 0.0;
            let mut position = track.origin;
            let mut slope = track.slope;
            for plane in registry.planes() {
                position += slope * (plane.z() - z);
                z = plane.z();

                if rng.random::<f64>() < self.efficiency {
                    let mut hit = position;
                    if self.smearing {
                        let sx: f64 = rng.sample(StandardNormal);
                        let sy: f64 = rng.sample(StandardNormal);
                        hit += Vector2::new(sx * plane.sigma_x(), sy * plane.sigma_y());
                    }
                    event.hits.push(HitInput::new(hit.x, hit.y, z, next_id));
                    ids.push(next_id);
                    next_id += 1;
                }

                if self.scattering && plane.scatter_variance() > 0.0 {
                    let kick = Normal::new(0.0, plane.scatter_variance().sqrt())?;
                    slope += Vector2::new(kick.sample(rng), kick.sample(rng));
                }
            }
            event.truth.push(ids);
        }

        if self.noise_hits_per_plane > 0 && self.noise_half_width > 0.0 {
            let w = self.noise_half_width;
            for plane in registry.planes() {
                for _ in 0..self.noise_hits_per_plane {
                    let x = rng.random_range(-w..w);
                    let y = rng.random_range(-w..w);
                    event.hits.push(HitInput::new(x, y, plane.z(), next_id));
                    next_id += 1;
                }
            }
        }
        Ok(event)
    }
}
