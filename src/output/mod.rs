//! # Output adaptation
//!
//! Accepted candidates are converted to geometry-agnostic [`TrackRecord`]s (sensor ids and
//! plane z instead of registry indices, hit identifiers instead of event indices) and
//! handed, one at a time, to a [`TrackSink`].
//!
//! Provided sinks:
//!
//! * `Vec<TrackRecord>` – in-memory collection,
//! * [`CsvTrackWriter`](csv_writer::CsvTrackWriter) – one CSV row per track and plane.
pub mod csv_writer;

use serde::{Deserialize, Serialize};

use crate::{
    constants::{HitId, Millimeter, SensorId, STATE_DIM},
    geometry::PlaneRegistry,
    measurements::event::EventHits,
    track::{flatten_covariance, TrackCandidate},
    trackfit_errors::TrackFitError,
};

/// Smoothed state of an accepted track at one plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaneStateRecord {
    pub sensor_id: SensorId,
    pub z: Millimeter,
    /// `(x, y, dx/dz, dy/dz)`
    pub state: [f64; STATE_DIM],
    /// Row-major 4×4 covariance.
    pub covariance: [f64; STATE_DIM * STATE_DIM],
    /// Summed hit weight of the plane (0 for excluded planes).
    pub weight: f64,
    pub best_hit: Option<HitId>,
    pub best_hit_weight: f64,
    /// Every hit of the plane with its final weight, in event order.
    pub hits: Vec<(HitId, f64)>,
}

impl PlaneStateRecord {
    pub fn sigmas(&self) -> [f64; STATE_DIM] {
        std::array::from_fn(|i| self.covariance[i * STATE_DIM + i].sqrt())
    }
}

/// Persisted form of an accepted track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub event: u64,
    pub track: usize,
    pub chi2: f64,
    pub ndof: f64,
    pub planes: Vec<PlaneStateRecord>,
}

impl TrackRecord {
    /// Convert an accepted candidate.
    ///
    /// Arguments
    /// -----------------
    /// * `event` – event number.
    /// * `track` – index of the track within the event.
    /// * `registry` – geometry the candidate was fitted on.
    /// * `hits` – event measurements, to resolve hit identifiers.
    /// * `candidate` – fitted candidate.
    pub fn from_candidate(
        event: u64,
        track: usize,
        registry: &PlaneRegistry,
        hits: &EventHits,
        candidate: &TrackCandidate,
    ) -> Self {
        let planes = registry
            .planes()
            .iter()
            .zip(&candidate.estimates)
            .enumerate()
            .map(|(i, (plane, estimate))| {
                let best = candidate.best_hit(i);
                PlaneStateRecord {
                    sensor_id: plane.sensor_id(),
                    z: estimate.z,
                    state: std::array::from_fn(|k| estimate.state[k]),
                    covariance: flatten_covariance(&estimate.covariance),
                    weight: candidate.plane_weight(i),
                    best_hit: best
                        .and_then(|(h, _)| hits.measurement((i, h)))
                        .map(|m| m.origin),
                    best_hit_weight: best.map(|(_, w)| w).unwrap_or(0.0),
                    hits: hits
                        .on_plane(i)
                        .iter()
                        .zip(candidate.weights.get(i).into_iter().flatten())
                        .map(|(m, &w)| (m.origin, w))
                        .collect(),
                }
            })
            .collect();
        TrackRecord {
            event,
            track,
            chi2: candidate.chi2,
            ndof: candidate.ndof,
            planes,
        }
    }

    pub fn chi2_ndof(&self) -> f64 {
        self.chi2 / self.ndof
    }
}

/// Consumer of accepted tracks.
pub trait TrackSink {
    fn consume(&mut self, record: TrackRecord) -> Result<(), TrackFitError>;

    /// Called once the last track of the run has been consumed.
    fn finish(&mut self) -> Result<(), TrackFitError> {
        Ok(())
    }
}

impl TrackSink for Vec<TrackRecord> {
    fn consume(&mut self, record: TrackRecord) -> Result<(), TrackFitError> {
        self.push(record);
        Ok(())
    }
}
