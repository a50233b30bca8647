//! # Per-event hit storage
//!
//! [`EventHits`] is the event-scoped half of the run context: one measurement list per
//! registered plane, indexed like the [`PlaneRegistry`]. It is cleared at the start of
//! every event and filled from the hit-collection collaborator. Geometry is only read.
//!
//! Measurements of excluded planes are kept (they belong to the event) but
//! [`EventHits::measurements`] refuses to hand them out, and the finders and the fitter
//! only walk included planes.
use log::warn;

use crate::{
    constants::{HitId, HitRef, Millimeter},
    geometry::PlaneRegistry,
    measurements::{HitInput, Measurement},
    trackfit_errors::TrackFitError,
};

/// Measurements of one event, one list per plane.
#[derive(Debug, Clone, Default)]
pub struct EventHits {
    per_plane: Vec<Vec<Measurement>>,
    dropped: usize,
}

impl EventHits {
    /// Create an empty event scope sized for `registry`.
    pub fn new(registry: &PlaneRegistry) -> Self {
        EventHits {
            per_plane: vec![Vec::new(); registry.len()],
            dropped: 0,
        }
    }

    /// Drop every measurement of the previous event.
    ///
    /// Must be called once per event, before any measurement is added. The per-plane
    /// allocations are kept.
    pub fn clear(&mut self) {
        for hits in &mut self.per_plane {
            hits.clear();
        }
        self.dropped = 0;
    }

    /// Append a hit to the measurement list of plane `plane_index`.
    ///
    /// The hit is rejected when its position is not finite or its `z` is not within the
    /// registry tolerance of the plane z. Rejected hits are logged and counted in
    /// [`EventHits::dropped`], like in [`add_hit`](EventHits::add_hit).
    ///
    /// Arguments
    /// -----------------
    /// * `registry` – geometry the event was created for.
    /// * `plane_index` – target plane (z order).
    /// * `x`, `y`, `z` – hit position (mm).
    /// * `origin` – identifier of the originating hit.
    ///
    /// Return
    /// ----------
    /// * The index of the measurement within the plane list, or
    ///   [`TrackFitError::UnmatchedMeasurement`] / [`TrackFitError::NonFiniteMeasurement`] /
    ///   [`TrackFitError::PlaneIndexOutOfRange`].
    pub fn add_measurement(
        &mut self,
        registry: &PlaneRegistry,
        plane_index: usize,
        x: Millimeter,
        y: Millimeter,
        z: Millimeter,
        origin: HitId,
    ) -> Result<usize, TrackFitError> {
        let m = Measurement::new(x, y, z, origin);
        let res = Self::check(registry, plane_index, &m).and_then(|()| self.push(plane_index, m));
        if let Err(err) = &res {
            warn!("Dropping hit {origin}: {err}");
            self.dropped += 1;
        }
        res
    }

    fn check(
        registry: &PlaneRegistry,
        plane_index: usize,
        m: &Measurement,
    ) -> Result<(), TrackFitError> {
        let plane = registry.plane(plane_index)?;
        if !m.position.iter().all(|v| v.is_finite()) {
            return Err(TrackFitError::NonFiniteMeasurement(m.origin));
        }
        if !((plane.z() - m.z).abs() <= registry.z_tolerance()) {
            return Err(TrackFitError::UnmatchedMeasurement(m.z));
        }
        Ok(())
    }

    /// Resolve the plane of `hit` from its z and store it.
    ///
    /// Hits with a non-finite position or matching no plane are dropped with a warning
    /// and counted in [`EventHits::dropped`]; this is not fatal for the event.
    pub fn add_hit(&mut self, registry: &PlaneRegistry, hit: &HitInput) -> Option<HitRef> {
        if !(hit.x.is_finite() && hit.y.is_finite()) {
            warn!("Dropping hit {}: non-finite position", hit.origin);
            self.dropped += 1;
            return None;
        }
        let Some(plane_index) = registry.plane_at_z(hit.z) else {
            warn!(
                "Dropping hit {} at z = {:.3} mm: no plane within {:.3} mm",
                hit.origin,
                hit.z,
                registry.z_tolerance()
            );
            self.dropped += 1;
            return None;
        };
        let idx = self.push(plane_index, Measurement::from(hit)).ok()?;
        Some((plane_index, idx))
    }

    /// Store `m` without any check.
    pub(crate) fn push(&mut self, plane: usize, m: Measurement) -> Result<usize, TrackFitError> {
        let hits = self
            .per_plane
            .get_mut(plane)
            .ok_or(TrackFitError::PlaneIndexOutOfRange(plane))?;
        hits.push(m);
        Ok(hits.len() - 1)
    }

    /// Measurements of an included plane.
    pub fn measurements(
        &self,
        registry: &PlaneRegistry,
        plane_index: usize,
    ) -> Result<&[Measurement], TrackFitError> {
        let plane = registry.plane(plane_index)?;
        if plane.is_excluded() {
            return Err(TrackFitError::ExcludedPlane(plane.sensor_id()));
        }
        Ok(self.on_plane(plane_index))
    }

    /// Measurements stored for `plane_index` regardless of the plane role.
    ///
    /// Callers are responsible for skipping excluded planes.
    pub(crate) fn on_plane(&self, plane_index: usize) -> &[Measurement] {
        self.per_plane
            .get(plane_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn measurement(&self, hit: HitRef) -> Option<&Measurement> {
        self.per_plane.get(hit.0).and_then(|hits| hits.get(hit.1))
    }

    /// Number of hits dropped since the last [`clear`](EventHits::clear).
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Total number of stored measurements.
    pub fn len(&self) -> usize {
        self.per_plane.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.per_plane.iter().all(Vec::is_empty)
    }

    /// Number of included planes carrying at least one measurement.
    pub fn planes_with_hits(&self, registry: &PlaneRegistry) -> usize {
        registry
            .planes()
            .iter()
            .zip(&self.per_plane)
            .filter(|(p, hits)| p.is_included() && !hits.is_empty())
            .count()
    }
}
