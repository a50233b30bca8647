//! # TrackFit: per-run context and event driver
//!
//! [`TrackFit`] owns everything that lives for a run:
//!
//! 1. the frozen [`PlaneRegistry`] (geometry, read only once handed over),
//! 2. the validated [`TrackFitParams`],
//! 3. the finder strategy chosen once from `params.finder`,
//! 4. the [`DafFitter`] and the [`QualityGate`] resolved against the geometry,
//! 5. the [`FitCounters`] accumulated over all events,
//!
//! and the nested per-event scope ([`EventHits`]) that is cleared at the start of every
//! event. Nothing else carries state from one event to the next.
//!
//! ## Event flow
//!
//! ```text
//! clear ─► ingest hits ─► find candidates ─► DAF fit ─► check_track ─► in-time count ─► sink
//! ```
//!
//! The whole flow is synchronous: each step completes for the event before the next one
//! starts.
//!
//! ## Fatal configuration
//!
//! [`TrackFit::new`] refuses geometries that can never produce an acceptable track: no
//! included plane, or fewer than [`MIN_ACTIVE_PLANES`] planes left once the skip budget
//! is spent, or an explicit ndof floor above what the included planes can provide.
//!
//! ## Typical usage
//!
//! ```rust
//! use trackfit::geometry::{PlaneRegistry, PlaneSpec};
//! use trackfit::measurements::HitInput;
//! use trackfit::output::TrackRecord;
//! use trackfit::params::TrackFitParams;
//! use trackfit::trackfit::TrackFit;
//!
//! let mut registry = PlaneRegistry::new();
//! for i in 0..6 {
//!     registry.add_plane(PlaneSpec::new(i, 100.0 * i as f64, 0.005, 0.005)).unwrap();
//! }
//! let mut fit = TrackFit::new(registry, TrackFitParams::default()).unwrap();
//!
//! let hits: Vec<HitInput> = (0..6)
//!     .map(|i| {
//!         let z = 100.0 * i as f64;
//!         HitInput::new(1e-3 * z, 5e-4 * z, z, i)
//!     })
//!     .collect();
//!
//! let mut tracks: Vec<TrackRecord> = Vec::new();
//! let summary = fit.process_event(1, &hits, &mut tracks).unwrap();
//! assert_eq!(summary.accepted, 1);
//! assert_eq!(tracks[0].planes.len(), 6);
//! ```
use std::fmt;

use log::{info, warn};

use crate::{
    constants::MIN_ACTIVE_PLANES,
    daf::fitter::DafFitter,
    finder::{finder_for, FinderKind, TrackFinder},
    geometry::PlaneRegistry,
    measurements::{event::EventHits, HitInput},
    output::{TrackRecord, TrackSink},
    params::TrackFitParams,
    quality::{FitCounters, QualityGate},
    track::TrackCandidate,
    trackfit_errors::TrackFitError,
};

/// Outcome of one processed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSummary {
    pub event: u64,
    pub hits_ingested: usize,
    pub hits_dropped: usize,
    pub candidates: usize,
    pub accepted: usize,
}

impl fmt::Display for EventSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "event {}: {} hits ({} dropped), {} candidates, {} accepted",
            self.event, self.hits_ingested, self.hits_dropped, self.candidates, self.accepted
        )
    }
}

/// Per-run track reconstruction context.
pub struct TrackFit {
    registry: PlaneRegistry,
    params: TrackFitParams,
    finder: Box<dyn TrackFinder>,
    fitter: DafFitter,
    gate: QualityGate,
    event: EventHits,
    counters: FitCounters,
}

impl TrackFit {
    /// Freeze `registry` and set up the pipeline described by `params`.
    ///
    /// Return
    /// ----------
    /// * The run context, or [`TrackFitError::NoUsablePlanes`] /
    ///   [`TrackFitError::InsufficientActivePlanes`] when no track could ever be accepted.
    pub fn new(registry: PlaneRegistry, params: TrackFitParams) -> Result<Self, TrackFitError> {
        let active = registry.n_included();
        if active == 0 {
            warn!("No usable plane in the geometry ({} registered)", registry.len());
            return Err(TrackFitError::NoUsablePlanes);
        }
        if active < params.max_skips + MIN_ACTIVE_PLANES {
            warn!(
                "{active} active planes cannot satisfy a skip budget of {}",
                params.max_skips
            );
            return Err(TrackFitError::InsufficientActivePlanes {
                active,
                max_skips: params.max_skips,
                required: params.max_skips + MIN_ACTIVE_PLANES,
            });
        }
        let floor = params.ndof_floor(active);
        let best_ndof = 4.0 * active as f64 - 4.0;
        if floor > best_ndof {
            let required = ((floor + 4.0) / 4.0).ceil() as usize;
            warn!("ndof floor {floor:.2} exceeds the {best_ndof:.0} reachable with {active} planes");
            return Err(TrackFitError::InsufficientActivePlanes {
                active,
                max_skips: params.max_skips,
                required,
            });
        }

        let gate = QualityGate::from_params(&params, &registry);
        info!(
            "Track fit ready: {} planes ({active} included), ndof floor {:.2}, {params}",
            registry.len(),
            gate.ndof_floor()
        );
        Ok(TrackFit {
            event: EventHits::new(&registry),
            finder: finder_for(&params),
            fitter: DafFitter::from_params(&params),
            gate,
            registry,
            params,
            counters: FitCounters::default(),
        })
    }

    pub fn registry(&self) -> &PlaneRegistry {
        &self.registry
    }

    pub fn params(&self) -> &TrackFitParams {
        &self.params
    }

    pub fn finder_kind(&self) -> FinderKind {
        self.finder.kind()
    }

    pub fn counters(&self) -> &FitCounters {
        &self.counters
    }

    /// Measurements of the last processed event.
    pub fn event_hits(&self) -> &EventHits {
        &self.event
    }

    /// Clear the event scope, ingest `hits`, find, fit and filter.
    ///
    /// Returns the number of candidates found and the accepted candidates.
    fn run_event(&mut self, hits: &[HitInput]) -> (usize, Vec<TrackCandidate>) {
        self.event.clear();
        self.counters.events += 1;
        for hit in hits {
            self.event.add_hit(&self.registry, hit);
        }
        self.counters.hits_dropped += self.event.dropped();

        let candidates = self.finder.find_candidates(&self.registry, &self.event);
        let n_found = candidates.len();
        self.counters.candidates_found += n_found;

        let mut accepted = Vec::new();
        for mut candidate in candidates {
            self.counters.seeded += 1;
            self.fitter.fit(&self.registry, &self.event, &mut candidate);
            if self
                .gate
                .evaluate(&self.registry, &mut candidate, &mut self.counters)
            {
                accepted.push(candidate);
            }
        }
        (n_found, accepted)
    }

    /// Reconstruct one event and return its accepted candidates.
    pub fn reconstruct(&mut self, hits: &[HitInput]) -> Vec<TrackCandidate> {
        self.run_event(hits).1
    }

    /// Reconstruct one event and hand every accepted track to `sink`.
    ///
    /// Arguments
    /// -----------------
    /// * `event_number` – identifier copied into the records.
    /// * `hits` – hits of the event; those matching no plane are dropped and counted.
    /// * `sink` – consumer of the accepted tracks, in candidate order.
    ///
    /// Return
    /// ----------
    /// * An [`EventSummary`], or the first error reported by the sink.
    pub fn process_event<S>(
        &mut self,
        event_number: u64,
        hits: &[HitInput],
        sink: &mut S,
    ) -> Result<EventSummary, TrackFitError>
    where
        S: TrackSink + ?Sized,
    {
        let (candidates, accepted) = self.run_event(hits);
        for (k, candidate) in accepted.iter().enumerate() {
            sink.consume(TrackRecord::from_candidate(
                event_number,
                k,
                &self.registry,
                &self.event,
                candidate,
            ))?;
        }
        Ok(EventSummary {
            event: event_number,
            hits_ingested: self.event.len(),
            hits_dropped: self.event.dropped(),
            candidates,
            accepted: accepted.len(),
        })
    }
}

#[cfg(test)]
mod test_trackfit {
    use super::*;
    use crate::geometry::PlaneSpec;

    fn registry(n: usize, excluded: &[usize]) -> PlaneRegistry {
        let mut r = PlaneRegistry::new();
        for i in 0..n {
            let spec = PlaneSpec::new(i as u32, 100.0 * i as f64, 0.005, 0.005)
                .excluded(excluded.contains(&i));
            r.add_plane(spec).unwrap();
        }
        r
    }

    fn line_hits(n: usize) -> Vec<HitInput> {
        (0..n)
            .map(|i| {
                let z = 100.0 * i as f64;
                HitInput::new(1e-3 * z, 5e-4 * z, z, i as u64)
            })
            .collect()
    }

    #[test]
    fn test_fatal_configurations() {
        assert_eq!(
            TrackFit::new(PlaneRegistry::new(), TrackFitParams::default()).err(),
            Some(TrackFitError::NoUsablePlanes)
        );
        assert_eq!(
            TrackFit::new(registry(3, &[0, 1, 2]), TrackFitParams::default()).err(),
            Some(TrackFitError::NoUsablePlanes)
        );
        let params = TrackFitParams::builder().max_skips(2).build().unwrap();
        assert_eq!(
            TrackFit::new(registry(4, &[]), params).err(),
            Some(TrackFitError::InsufficientActivePlanes {
                active: 4,
                max_skips: 2,
                required: 5
            })
        );
        let params = TrackFitParams::builder().min_ndof(30.0).build().unwrap();
        assert!(matches!(
            TrackFit::new(registry(6, &[]), params),
            Err(TrackFitError::InsufficientActivePlanes { active: 6, .. })
        ));
    }

    #[test]
    fn test_process_event_and_counters() {
        let mut fit = TrackFit::new(registry(6, &[]), TrackFitParams::default()).unwrap();
        let mut hits = line_hits(6);
        hits.push(HitInput::new(0.0, 0.0, 1234.0, 99));

        let mut sink: Vec<TrackRecord> = Vec::new();
        let summary = fit.process_event(7, &hits, &mut sink).unwrap();
        assert_eq!(
            summary,
            EventSummary {
                event: 7,
                hits_ingested: 6,
                hits_dropped: 1,
                candidates: 1,
                accepted: 1
            }
        );
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].event, 7);

        let c = fit.counters();
        assert_eq!((c.events, c.hits_dropped, c.seeded, c.accepted), (1, 1, 1, 1));
    }

    #[test]
    fn test_event_scope_is_cleared() {
        let mut fit = TrackFit::new(registry(6, &[]), TrackFitParams::default()).unwrap();
        assert_eq!(fit.reconstruct(&line_hits(6)).len(), 1);
        assert!(fit.reconstruct(&[]).is_empty());
        assert!(fit.event_hits().is_empty());
        assert_eq!(fit.counters().events, 2);
    }
}
