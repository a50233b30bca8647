//! # Track quality gate
//!
//! Accept/reject policy applied to fitted candidates, and the diagnostic counters that
//! tally every outcome.
//!
//! [`QualityGate::check_track`] applies, in order:
//!
//! 1. the ndof floor (`ndof ≥ floor`),
//! 2. the chi2/ndof ceiling (`chi2/ndof ≤ max_chi2_ndof`),
//! 3. the numerical sanity test (chi2, ndof and chi2/ndof finite).
//!
//! The comparisons of the first two tests are written so that NaN falls through to the
//! third one, which is the only test that reports it.
//!
//! [`QualityGate::in_time_count`] counts the optional (non-mandatory) planes where the
//! candidate picked a hit with weight above one half. [`QualityGate::evaluate`] requires at
//! least `min_in_time` of them after `check_track` passed.
//!
//! Rejections are never errors: the candidate status records the reason and the
//! [`FitCounters`] keep the tally.
use std::fmt;

use log::debug;

use crate::{
    geometry::PlaneRegistry,
    params::TrackFitParams,
    track::{FitStatus, RejectReason, TrackCandidate},
};

/// Weight above which a plane counts as having its hit on the track.
const IN_TIME_WEIGHT: f64 = 0.5;

/// Run-level diagnostic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FitCounters {
    pub events: usize,
    pub hits_dropped: usize,
    pub candidates_found: usize,
    pub seeded: usize,
    pub ndof_passed: usize,
    pub chi2_passed: usize,
    pub finite: usize,
    pub in_time_passed: usize,
    pub accepted: usize,
}

impl FitCounters {
    /// Accepted fraction of the fitted candidates, `0` before the first fit.
    pub fn acceptance(&self) -> f64 {
        if self.seeded == 0 {
            0.0
        } else {
            self.accepted as f64 / self.seeded as f64
        }
    }
}

impl fmt::Display for FitCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            writeln!(f, "Track fit counters")?;
            writeln!(f, "  events            : {}", self.events)?;
            writeln!(f, "  hits dropped      : {}", self.hits_dropped)?;
            writeln!(f, "  candidates found  : {}", self.candidates_found)?;
            writeln!(f, "  seeded            : {}", self.seeded)?;
            writeln!(f, "  ndof passed       : {}", self.ndof_passed)?;
            writeln!(f, "  chi2/ndof passed  : {}", self.chi2_passed)?;
            writeln!(f, "  finite            : {}", self.finite)?;
            writeln!(f, "  in-time passed    : {}", self.in_time_passed)?;
            writeln!(f, "  accepted          : {}", self.accepted)?;
            write!(f, "  acceptance        : {:.2} %", 100.0 * self.acceptance())
        } else {
            write!(
                f,
                "events={}, dropped={}, found={}, seeded={}, ndof={}, chi2={}, finite={}, in_time={}, accepted={}",
                self.events,
                self.hits_dropped,
                self.candidates_found,
                self.seeded,
                self.ndof_passed,
                self.chi2_passed,
                self.finite,
                self.in_time_passed,
                self.accepted
            )
        }
    }
}

/// Accept/reject thresholds, resolved against the geometry once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityGate {
    ndof_floor: f64,
    max_chi2_ndof: f64,
    min_in_time: usize,
}

impl QualityGate {
    pub fn new(ndof_floor: f64, max_chi2_ndof: f64, min_in_time: usize) -> Self {
        QualityGate {
            ndof_floor,
            max_chi2_ndof,
            min_in_time,
        }
    }

    /// Thresholds from `params`, with the ndof floor derived from the number of included
    /// planes of `registry` unless set explicitly.
    pub fn from_params(params: &TrackFitParams, registry: &PlaneRegistry) -> Self {
        Self::new(
            params.ndof_floor(registry.n_included()),
            params.max_chi2_ndof,
            params.min_in_time,
        )
    }

    pub fn ndof_floor(&self) -> f64 {
        self.ndof_floor
    }

    /// Apply the ndof, chi2/ndof and NaN tests.
    ///
    /// On failure the candidate is marked `Rejected` with the failing test; on success its
    /// status is left untouched.
    pub fn check_track(&self, candidate: &mut TrackCandidate, counters: &mut FitCounters) -> bool {
        if candidate.ndof < self.ndof_floor {
            return Self::reject(candidate, RejectReason::NdofBelowFloor);
        }
        counters.ndof_passed += 1;

        if candidate.chi2_ndof() > self.max_chi2_ndof {
            return Self::reject(candidate, RejectReason::Chi2NdofAboveCeiling);
        }
        counters.chi2_passed += 1;

        let finite = candidate.chi2.is_finite()
            && candidate.ndof.is_finite()
            && candidate.chi2_ndof().is_finite();
        if !finite {
            return Self::reject(candidate, RejectReason::NotFinite);
        }
        counters.finite += 1;
        true
    }

    /// Number of included optional planes where `candidate` carries a hit of weight above
    /// one half.
    pub fn in_time_count(&self, registry: &PlaneRegistry, candidate: &TrackCandidate) -> usize {
        registry
            .planes()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_included() && !p.is_mandatory())
            .filter(|(i, _)| {
                candidate
                    .best_hit(*i)
                    .is_some_and(|(_, w)| w > IN_TIME_WEIGHT)
            })
            .count()
    }

    /// Run [`check_track`](QualityGate::check_track), then require `min_in_time` in-time
    /// planes, and mark the survivors `Accepted`.
    pub fn evaluate(
        &self,
        registry: &PlaneRegistry,
        candidate: &mut TrackCandidate,
        counters: &mut FitCounters,
    ) -> bool {
        if !self.check_track(candidate, counters) {
            return false;
        }
        if self.in_time_count(registry, candidate) < self.min_in_time {
            return Self::reject(candidate, RejectReason::NotInTime);
        }
        counters.in_time_passed += 1;

        candidate.status = FitStatus::Accepted;
        counters.accepted += 1;
        true
    }

    fn reject(candidate: &mut TrackCandidate, reason: RejectReason) -> bool {
        debug!(
            "Rejecting candidate ({reason:?}): chi2 = {:.3}, ndof = {:.2}",
            candidate.chi2, candidate.ndof
        );
        candidate.status = FitStatus::Rejected(reason);
        false
    }
}
