//! # trackfit
//!
//! Track finding and Deterministic Annealing Filter fitting for a stack of thin detector
//! planes (beam telescopes and devices under test).
//!
//! The crate is organised around one per-run context, [`trackfit::TrackFit`], which wires:
//!
//! * [`geometry`] – plane registry, alignment correction, material budget,
//! * [`measurements`] – hit measurements and the per-event hit store,
//! * [`finder`] – cluster and combinatorial track finders,
//! * [`daf`] – annealed Kalman filter/smoother with soft hit assignment,
//! * [`quality`] – accept/reject policy and diagnostic counters,
//! * [`output`] – persisted track records and sinks.
//!
//! [`simulation`] generates synthetic events for tests, benches and demos.
pub mod constants;
pub mod daf;
pub mod finder;
pub mod geometry;
pub mod measurements;
pub mod output;
pub mod params;
pub mod quality;
pub mod simulation;
pub mod track;
pub mod trackfit;
pub mod trackfit_errors;
