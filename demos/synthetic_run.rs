//! Reconstruct a run of synthetic telescope events and write the tracks to CSV.
//!
//! Usage:
//!   RUST_LOG=info cargo run --example synthetic_run -- [n_events] [output.csv] [params.json]

use std::env;

use log::info;
use rand::{rngs::StdRng, Rng, SeedableRng};

use trackfit::constants::UM;
use trackfit::geometry::{PlaneRegistry, PlaneSpec};
use trackfit::output::csv_writer::CsvTrackWriter;
use trackfit::output::TrackSink;
use trackfit::params::TrackFitParams;
use trackfit::simulation::{EventGenerator, StraightTrack};
use trackfit::trackfit::TrackFit;
use trackfit::trackfit_errors::TrackFitError;

fn telescope() -> Result<PlaneRegistry, TrackFitError> {
    let mut registry = PlaneRegistry::new();
    for (id, z) in [0.0, 150.0, 300.0, 450.0, 600.0, 750.0].into_iter().enumerate() {
        registry.add_plane(
            PlaneSpec::new(id as u32, z, 4.0 * UM, 4.0 * UM).with_material(5e-4, 5.0),
        )?;
    }
    // Device under test in the middle of the stack
    registry.add_plane(
        PlaneSpec::new(100, 375.0, 10.0 * UM, 10.0 * UM)
            .with_material(1e-3, 5.0)
            .optional(),
    )?;
    Ok(registry)
}

fn main() -> Result<(), TrackFitError> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let n_events: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(1000);
    let output = args.next().unwrap_or_else(|| "tracks.csv".into());
    let params = match args.next() {
        Some(path) => TrackFitParams::from_json_file(path)?,
        None => TrackFitParams::builder().max_skips(1).build()?,
    };

    let registry = telescope()?;
    let mut fit = TrackFit::new(registry.clone(), params)?;
    let generator = EventGenerator::new()
        .with_smearing(true)
        .with_scattering(true)
        .efficiency(0.98)
        .noise_hits_per_plane(3);

    let mut rng = StdRng::seed_from_u64(2024);
    let mut sink = CsvTrackWriter::create(&output)?;
    for event in 0..n_events {
        let n_tracks = rng.random_range(1..=3);
        let tracks: Vec<StraightTrack> = (0..n_tracks)
            .map(|_| {
                StraightTrack::new(
                    rng.random_range(-4.0..4.0),
                    rng.random_range(-2.0..2.0),
                    rng.random_range(-1e-3..1e-3),
                    rng.random_range(-1e-3..1e-3),
                )
            })
            .collect();
        let sim = generator.generate(fit.registry(), &tracks, &mut rng)?;
        let summary = fit.process_event(event, &sim.hits, &mut sink)?;
        log::debug!("{summary}");
    }
    sink.finish()?;

    info!("{} rows written to {output}", sink.rows());
    println!("{:#}", fit.counters());
    Ok(())
}
