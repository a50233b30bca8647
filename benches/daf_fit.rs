//! Benchmarks for the track reconstruction pipeline (single-threaded)
//!
//! Usage:
//!   cargo bench --bench daf_fit
//!   cargo bench --bench daf_fit -- daf_fit/single_candidate
//!   cargo bench --bench daf_fit -- daf_fit/event

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rand::{rngs::StdRng, SeedableRng};

use trackfit::constants::UM;
use trackfit::finder::{finder_for, FinderKind};
use trackfit::geometry::{PlaneRegistry, PlaneSpec};
use trackfit::measurements::event::EventHits;
use trackfit::measurements::HitInput;
use trackfit::params::TrackFitParams;
use trackfit::daf::fitter::DafFitter;
use trackfit::simulation::{EventGenerator, StraightTrack};
use trackfit::trackfit::TrackFit;

/// Six-plane telescope with 1e-3 X0 per plane at 5 GeV.
fn telescope() -> PlaneRegistry {
    let mut registry = PlaneRegistry::new();
    for id in 0..6u32 {
        let spec = PlaneSpec::new(id, 150.0 * id as f64, 5.0 * UM, 5.0 * UM).with_material(1e-3, 5.0);
        registry.add_plane(spec).unwrap();
    }
    registry
}

/// Deterministic event: a few beam tracks plus uniform noise.
fn make_event(registry: &PlaneRegistry, seed: u64) -> Vec<HitInput> {
    let tracks = [
        StraightTrack::new(-2.0, 1.0, 1e-3, 0.0),
        StraightTrack::new(0.5, -0.5, 0.0, 5e-4),
        StraightTrack::new(2.5, 2.0, -5e-4, -5e-4),
    ];
    EventGenerator::new()
        .with_smearing(true)
        .with_scattering(true)
        .noise_hits_per_plane(5)
        .generate(registry, &tracks, &mut StdRng::seed_from_u64(seed))
        .unwrap()
        .hits
}

fn bench_single_candidate(c: &mut Criterion) {
    let registry = telescope();
    let params = TrackFitParams::default();
    let hits = make_event(&registry, 42);

    let mut event = EventHits::new(&registry);
    for hit in &hits {
        event.add_hit(&registry, hit);
    }
    let seeds = finder_for(&params).find_candidates(&registry, &event);
    let fitter = DafFitter::from_params(&params);

    c.bench_function("daf_fit/single_candidate", |b| {
        b.iter_batched(
            || seeds[0].clone(),
            |mut candidate| {
                fitter.fit(&registry, &event, &mut candidate);
                black_box(candidate)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_event(c: &mut Criterion) {
    let registry = telescope();
    let hits = make_event(&registry, 7);

    let mut group = c.benchmark_group("daf_fit/event");
    for finder in [FinderKind::Cluster, FinderKind::Combinatorial] {
        let params = TrackFitParams::builder().finder(finder).build().unwrap();
        let mut fit = TrackFit::new(registry.clone(), params).unwrap();
        group.bench_function(finder.to_string(), |b| {
            b.iter(|| black_box(fit.reconstruct(black_box(&hits))))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_single_candidate, bench_event);
criterion_main!(benches);
