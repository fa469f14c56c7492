use criterion::{
    black_box, criterion_group, criterion_main, AxisScale, BenchmarkId, Criterion,
    PlotConfiguration,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use transit_fleet::config::StopDirectory;
use transit_fleet::shared_data::Location;
use transit_fleet::simulation_engine::movement::interpolate;

fn bench_interpolate_leg(c: &mut Criterion) {
    let stops = StopDirectory::nyc();
    let start = Location::new(40.7577, -73.9901);
    let step_counts = [10, 20, 50];

    let mut group = c.benchmark_group("interpolate_leg");
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Linear));

    for &steps in &step_counts {
        group.bench_with_input(BenchmarkId::from_parameter(steps), &steps, |b, &steps| {
            let mut rng = StdRng::seed_from_u64(7);
            b.iter(|| {
                // One full leg split into `steps` progress points
                let mut at = start;
                for i in 1..=steps {
                    let progress = i as f64 * 100.0 / steps as f64;
                    at = interpolate(at, "Wall Street", progress, &stops, &mut rng);
                }
                black_box(at)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_interpolate_leg);
criterion_main!(benches);
