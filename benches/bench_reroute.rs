use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use transit_fleet::simulation_engine::route::Route;

fn bench_reroute(c: &mut Criterion) {
    let route_lengths = [5, 20, 100];
    let mut group = c.benchmark_group("reroute");

    for &len in &route_lengths {
        let stops: Vec<String> = (0..len).map(|i| format!("Stop {}", i)).collect();
        let mut route = Route::new(stops).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| {
                let result = route.reroute(&mut rng);
                black_box(result)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reroute);
criterion_main!(benches);
