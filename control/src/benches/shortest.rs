use criterion::{criterion_group, Criterion};
use pilo_control::controller::routing::shortest;

fn bench_shortest(c: &mut Criterion) {
    for side in [4, 8, 12] {
        let topology = super::grid(side);
        c.bench_function(&format!("{}/side={side}", module_path!()), |b| {
            b.iter(|| shortest(&topology).unwrap());
        });
    }
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_shortest
}
