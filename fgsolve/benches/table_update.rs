use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use fgsolve::minsum::{table_engine, BufferPool};
use fgsolve::FactorTable;
use ndarray::{Array2, ArrayD, IxDyn};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256StarStar as Prng;

type BenchMarkGroup<'a> = criterion::BenchmarkGroup<'a, criterion::measurement::WallTime>;

/// Dense random table over `n_ports` ports of `nc` values, with random inputs.
fn gen_problem(nc: usize, n_ports: usize, seed: u64) -> (FactorTable, Array2<f64>) {
    let mut rng = Prng::seed_from_u64(seed);
    let shape = vec![nc; n_ports];
    let energies = ArrayD::random_using(IxDyn(&shape), Uniform::new(0.0, 10.0), &mut rng);
    let table = FactorTable::from_dense_energies(energies.view()).unwrap();
    let inputs = Array2::random_using((n_ports, nc), Uniform::new(0.0, 10.0), &mut rng);
    (table, inputs)
}

fn bench_table_update_inner(
    nc: usize,
    n_ports: usize,
    damping: f64,
    group: &mut BenchMarkGroup,
) {
    let (table, inputs) = gen_problem(nc, n_ports, 0);
    let views: Vec<&[f64]> = inputs
        .outer_iter()
        .map(|r| r.to_slice().unwrap())
        .collect();
    let pool = BufferPool::default();
    let damping_all = vec![damping; n_ports];
    let damping_all = (damping != 0.0).then_some(damping_all.as_slice());
    let param = format!("{}^{}", nc, n_ports);
    group.bench_with_input(BenchmarkId::new("update", &param), &nc, |b, _| {
        let mut outputs = vec![vec![0.0; nc]; n_ports];
        b.iter(|| {
            let mut out: Vec<&mut [f64]> =
                outputs.iter_mut().map(|o| o.as_mut_slice()).collect();
            table_engine::update(&table, &views, &mut out, damping_all, &pool)
        })
    });
    group.bench_with_input(BenchmarkId::new("update_edge", &param), &nc, |b, _| {
        let mut outputs = vec![vec![0.0; nc]; n_ports];
        b.iter(|| {
            for (port, output) in outputs.iter_mut().enumerate() {
                table_engine::update_edge(&table, &views, port, output, damping, &pool);
            }
        })
    });
}

fn bench_table_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_update");
    for (nc, n_ports) in [(2, 3), (16, 2), (16, 3), (256, 2)] {
        bench_table_update_inner(nc, n_ports, 0.0, &mut group);
    }
    group.finish();
    let mut group = c.benchmark_group("table_update_damped");
    for (nc, n_ports) in [(16, 3), (256, 2)] {
        bench_table_update_inner(nc, n_ports, 0.5, &mut group);
    }
    group.finish();
}

criterion_group!(benches, bench_table_update);
criterion_main!(benches);
