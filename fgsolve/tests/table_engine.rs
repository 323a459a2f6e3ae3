use approx::assert_abs_diff_eq;
use fgsolve::minsum::message::Normalized;
use fgsolve::minsum::{table_engine, BufferPool};
use fgsolve::FactorTable;
use ndarray::{Array1, ArrayD, IxDyn};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256StarStar;

const INF: f64 = f64::INFINITY;

fn assert_msg_eq(a: &[f64], b: &[f64]) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b.iter()) {
        if x.is_infinite() || y.is_infinite() {
            assert_eq!(x, y, "{:?} != {:?}", a, b);
        } else {
            assert_abs_diff_eq!(x, y, epsilon = 1e-9);
        }
    }
}

fn equality_table() -> FactorTable {
    FactorTable::from_rows(vec![2, 2], vec![(vec![0, 0], 0.0), (vec![1, 1], 0.0)]).unwrap()
}

/// Random sparse table with `domain_sizes`, and one random input per port with some
/// impossible values.
fn gen_problem(domain_sizes: &[usize], seed: u64) -> (FactorTable, Vec<Vec<f64>>) {
    let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
    let mut energies =
        ArrayD::<f64>::random_using(IxDyn(domain_sizes), Uniform::new(0.0, 5.0), &mut rng);
    let mask =
        ArrayD::<f64>::random_using(IxDyn(domain_sizes), Uniform::new(0.0, 1.0), &mut rng);
    energies.zip_mut_with(&mask, |e, m| {
        if *m < 0.3 {
            *e = INF;
        }
    });
    let table = FactorTable::from_dense_energies(energies.view()).unwrap();
    let inputs = domain_sizes
        .iter()
        .map(|size| {
            let mut input = Array1::random_using(*size, Uniform::new(0.0, 3.0), &mut rng);
            let mask = Array1::random_using(*size, Uniform::new(0.0, 1.0), &mut rng);
            input.zip_mut_with(&mask, |x, m| {
                if *m < 0.2 {
                    *x = INF;
                }
            });
            input.to_vec()
        })
        .collect();
    (table, inputs)
}

fn update_all(table: &FactorTable, inputs: &[Vec<f64>], pool: &BufferPool) -> Vec<Vec<f64>> {
    let views: Vec<&[f64]> = inputs.iter().map(|i| i.as_slice()).collect();
    let mut outputs: Vec<Vec<f64>> = table.domain_sizes().iter().map(|s| vec![0.0; *s]).collect();
    let mut out_views: Vec<&mut [f64]> = outputs.iter_mut().map(|o| o.as_mut_slice()).collect();
    table_engine::update(table, &views, &mut out_views, None, pool);
    outputs
}

fn update_one(
    table: &FactorTable,
    inputs: &[Vec<f64>],
    port: usize,
    pool: &BufferPool,
) -> Vec<f64> {
    let views: Vec<&[f64]> = inputs.iter().map(|i| i.as_slice()).collect();
    let mut output = vec![0.0; table.domain_sizes()[port]];
    table_engine::update_edge(table, &views, port, &mut output, 0.0, pool);
    output
}

#[test]
fn equality_scenario() {
    let table = equality_table();
    let pool = BufferPool::default();
    let inputs = vec![vec![0.0, 1.0], vec![0.0, 0.0]];
    assert_eq!(update_one(&table, &inputs, 1, &pool), vec![0.0, 1.0]);
    assert_eq!(update_one(&table, &inputs, 0, &pool), vec![0.0, 0.0]);
    assert_eq!(
        update_all(&table, &inputs, &pool),
        vec![vec![0.0, 0.0], vec![0.0, 1.0]]
    );
}

#[test]
fn update_matches_update_edge() {
    let pool = BufferPool::default();
    for seed in 0..20 {
        let (table, inputs) = gen_problem(&[2, 3, 4], seed);
        let all = update_all(&table, &inputs, &pool);
        for (port, expected) in all.iter().enumerate() {
            let one = update_one(&table, &inputs, port, &pool);
            assert_msg_eq(&one, expected);
        }
    }
}

#[test]
fn normalized_outputs() {
    let pool = BufferPool::default();
    for seed in 0..20 {
        let (table, inputs) = gen_problem(&[3, 3, 2], seed);
        for output in update_all(&table, &inputs, &pool) {
            let min = output.iter().copied().fold(INF, f64::min);
            assert!(min == 0.0 || output.iter().all(|x| *x == INF));
            assert!(output.iter().all(|x| !x.is_nan()));
        }
    }
}

#[test]
fn shift_invariance() {
    let pool = BufferPool::default();
    let (table, inputs) = gen_problem(&[4, 2, 3], 42);
    let mut shifted = inputs.clone();
    shifted[0].iter_mut().for_each(|x| *x += 2.5);
    let a = update_all(&table, &inputs, &pool);
    let b = update_all(&table, &shifted, &pool);
    for port in 0..3 {
        assert_msg_eq(&a[port], &b[port]);
    }
    assert_msg_eq(
        &update_one(&table, &inputs, 2, &pool),
        &update_one(&table, &shifted, 2, &pool),
    );
}

#[test]
fn sparse_exclusion() {
    // No row has value 2 on port 1.
    let table = FactorTable::from_rows(
        vec![2, 3],
        vec![(vec![0, 0], 1.0), (vec![1, 1], 0.0), (vec![0, 1], 2.0)],
    )
    .unwrap();
    let pool = BufferPool::default();
    let inputs = vec![vec![0.0, 0.0], vec![0.0, 0.0, 0.0]];
    let out = update_one(&table, &inputs, 1, &pool);
    assert_eq!(out, vec![1.0, 0.0, INF]);
    assert_eq!(update_all(&table, &inputs, &pool)[1], out);
}

#[test]
fn damping_laws() {
    let pool = BufferPool::default();
    let (table, inputs) = gen_problem(&[2, 3, 4], 7);
    let views: Vec<&[f64]> = inputs.iter().map(|i| i.as_slice()).collect();
    let undamped = update_all(&table, &inputs, &pool);
    let old: Vec<Vec<f64>> = vec![vec![0.0, 1.0], vec![2.0, 0.0, INF], vec![0.0; 4]];

    // Single edge.
    for port in 0..3 {
        let mut output = old[port].clone();
        table_engine::update_edge(&table, &views, port, &mut output, 1.0, &pool);
        assert_eq!(output, old[port]);
        let mut output = old[port].clone();
        table_engine::update_edge(&table, &views, port, &mut output, 0.0, &pool);
        assert_msg_eq(&output, &undamped[port]);
    }

    // All edges, port 1 undamped.
    let mut outputs = old.clone();
    let mut out_views: Vec<&mut [f64]> = outputs.iter_mut().map(|o| o.as_mut_slice()).collect();
    table_engine::update(&table, &views, &mut out_views, Some(&[1.0, 0.0, 1.0][..]), &pool);
    assert_eq!(outputs[0], old[0]);
    assert_msg_eq(&outputs[1], &undamped[1]);
    assert_eq!(outputs[2], old[2]);

    // Half damping mixes the normalized new message with the old one.
    let mut output = vec![0.0, 1.0];
    table_engine::update_edge(&table, &views, 0, &mut output, 0.5, &pool);
    let expected: Vec<f64> = undamped[0]
        .iter()
        .zip([0.0, 1.0].iter())
        .map(|(n, o)| 0.5 * n + 0.5 * o)
        .collect();
    assert_msg_eq(&output, &expected);
}

#[test]
fn contradiction_is_reported() {
    let table = FactorTable::from_rows(vec![2, 2], vec![(vec![0, 0], 0.0)]).unwrap();
    let pool = BufferPool::default();
    let inputs: Vec<&[f64]> = vec![&[INF, 0.0][..], &[0.0, 0.0][..]];
    let mut output = vec![0.0, 0.0];
    assert_eq!(
        table_engine::update_edge(&table, &inputs, 1, &mut output, 0.0, &pool),
        Normalized::Contradiction
    );
    assert_eq!(output, vec![INF, INF]);

    let mut outputs = vec![vec![0.0; 2], vec![0.0; 2]];
    let mut out_views: Vec<&mut [f64]> = outputs.iter_mut().map(|o| o.as_mut_slice()).collect();
    let contradictions = table_engine::update(&table, &inputs, &mut out_views, None, &pool);
    assert_eq!(contradictions, vec![1]);
    assert_eq!(outputs[0], vec![0.0, INF]);
    assert_eq!(outputs[1], vec![INF, INF]);
}

#[test]
fn serialized_table_gives_same_messages() {
    let pool = BufferPool::default();
    let (table, inputs) = gen_problem(&[3, 2, 2], 3);
    let back: FactorTable = bincode::deserialize(&bincode::serialize(&table).unwrap()).unwrap();
    assert_eq!(update_all(&table, &inputs, &pool), update_all(&back, &inputs, &pool));
}

#[test]
fn factor_belief() {
    let table = equality_table();
    let inputs: Vec<&[f64]> = vec![&[0.0, 1.0][..], &[0.5, 0.0][..]];
    assert_eq!(table_engine::belief(&table, &inputs), vec![0.5, 1.0]);
}

#[test]
fn pool_is_reused_across_updates() {
    let pool = BufferPool::new(4);
    let (table, inputs) = gen_problem(&[2, 3, 4], 11);
    let views: Vec<&[f64]> = inputs.iter().map(|i| i.as_slice()).collect();
    let mut output = vec![0.0; 3];
    for _ in 0..10 {
        table_engine::update_edge(&table, &views, 1, &mut output, 0.3, &pool);
    }
    assert_eq!(pool.allocations(), 1);
    assert_eq!(pool.available(), 1);
}
