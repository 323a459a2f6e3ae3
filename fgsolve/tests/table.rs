use fgsolve::{
    DiscreteDomain, DomainError, DomainInterner, DomainValue, FactorTable, TableError,
    TableInterner,
};
use ndarray::{ArrayD, IxDyn};
use std::sync::Arc;

const INF: f64 = f64::INFINITY;

fn xor_table() -> FactorTable {
    FactorTable::from_rows(
        vec![2, 2, 2],
        vec![
            (vec![0, 0, 0], 0.0),
            (vec![0, 1, 1], 0.0),
            (vec![1, 0, 1], 0.0),
            (vec![1, 1, 0], 0.0),
        ],
    )
    .unwrap()
}

#[test]
fn table_rows() {
    let table = xor_table();
    assert_eq!(table.n_ports(), 3);
    assert_eq!(table.n_rows(), 4);
    assert_eq!(table.domain_sizes(), &[2, 2, 2]);
    assert_eq!(table.rows_for(2, 1), &[1, 2]);
    assert_eq!(table.rows_for(0, 0), &[0, 1]);
    assert!(table.rows_for(3, 0).is_empty());
    assert_eq!(table.energy_of(&[1, 1, 0]), 0.0);
    assert_eq!(table.energy_of(&[1, 1, 1]), INF);
    assert_eq!(table.energy_of(&[1, 1]), INF);
    let (row, energy) = table.row(3).unwrap();
    assert_eq!(row.to_vec(), vec![1, 1, 0]);
    assert_eq!(energy, 0.0);
    assert!(table.row(4).is_none());
}

#[test]
fn malformed_tables() {
    assert_eq!(
        FactorTable::from_rows(vec![2, 3], vec![(vec![0, 3], 0.0)]),
        Err(TableError::IndexOutOfRange {
            row: 0,
            port: 1,
            index: 3,
            size: 3
        })
    );
    assert_eq!(
        FactorTable::from_rows(vec![2, 2], vec![(vec![0], 0.0)]),
        Err(TableError::Arity {
            row: 0,
            expected: 2,
            got: 1
        })
    );
    assert_eq!(
        FactorTable::from_rows(vec![2], vec![(vec![0], 1.0), (vec![0], 2.0)]),
        Err(TableError::Ambiguous {
            indices: vec![0],
            first: 1.0,
            second: 2.0
        })
    );
    assert!(matches!(
        FactorTable::from_rows(vec![2], vec![(vec![1], f64::NAN)]),
        Err(TableError::InvalidEnergy { row: 0, .. })
    ));
    assert!(matches!(
        FactorTable::from_rows(vec![2], vec![(vec![1], -INF)]),
        Err(TableError::InvalidEnergy { row: 0, .. })
    ));
    assert_eq!(
        FactorTable::from_rows::<Vec<usize>>(vec![], vec![]),
        Err(TableError::NoPorts)
    );
    assert_eq!(
        FactorTable::from_rows::<Vec<usize>>(vec![2, 0], vec![]),
        Err(TableError::EmptyDomain(1))
    );
}

#[test]
fn duplicate_and_impossible_rows() {
    let table = FactorTable::from_rows(
        vec![2, 2],
        vec![
            (vec![0, 0], 1.0),
            (vec![1, 1], INF),
            (vec![0, 0], 1.0),
            (vec![1, 0], -0.0),
        ],
    )
    .unwrap();
    assert_eq!(table.n_rows(), 2);
    assert_eq!(table.energy_of(&[1, 1]), INF);
    assert_eq!(table.energy_of(&[1, 0]).to_bits(), 0.0f64.to_bits());
}

#[test]
fn impossible_row_conflicts_with_finite_row() {
    assert_eq!(
        FactorTable::from_rows(
            vec![2, 2],
            vec![(vec![0, 0], 1.0), (vec![0, 0], INF), (vec![1, 1], 0.0)]
        ),
        Err(TableError::Ambiguous {
            indices: vec![0, 0],
            first: 1.0,
            second: INF
        })
    );
    assert_eq!(
        FactorTable::from_rows(vec![2, 2], vec![(vec![0, 0], INF), (vec![0, 0], 1.0)]),
        Err(TableError::Ambiguous {
            indices: vec![0, 0],
            first: INF,
            second: 1.0
        })
    );
    // Repeating an impossible row is not a conflict.
    let table =
        FactorTable::from_rows(vec![2, 2], vec![(vec![0, 1], INF), (vec![0, 1], INF)]).unwrap();
    assert_eq!(table.n_rows(), 0);
    assert_eq!(table.energy_of(&[0, 1]), INF);
}

#[test]
fn dense_construction() {
    let mut energies = ArrayD::from_elem(IxDyn(&[2, 3]), INF);
    energies[IxDyn(&[0, 2])] = 1.0;
    energies[IxDyn(&[1, 0])] = 0.5;
    let table = FactorTable::from_dense_energies(energies.view()).unwrap();
    assert_eq!(table.domain_sizes(), &[2, 3]);
    assert_eq!(table.to_rows(), vec![(vec![0, 2], 1.0), (vec![1, 0], 0.5)]);

    let mut weights = ArrayD::zeros(IxDyn(&[2, 2]));
    weights[IxDyn(&[0, 0])] = 1.0;
    weights[IxDyn(&[1, 1])] = 0.25;
    let table = FactorTable::from_dense_weights(weights.view()).unwrap();
    assert_eq!(table.n_rows(), 2);
    assert_eq!(table.energy_of(&[0, 0]), 0.0);
    assert!((table.energy_of(&[1, 1]) - 4f64.ln()).abs() < 1e-12);
    assert_eq!(table.energy_of(&[0, 1]), INF);

    weights[IxDyn(&[0, 1])] = -1.0;
    assert!(matches!(
        FactorTable::from_dense_weights(weights.view()),
        Err(TableError::InvalidWeight { .. })
    ));
}

#[test]
fn interning_by_content() {
    let mut interner = TableInterner::new();
    let a = interner.intern(xor_table());
    let b = interner.intern(xor_table());
    assert!(Arc::ptr_eq(&a, &b));
    let c = interner.intern(FactorTable::from_rows(vec![2], vec![(vec![0], 0.0)]).unwrap());
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(interner.len(), 2);
}

#[test]
fn serde_round_trip() {
    let table = FactorTable::from_rows(
        vec![3, 2],
        vec![(vec![2, 1], 0.25), (vec![0, 0], 3.0), (vec![1, 1], 0.0)],
    )
    .unwrap();
    let bytes = bincode::serialize(&table).unwrap();
    let back: FactorTable = bincode::deserialize(&bytes).unwrap();
    assert_eq!(table, back);
    assert_eq!(back.rows_for(1, 1), &[0, 2]);
}

#[test]
fn domains() {
    let d = DiscreteDomain::new(["a", "b", "c"]).unwrap();
    assert_eq!(d.size(), 3);
    assert_eq!(d.index_of(&DomainValue::from("b")), Some(1));
    assert_eq!(d.value(2), Some(&DomainValue::from("c")));
    assert_eq!(
        DiscreteDomain::new(["a", "a"]),
        Err(DomainError::DuplicateValue("a".to_owned()))
    );
    assert_eq!(
        DiscreteDomain::new(Vec::<i64>::new()),
        Err(DomainError::Empty)
    );
    assert_eq!(DiscreteDomain::range(-1, 2).unwrap().index_of(&DomainValue::Int(0)), Some(1));
    assert!(DiscreteDomain::range(2, 2).is_err());
    assert_eq!(DiscreteDomain::finite_field(0x11b).unwrap().size(), 256);
    assert!(DiscreteDomain::finite_field(0x11a).is_err());
    assert_eq!(DiscreteDomain::bit(), DiscreteDomain::range(0, 2).unwrap());

    let mut interner = DomainInterner::new();
    let a = interner.intern(DiscreteDomain::bit());
    let b = interner.intern(DiscreteDomain::new([0i64, 1]).unwrap());
    assert!(Arc::ptr_eq(&a, &b));
}
