//! Sparse tabular energy functions.
//!
//! A [`FactorTable`] lists the joint assignments of its ports that have a finite energy, one row
//! per assignment. Assignments that are not listed have an infinite energy (zero probability).

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewD, Dimension};
use thiserror::Error;

use crate::Energy;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TableError {
    #[error("A factor table needs at least one port.")]
    NoPorts,
    #[error("Port {0} has an empty domain.")]
    EmptyDomain(usize),
    #[error("Row {row} has {got} indices, expected {expected}.")]
    Arity {
        row: usize,
        expected: usize,
        got: usize,
    },
    #[error("Row {row}: index {index} is out of range for port {port} (domain size {size}).")]
    IndexOutOfRange {
        row: usize,
        port: usize,
        index: usize,
        size: usize,
    },
    #[error("Row {row} has invalid energy {energy}.")]
    InvalidEnergy { row: usize, energy: Energy },
    #[error("Assignment {indices:?} is given two different energies ({first} and {second}).")]
    Ambiguous {
        indices: Vec<usize>,
        first: Energy,
        second: Energy,
    },
    #[error("Invalid weight {weight} for assignment {indices:?}.")]
    InvalidWeight { indices: Vec<usize>, weight: f64 },
}

/// Immutable sparse factor table.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "TableRepr", into = "TableRepr")]
pub struct FactorTable {
    domain_sizes: Vec<usize>,
    /// (n_rows, n_ports)
    indices: Array2<usize>,
    energies: Array1<Energy>,
    /// For every port and every value of that port, the rows holding that value.
    by_port: Vec<Vec<Vec<usize>>>,
}

/// Persisted layout of a table: the port domain sizes and the list of (indices, energy) rows.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct TableRepr {
    domain_sizes: Vec<usize>,
    rows: Vec<(Vec<usize>, Energy)>,
}

impl TryFrom<TableRepr> for FactorTable {
    type Error = TableError;
    fn try_from(t: TableRepr) -> Result<Self, TableError> {
        Self::from_rows(t.domain_sizes, t.rows)
    }
}

impl From<FactorTable> for TableRepr {
    fn from(t: FactorTable) -> Self {
        Self {
            rows: t.to_rows(),
            domain_sizes: t.domain_sizes,
        }
    }
}

impl FactorTable {
    /// Build a table from explicit rows.
    ///
    /// Rows with an energy of +∞ are dropped, rows repeating an assignment with the same energy
    /// are merged. NaN and -∞ energies are rejected, and so is an assignment given two different
    /// energies, +∞ included.
    pub fn from_rows<I: AsRef<[usize]>>(
        domain_sizes: Vec<usize>,
        rows: impl IntoIterator<Item = (I, Energy)>,
    ) -> Result<Self, TableError> {
        check_domain_sizes(&domain_sizes)?;
        let n_ports = domain_sizes.len();
        let mut unique: IndexMap<Vec<usize>, Energy> = IndexMap::new();
        for (row, (indices, energy)) in rows.into_iter().enumerate() {
            let indices = indices.as_ref();
            if indices.len() != n_ports {
                return Err(TableError::Arity {
                    row,
                    expected: n_ports,
                    got: indices.len(),
                });
            }
            for (port, (index, size)) in indices.iter().zip(domain_sizes.iter()).enumerate() {
                if index >= size {
                    return Err(TableError::IndexOutOfRange {
                        row,
                        port,
                        index: *index,
                        size: *size,
                    });
                }
            }
            if energy.is_nan() || energy == Energy::NEG_INFINITY {
                return Err(TableError::InvalidEnergy { row, energy });
            }
            // +∞ rows take part in the ambiguity check, they are dropped afterwards.
            // -0.0 + 0.0 == +0.0, keeps content equality bitwise.
            let energy = energy + 0.0;
            match unique.get(indices) {
                Some(first) if first.to_bits() != energy.to_bits() => {
                    return Err(TableError::Ambiguous {
                        indices: indices.to_vec(),
                        first: *first,
                        second: energy,
                    });
                }
                Some(_) => {}
                None => {
                    unique.insert(indices.to_vec(), energy);
                }
            }
        }
        unique.retain(|_, energy| *energy != Energy::INFINITY);
        let mut indices = Array2::zeros((unique.len(), n_ports));
        let mut energies = Array1::zeros(unique.len());
        for ((mut dest, e), (row, energy)) in indices
            .outer_iter_mut()
            .zip(energies.iter_mut())
            .zip(unique.into_iter())
        {
            dest.assign(&ArrayView1::from(row.as_slice()));
            *e = energy;
        }
        Ok(Self::assemble(domain_sizes, indices, energies))
    }

    /// Build a table from a dense array of energies, one axis per port. Infinite entries are
    /// left out of the table.
    pub fn from_dense_energies(energies: ArrayViewD<Energy>) -> Result<Self, TableError> {
        let domain_sizes = energies.shape().to_vec();
        check_domain_sizes(&domain_sizes)?;
        Self::from_rows(
            domain_sizes,
            energies
                .indexed_iter()
                .map(|(idx, e)| (idx.slice().to_vec(), *e)),
        )
    }

    /// Build a table from a dense array of non-negative weights (unnormalized probabilities).
    /// Zero weights are left out of the table, others get energy `-ln(w)`.
    pub fn from_dense_weights(weights: ArrayViewD<f64>) -> Result<Self, TableError> {
        let domain_sizes = weights.shape().to_vec();
        check_domain_sizes(&domain_sizes)?;
        let mut rows = Vec::new();
        for (idx, w) in weights.indexed_iter() {
            if !w.is_finite() || *w < 0.0 {
                return Err(TableError::InvalidWeight {
                    indices: idx.slice().to_vec(),
                    weight: *w,
                });
            }
            if *w > 0.0 {
                rows.push((idx.slice().to_vec(), -w.ln()));
            }
        }
        Self::from_rows(domain_sizes, rows)
    }

    fn assemble(domain_sizes: Vec<usize>, indices: Array2<usize>, energies: Array1<Energy>) -> Self {
        let mut by_port: Vec<Vec<Vec<usize>>> =
            domain_sizes.iter().map(|s| vec![Vec::new(); *s]).collect();
        for (r, row) in indices.outer_iter().enumerate() {
            for (port, index) in row.iter().enumerate() {
                by_port[port][*index].push(r);
            }
        }
        Self {
            domain_sizes,
            indices,
            energies,
            by_port,
        }
    }

    pub fn n_ports(&self) -> usize {
        self.domain_sizes.len()
    }
    pub fn n_rows(&self) -> usize {
        self.energies.len()
    }
    pub fn domain_sizes(&self) -> &[usize] {
        &self.domain_sizes
    }
    /// Per-row port indices, shape (n_rows, n_ports).
    pub fn indices(&self) -> ArrayView2<'_, usize> {
        self.indices.view()
    }
    pub fn energies(&self) -> ArrayView1<'_, Energy> {
        self.energies.view()
    }
    pub fn row(&self, row: usize) -> Option<(ArrayView1<'_, usize>, Energy)> {
        (row < self.n_rows()).then(|| (self.indices.row(row), self.energies[row]))
    }
    /// Rows whose index at `port` is `value`. Empty if either is out of range.
    pub fn rows_for(&self, port: usize, value: usize) -> &[usize] {
        self.by_port
            .get(port)
            .and_then(|p| p.get(value))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
    /// Energy of a joint assignment, +∞ when the assignment is not in the table.
    pub fn energy_of(&self, indices: &[usize]) -> Energy {
        if indices.len() != self.n_ports() {
            return Energy::INFINITY;
        }
        let Some(candidates) = self.by_port[0].get(indices[0]) else {
            return Energy::INFINITY;
        };
        candidates
            .iter()
            .find(|r| self.indices.row(**r).iter().eq(indices.iter()))
            .map(|r| self.energies[*r])
            .unwrap_or(Energy::INFINITY)
    }
    pub fn to_rows(&self) -> Vec<(Vec<usize>, Energy)> {
        self.indices
            .outer_iter()
            .zip(self.energies.iter())
            .map(|(row, e)| (row.to_vec(), *e))
            .collect()
    }
}

fn check_domain_sizes(domain_sizes: &[usize]) -> Result<(), TableError> {
    if domain_sizes.is_empty() {
        return Err(TableError::NoPorts);
    }
    if let Some(port) = domain_sizes.iter().position(|s| *s == 0) {
        return Err(TableError::EmptyDomain(port));
    }
    Ok(())
}

impl PartialEq for FactorTable {
    fn eq(&self, other: &Self) -> bool {
        self.domain_sizes == other.domain_sizes
            && self.indices == other.indices
            && self
                .energies
                .iter()
                .map(|e| e.to_bits())
                .eq(other.energies.iter().map(|e| e.to_bits()))
    }
}
impl Eq for FactorTable {}

impl Hash for FactorTable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.domain_sizes.hash(state);
        for i in self.indices.iter() {
            i.hash(state);
        }
        for e in self.energies.iter() {
            e.to_bits().hash(state);
        }
    }
}

/// Shares tables with identical content between factors.
#[derive(Debug, Clone, Default)]
pub struct TableInterner {
    tables: HashSet<Arc<FactorTable>>,
}

impl TableInterner {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn intern(&mut self, table: FactorTable) -> Arc<FactorTable> {
        if let Some(t) = self.tables.get(&table) {
            return t.clone();
        }
        let t = Arc::new(table);
        self.tables.insert(t.clone());
        t
    }
    pub fn len(&self) -> usize {
        self.tables.len()
    }
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
