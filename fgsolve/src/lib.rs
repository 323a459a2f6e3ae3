pub mod domain;
pub mod graph;
pub mod minsum;
pub mod table;

pub use domain::{DiscreteDomain, DomainError, DomainInterner, DomainValue};
pub use graph::{EdgeId, FactorGraph, FactorId, FactorKind, GraphError, NodeId, VarId};
pub use minsum::{
    CustomFactor, EqualityFactor, InferenceWarning, NodeOptions, SolverError, SolverGraph,
    SolverNode,
};
pub use table::{FactorTable, TableError, TableInterner};

use thiserror::Error;

/// Negative log of an unnormalized probability. Only differences between energies of a same
/// message are meaningful.
pub type Energy = f64;

pub type Result<T> = std::result::Result<T, FgError>;

#[derive(Error, Debug, Clone)]
pub enum FgError {
    #[error("Invalid domain: {0}")]
    Domain(#[from] DomainError),
    #[error("Malformed factor table: {0}")]
    Table(#[from] TableError),
    #[error("Invalid graph: {0}")]
    Graph(#[from] GraphError),
    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Config {
    /// Damping coefficient used on every edge of nodes that do not override it.
    /// 0 means no damping.
    pub damping: f64,
    /// Maximum number of scratch buffers kept alive by a buffer pool.
    pub pool_capacity: usize,
    /// Display a progress bar while running multi-iteration schedules.
    pub show_progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            damping: 0.0,
            pool_capacity: 64,
            show_progress: false,
        }
    }
}

impl Config {
    pub fn no_progress() -> Self {
        Self::default()
    }
    pub fn with_progress() -> Self {
        Self {
            show_progress: true,
            ..Self::default()
        }
    }
    pub fn with_damping(mut self, damping: f64) -> std::result::Result<Self, SolverError> {
        minsum::check_damping(damping)?;
        self.damping = damping;
        Ok(self)
    }
}
