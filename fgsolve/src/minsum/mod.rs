//! Min-sum message passing over a [`crate::FactorGraph`].
//!
//! Messages are energy vectors stored per edge in an [`EdgeArena`]. Each model node gets a
//! solver node implementing [`SolverNode`]; the [`SolverGraph`] context owns the nodes, the
//! arena and the scratch [`BufferPool`].

pub mod custom;
pub mod edge;
pub mod message;
pub mod node;
pub mod pool;
mod solver;
pub mod table_engine;
pub mod variable_engine;

pub use custom::{CustomFactor, EqualityFactor};
pub use edge::{EdgeArena, EdgeState};
pub use node::{
    CustomFactorNode, FactorNode, NodeOptions, NodeState, SolverNode, TableFactorNode,
    UpdateReport, VariableNode,
};
pub use pool::{BufferPool, PooledBuffer};
pub use solver::{InferenceWarning, SolverError, SolverGraph};

/// Damping coefficients must be in [0, 1].
pub(crate) fn check_damping(damping: f64) -> Result<(), SolverError> {
    if (0.0..=1.0).contains(&damping) {
        Ok(())
    } else {
        Err(SolverError::InvalidDamping(damping))
    }
}
