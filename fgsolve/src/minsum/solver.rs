use std::sync::Arc;

use indicatif::{ProgressBar, ProgressFinish, ProgressIterator, ProgressStyle};
use rayon::prelude::*;
use thiserror::Error;

use super::custom::CustomFactor;
use super::edge::{EdgeArena, EdgeState};
use super::node::{FactorNode, NodeOptions, NodeState, SolverNode, UpdateReport, VariableNode};
use super::pool::BufferPool;
use super::{check_damping, message};
use crate::domain::DiscreteDomain;
use crate::graph::{EdgeId, FactorGraph, FactorId, GraphError, NodeId, VarId};
use crate::table::FactorTable;
use crate::{Config, Energy};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("{0} used before initialize().")]
    NotInitialized(NodeId),
    #[error("{node} has no port {port} (it has {siblings} sibling edges).")]
    NoSuchPort {
        node: NodeId,
        port: usize,
        siblings: usize,
    },
    #[error("No edge state with id {0}.")]
    NoSuchEdge(EdgeId),
    #[error("Edge {0} is requested more than once.")]
    DuplicateEdge(EdgeId),
    #[error("No {0} in the graph.")]
    NoSuchNode(NodeId),
    #[error("Edge {edge} is not attached to {node}.")]
    ForeignEdge { node: NodeId, edge: EdgeId },
    #[error("{node} has {expected} sibling edges, got {got} edge states.")]
    SiblingCountMismatch {
        node: NodeId,
        expected: usize,
        got: usize,
    },
    #[error("Edge {edge} carries messages of length {got}, expected {expected}.")]
    DomainSizeMismatch {
        edge: EdgeId,
        expected: usize,
        got: usize,
    },
    #[error("Message has length {got}, expected {expected}.")]
    MessageLength { expected: usize, got: usize },
    #[error("Invalid message energy {0}.")]
    InvalidMessage(f64),
    #[error("Damping coefficient {0} is not in [0, 1].")]
    InvalidDamping(f64),
    #[error("{what} is not supported ({node}).")]
    Unsupported { node: NodeId, what: &'static str },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Non-fatal numerical event observed during an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceWarning {
    /// Every entry of the message sent by `node` on `port` is +∞.
    Contradiction { node: NodeId, port: usize },
}

impl std::fmt::Display for InferenceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InferenceWarning::Contradiction { node, port } => {
                write!(f, "contradiction on port {} of {}", port, node)
            }
        }
    }
}

/// Solving context: a model graph together with its solver nodes, the edge states and the
/// scratch buffer pool.
///
/// Nodes must be initialized (see [`SolverGraph::initialize`]) before they are updated.
/// Adding variables or factors invalidates the nodes it touches.
#[derive(Debug)]
pub struct SolverGraph {
    graph: FactorGraph,
    config: Config,
    edges: EdgeArena,
    vars: Vec<VariableNode>,
    factors: Vec<FactorNode>,
    pool: BufferPool,
    warnings: Vec<InferenceWarning>,
}

fn node_mut<'a>(
    vars: &'a mut [VariableNode],
    factors: &'a mut [FactorNode],
    id: NodeId,
) -> Result<&'a mut dyn SolverNode, SolverError> {
    match id {
        NodeId::Var(v) => vars
            .get_mut(v)
            .map(|n| n as &mut dyn SolverNode)
            .ok_or(SolverError::NoSuchNode(id)),
        NodeId::Factor(f) => factors
            .get_mut(f)
            .map(|n| n as &mut dyn SolverNode)
            .ok_or(SolverError::NoSuchNode(id)),
    }
}

fn record(warnings: &mut Vec<InferenceWarning>, node: NodeId, report: &UpdateReport) {
    for port in report.contradictions.iter() {
        tracing::warn!(%node, port, "contradiction: outgoing message is +inf everywhere");
        warnings.push(InferenceWarning::Contradiction { node, port: *port });
    }
}

/// Update every node of `nodes` in parallel, each one with exclusive access to its edges.
fn parallel_phase<N: SolverNode>(
    nodes: &mut [N],
    arena: &mut EdgeArena,
    pool_capacity: usize,
) -> Result<Vec<(NodeId, UpdateReport)>, SolverError> {
    if let Some(node) = nodes.iter().find(|n| n.state() != NodeState::Initialized) {
        return Err(SolverError::NotInitialized(node.id()));
    }
    // Runtime borrow checking: each edge state can be handed out only once.
    let mut slots = arena.slots_mut();
    let mut per_node = nodes
        .iter()
        .map(|node| {
            node.sibling_edges()
                .iter()
                .map(|e| match slots.get_mut(*e) {
                    None => Err(SolverError::NoSuchEdge(*e)),
                    Some(slot) => slot.take().ok_or(SolverError::DuplicateEdge(*e)),
                })
                .collect::<Result<Vec<&mut EdgeState>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;
    nodes
        .par_iter_mut()
        .zip(per_node.par_iter_mut())
        .map_init(
            || BufferPool::new(pool_capacity),
            |pool, (node, siblings)| node.update(siblings, pool).map(|r| (node.id(), r)),
        )
        .collect()
}

impl SolverGraph {
    /// Build solver nodes and fresh edge states for every node and edge of `graph`.
    pub fn new(graph: FactorGraph, config: Config) -> Result<Self, SolverError> {
        check_damping(config.damping)?;
        let vars = graph.range_vars().map(VariableNode::new).collect();
        let factors = graph
            .range_factors()
            .map(|f| FactorNode::new(&graph, f))
            .collect::<Result<Vec<_>, _>>()?;
        let pool = BufferPool::new(config.pool_capacity);
        let mut res = Self {
            graph,
            config,
            edges: EdgeArena::new(),
            vars,
            factors,
            pool,
            warnings: Vec::new(),
        };
        res.create_edges()?;
        tracing::debug!(
            vars = res.vars.len(),
            factors = res.factors.len(),
            edges = res.edges.len(),
            "solver graph built"
        );
        Ok(res)
    }

    /// Create the states of edges added to the model graph since the last call.
    fn create_edges(&mut self) -> Result<(), SolverError> {
        for edge in self.edges.len()..self.graph.n_edges() {
            let factor = self.graph.edge(edge)?.factor;
            let node = self
                .factors
                .get(factor)
                .ok_or(SolverError::NoSuchNode(NodeId::Factor(factor)))?;
            let state = node.create_edge(&self.graph, edge)?;
            self.edges.push(state);
        }
        Ok(())
    }

    /// Reset every message to uniform and initialize every node.
    pub fn initialize(&mut self) -> Result<(), SolverError> {
        for edge in 0..self.edges.len() {
            self.edges.get_mut(edge)?.reset();
        }
        for node in self.vars.iter_mut() {
            node.initialize(&self.graph, &self.edges, &self.config)?;
        }
        for node in self.factors.iter_mut() {
            node.initialize(&self.graph, &self.edges, &self.config)?;
        }
        self.warnings.clear();
        tracing::debug!(nodes = self.vars.len() + self.factors.len(), "initialized");
        Ok(())
    }

    /// Initialize a single node, keeping the current messages.
    pub fn initialize_node(&mut self, node: NodeId) -> Result<(), SolverError> {
        node_mut(&mut self.vars, &mut self.factors, node)?.initialize(
            &self.graph,
            &self.edges,
            &self.config,
        )
    }

    pub fn update(&mut self, node: NodeId) -> Result<UpdateReport, SolverError> {
        let n = node_mut(&mut self.vars, &mut self.factors, node)?;
        if n.state() != NodeState::Initialized {
            return Err(SolverError::NotInitialized(node));
        }
        let mut siblings = self.edges.siblings_mut(n.sibling_edges())?;
        let report = n.update(&mut siblings, &self.pool)?;
        record(&mut self.warnings, node, &report);
        Ok(report)
    }

    pub fn update_edge(&mut self, node: NodeId, port: usize) -> Result<UpdateReport, SolverError> {
        let n = node_mut(&mut self.vars, &mut self.factors, node)?;
        if n.state() != NodeState::Initialized {
            return Err(SolverError::NotInitialized(node));
        }
        let mut siblings = self.edges.siblings_mut(n.sibling_edges())?;
        let report = n.update_edge(port, &mut siblings, &self.pool)?;
        record(&mut self.warnings, node, &report);
        Ok(report)
    }

    /// Flooding schedule: `n_iter` times, update all factors then all variables.
    pub fn iterate(&mut self, n_iter: usize) -> Result<(), SolverError> {
        for it in (0..n_iter).progress_with(self.progress_bar(n_iter)) {
            for f in 0..self.factors.len() {
                self.update(NodeId::Factor(f))?;
            }
            for v in 0..self.vars.len() {
                self.update(NodeId::Var(v))?;
            }
            tracing::trace!(iteration = it, "flooding iteration done");
        }
        Ok(())
    }

    /// Same schedule as [`SolverGraph::iterate`], each phase running over nodes in parallel.
    pub fn iterate_parallel(&mut self, n_iter: usize) -> Result<(), SolverError> {
        let capacity = self.config.pool_capacity;
        for it in (0..n_iter).progress_with(self.progress_bar(n_iter)) {
            let reports = parallel_phase(&mut self.factors, &mut self.edges, capacity)?;
            for (node, report) in reports.iter() {
                record(&mut self.warnings, *node, report);
            }
            let reports = parallel_phase(&mut self.vars, &mut self.edges, capacity)?;
            for (node, report) in reports.iter() {
                record(&mut self.warnings, *node, report);
            }
            tracing::trace!(iteration = it, "flooding iteration done");
        }
        Ok(())
    }

    fn progress_bar(&self, n_iter: usize) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(n_iter as u64).with_finish(ProgressFinish::AndClear);
        pb.set_style(
            ProgressStyle::default_spinner()
                .template(
                    "{msg} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] ({pos}/{len}, ETA {eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb.set_message("Min-sum...");
        pb
    }

    pub fn node(&self, node: NodeId) -> Result<&dyn SolverNode, SolverError> {
        match node {
            NodeId::Var(v) => self.vars.get(v).map(|n| n as &dyn SolverNode),
            NodeId::Factor(f) => self.factors.get(f).map(|n| n as &dyn SolverNode),
        }
        .ok_or(SolverError::NoSuchNode(node))
    }

    pub fn variable_node(&self, var: VarId) -> Result<&VariableNode, SolverError> {
        self.vars
            .get(var)
            .ok_or(SolverError::NoSuchNode(NodeId::Var(var)))
    }

    pub fn factor_node(&self, factor: FactorId) -> Result<&FactorNode, SolverError> {
        self.factors
            .get(factor)
            .ok_or(SolverError::NoSuchNode(NodeId::Factor(factor)))
    }

    fn siblings(&self, node: &dyn SolverNode) -> Result<Vec<&EdgeState>, SolverError> {
        self.edges.siblings(node.sibling_edges())
    }

    /// Belief energies of a variable.
    pub fn belief(&self, var: VarId) -> Result<Vec<Energy>, SolverError> {
        let node = self.variable_node(var)?;
        node.belief(&self.siblings(node)?)
    }

    /// Belief of a variable as a probability distribution.
    pub fn belief_probabilities(&self, var: VarId) -> Result<Vec<f64>, SolverError> {
        Ok(message::to_probabilities(&self.belief(var)?))
    }

    /// Per-row belief energies of a table factor.
    pub fn factor_belief(&self, factor: FactorId) -> Result<Vec<Energy>, SolverError> {
        let node = self.factor_node(factor)?;
        node.belief(&self.siblings(node)?)
    }

    pub fn guess(&self, var: VarId) -> Result<usize, SolverError> {
        let node = self.variable_node(var)?;
        node.guess(&self.siblings(node)?)
    }

    /// Guesses of all variables, indexed by variable id.
    pub fn guesses(&self) -> Result<Vec<usize>, SolverError> {
        (0..self.vars.len()).map(|v| self.guess(v)).collect()
    }

    /// Total energy of the current guesses: variable inputs plus factor energies.
    pub fn score(&self) -> Result<Energy, SolverError> {
        let guesses = self.guesses()?;
        let var_score: Energy = self
            .vars
            .iter()
            .zip(guesses.iter())
            .map(|(node, guess)| node.score(*guess))
            .sum();
        let mut factor_score = 0.0;
        for (f, node) in self.factors.iter().enumerate() {
            let factor_guesses: Vec<usize> =
                self.graph.factor(f)?.vars().map(|v| guesses[v]).collect();
            factor_score += node.score(&factor_guesses);
        }
        Ok(var_score + factor_score)
    }

    /// Change the input of a variable. Takes effect immediately on an initialized node.
    pub fn set_input(&mut self, var: VarId, input: Option<Vec<Energy>>) -> Result<(), SolverError> {
        self.graph.set_input(var, input)?;
        self.reload_input(var)
    }

    pub fn set_input_probabilities(
        &mut self,
        var: VarId,
        probabilities: &[f64],
    ) -> Result<(), SolverError> {
        self.graph.set_input_probabilities(var, probabilities)?;
        self.reload_input(var)
    }

    /// Clamp a variable to a value index, or release it with None.
    pub fn fix_value(&mut self, var: VarId, index: Option<usize>) -> Result<(), SolverError> {
        self.graph.fix_value(var, index)?;
        self.reload_input(var)
    }

    fn reload_input(&mut self, var: VarId) -> Result<(), SolverError> {
        let node = self
            .vars
            .get_mut(var)
            .ok_or(SolverError::NoSuchNode(NodeId::Var(var)))?;
        if node.state() == NodeState::Initialized {
            node.load_input(&self.graph)?;
        }
        Ok(())
    }

    /// Set the damping of every edge of `node`. Re-initializes the node if it was initialized.
    pub fn set_damping(&mut self, node: NodeId, damping: f64) -> Result<(), SolverError> {
        check_damping(damping)?;
        self.modify_options(node, |options| options.damping = Some(damping))
    }

    /// Set the damping of each edge of `node`, in port order.
    ///
    /// An array whose length does not match the number of edges of the node is accepted, but
    /// disables damping on that node when it is initialized.
    pub fn set_node_specific_damping(
        &mut self,
        node: NodeId,
        damping: Vec<f64>,
    ) -> Result<(), SolverError> {
        self.modify_options(node, |options| options.node_specific_damping = Some(damping))
    }

    fn modify_options(
        &mut self,
        node: NodeId,
        f: impl FnOnce(&mut NodeOptions),
    ) -> Result<(), SolverError> {
        let n = node_mut(&mut self.vars, &mut self.factors, node)?;
        let mut options = n.options().clone();
        f(&mut options);
        n.set_options(options)?;
        if n.state() == NodeState::Initialized {
            n.initialize(&self.graph, &self.edges, &self.config)?;
        }
        Ok(())
    }

    pub fn damping(&self, node: NodeId, port: usize) -> Result<f64, SolverError> {
        self.node(node)?.damping(port)
    }

    pub fn add_var(
        &mut self,
        name: impl Into<String>,
        domain: DiscreteDomain,
    ) -> Result<VarId, SolverError> {
        let var = self.graph.add_var(name, domain)?;
        self.vars.push(VariableNode::new(var));
        tracing::debug!(var, "variable added");
        Ok(var)
    }

    /// Add a table factor. The new factor and the variables it touches must be initialized
    /// again before their next update.
    pub fn add_table_factor(
        &mut self,
        table: FactorTable,
        vars: &[VarId],
    ) -> Result<FactorId, SolverError> {
        let factor = self.graph.add_table_factor(table, vars)?;
        self.attach_factor(factor, vars)
    }

    /// Add a custom factor. Same invalidation as [`SolverGraph::add_table_factor`].
    pub fn add_custom_factor(
        &mut self,
        custom: Arc<dyn CustomFactor>,
        vars: &[VarId],
    ) -> Result<FactorId, SolverError> {
        let factor = self.graph.add_custom_factor(custom, vars)?;
        self.attach_factor(factor, vars)
    }

    fn attach_factor(&mut self, factor: FactorId, vars: &[VarId]) -> Result<FactorId, SolverError> {
        self.factors.push(FactorNode::new(&self.graph, factor)?);
        self.create_edges()?;
        for var in vars {
            if let Some(node) = self.vars.get_mut(*var) {
                node.invalidate();
            }
        }
        tracing::debug!(factor, ?vars, "factor added, variables invalidated");
        Ok(factor)
    }

    pub fn edge_state(&self, edge: EdgeId) -> Result<&EdgeState, SolverError> {
        self.edges.get(edge)
    }

    /// Direct access to the messages of an edge, e.g. to inject messages computed outside of
    /// this context.
    pub fn edge_state_mut(&mut self, edge: EdgeId) -> Result<&mut EdgeState, SolverError> {
        self.edges.get_mut(edge)
    }

    pub fn graph(&self) -> &FactorGraph {
        &self.graph
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Warnings recorded since the last `initialize` or `take_warnings`.
    pub fn warnings(&self) -> &[InferenceWarning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<InferenceWarning> {
        std::mem::take(&mut self.warnings)
    }
}
