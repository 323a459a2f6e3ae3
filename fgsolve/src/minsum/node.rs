//! Solver nodes: the per-model-node computation objects.
//!
//! A solver node is bound to one variable or factor of the model graph. It does not own the
//! messages of its edges: every update receives the states of its sibling edges, in port
//! order, from the caller (usually [`super::SolverGraph`]).
//!
//! Lifecycle: nodes start [`NodeState::Uninitialized`]. [`SolverNode::initialize`] reads the
//! current topology, domains and damping options; it may be called any number of times.
//! [`SolverNode::update`] and [`SolverNode::update_edge`] fail with
//! [`SolverError::NotInitialized`] until it has been called, and again after
//! [`SolverNode::invalidate`].

use std::sync::Arc;

use super::custom::{self, CustomFactor};
use super::edge::{EdgeArena, EdgeState};
use super::message::{self, ExclusionSum};
use super::pool::BufferPool;
use super::{check_damping, table_engine, variable_engine, SolverError};
use crate::graph::{EdgeId, FactorGraph, FactorId, FactorKind, NodeId, VarId};
use crate::table::FactorTable;
use crate::{Config, Energy};

/// Per-node damping options.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NodeOptions {
    /// Damping of every edge of the node, overrides [`Config::damping`].
    pub damping: Option<f64>,
    /// Damping of each edge, in port order. Overrides `damping`. Empty means unset.
    pub node_specific_damping: Option<Vec<f64>>,
}

impl NodeOptions {
    pub fn check(&self) -> Result<(), SolverError> {
        self.damping.into_iter().try_for_each(check_damping)?;
        self.node_specific_damping
            .iter()
            .flatten()
            .try_for_each(|d| check_damping(*d))
    }

    /// Per-port damping coefficients, None when no port is damped.
    ///
    /// A node-specific array whose length is not `n_siblings` is ignored with a warning and
    /// disables damping for the node.
    pub fn resolve_damping(
        &self,
        node: NodeId,
        n_siblings: usize,
        default: f64,
    ) -> Option<Vec<f64>> {
        let damping = match self.node_specific_damping.as_deref() {
            Some(specific) if !specific.is_empty() => {
                if specific.len() != n_siblings {
                    tracing::warn!(
                        %node,
                        expected = n_siblings,
                        got = specific.len(),
                        "node-specific damping has the wrong length, damping disabled"
                    );
                    return None;
                }
                specific.to_vec()
            }
            _ => vec![self.damping.unwrap_or(default); n_siblings],
        };
        damping.iter().any(|d| *d != 0.0).then_some(damping)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Uninitialized,
    Initialized,
}

/// Outcome of a successful update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Ports whose new outgoing message is entirely +∞.
    pub contradictions: Vec<usize>,
}

pub trait SolverNode: std::fmt::Debug + Send + Sync {
    fn id(&self) -> NodeId;

    fn state(&self) -> NodeState;

    /// Bind to the current topology of `graph` and re-derive the damping configuration.
    ///
    /// Edge states are left untouched, but each one must match the domain of its variable.
    fn initialize(
        &mut self,
        graph: &FactorGraph,
        edges: &EdgeArena,
        config: &Config,
    ) -> Result<(), SolverError>;

    /// Go back to [`NodeState::Uninitialized`], e.g. after a topology change.
    fn invalidate(&mut self);

    /// Sibling edges in port order, as of the last `initialize`.
    fn sibling_edges(&self) -> &[EdgeId];

    fn sibling_count(&self) -> usize {
        self.sibling_edges().len()
    }

    /// Recompute the outgoing messages of all ports.
    fn update(
        &mut self,
        siblings: &mut [&mut EdgeState],
        pool: &BufferPool,
    ) -> Result<UpdateReport, SolverError>;

    /// Recompute the outgoing message of `port` only.
    fn update_edge(
        &mut self,
        port: usize,
        siblings: &mut [&mut EdgeState],
        pool: &BufferPool,
    ) -> Result<UpdateReport, SolverError>;

    /// Belief energies: per domain value for a variable, per table row for a factor.
    fn belief(&self, siblings: &[&EdgeState]) -> Result<Vec<Energy>, SolverError>;

    /// Damping coefficient of `port`, 0 when undamped.
    fn damping(&self, port: usize) -> Result<f64, SolverError>;

    fn options(&self) -> &NodeOptions;

    /// Options are taken into account by the next `initialize`.
    fn set_options(&mut self, options: NodeOptions) -> Result<(), SolverError>;

    /// Fresh (uniform) state for a new edge of this node, sized to the domain of its variable.
    fn create_edge(&self, graph: &FactorGraph, edge: EdgeId) -> Result<EdgeState, SolverError> {
        let e = graph.edge(edge)?;
        let touches = match self.id() {
            NodeId::Var(var) => e.var == var,
            NodeId::Factor(factor) => e.factor == factor,
        };
        if !touches {
            return Err(SolverError::ForeignEdge {
                node: self.id(),
                edge,
            });
        }
        Ok(EdgeState::new(graph.domain(e.var)?.size()))
    }
}

/// State shared by all kinds of nodes.
#[derive(Debug, Clone)]
struct NodeCore {
    id: NodeId,
    state: NodeState,
    edges: Vec<EdgeId>,
    domain_sizes: Vec<usize>,
    options: NodeOptions,
    damping: Option<Vec<f64>>,
}

impl NodeCore {
    fn new(id: NodeId) -> Self {
        Self {
            id,
            state: NodeState::Uninitialized,
            edges: Vec::new(),
            domain_sizes: Vec::new(),
            options: NodeOptions::default(),
            damping: None,
        }
    }

    fn bind(
        &mut self,
        edges: Vec<EdgeId>,
        domain_sizes: Vec<usize>,
        arena: &EdgeArena,
        config: &Config,
    ) -> Result<(), SolverError> {
        for (edge, expected) in edges.iter().zip(domain_sizes.iter()) {
            let got = arena.get(*edge)?.domain_size();
            if got != *expected {
                return Err(SolverError::DomainSizeMismatch {
                    edge: *edge,
                    expected: *expected,
                    got,
                });
            }
        }
        self.damping = self
            .options
            .resolve_damping(self.id, edges.len(), config.damping);
        self.edges = edges;
        self.domain_sizes = domain_sizes;
        self.state = NodeState::Initialized;
        tracing::trace!(
            node = %self.id,
            siblings = self.edges.len(),
            damped = self.damping.is_some(),
            "initialized"
        );
        Ok(())
    }

    fn check_ready(&self) -> Result<(), SolverError> {
        match self.state {
            NodeState::Initialized => Ok(()),
            NodeState::Uninitialized => Err(SolverError::NotInitialized(self.id)),
        }
    }

    fn check_port(&self, port: usize) -> Result<(), SolverError> {
        if port < self.edges.len() {
            Ok(())
        } else {
            Err(SolverError::NoSuchPort {
                node: self.id,
                port,
                siblings: self.edges.len(),
            })
        }
    }

    fn check_siblings(
        &self,
        sizes: impl ExactSizeIterator<Item = usize>,
    ) -> Result<(), SolverError> {
        if sizes.len() != self.edges.len() {
            return Err(SolverError::SiblingCountMismatch {
                node: self.id,
                expected: self.edges.len(),
                got: sizes.len(),
            });
        }
        for ((got, expected), edge) in sizes.zip(self.domain_sizes.iter()).zip(self.edges.iter()) {
            if got != *expected {
                return Err(SolverError::DomainSizeMismatch {
                    edge: *edge,
                    expected: *expected,
                    got,
                });
            }
        }
        Ok(())
    }

    fn damping(&self, port: usize) -> Result<f64, SolverError> {
        self.check_ready()?;
        self.check_port(port)?;
        Ok(self.damping.as_ref().map(|d| d[port]).unwrap_or(0.0))
    }

    fn set_options(&mut self, options: NodeOptions) -> Result<(), SolverError> {
        options.check()?;
        self.options = options;
        Ok(())
    }

    fn invalidate(&mut self) {
        self.state = NodeState::Uninitialized;
    }
}

fn report_port(port: usize, res: message::Normalized) -> UpdateReport {
    UpdateReport {
        contradictions: match res {
            message::Normalized::Finite => vec![],
            message::Normalized::Contradiction => vec![port],
        },
    }
}

/// Solver node of a variable.
#[derive(Debug, Clone)]
pub struct VariableNode {
    core: NodeCore,
    var: VarId,
    /// Input energies of the variable, None for uniform.
    input: Option<Vec<Energy>>,
    fixed: Option<usize>,
    /// Prior actually used in messages: the input, clamped by the fixed value.
    prior: Vec<Energy>,
    sums: Vec<ExclusionSum>,
}

impl VariableNode {
    pub fn new(var: VarId) -> Self {
        Self {
            core: NodeCore::new(NodeId::Var(var)),
            var,
            input: None,
            fixed: None,
            prior: Vec::new(),
            sums: Vec::new(),
        }
    }

    pub fn var(&self) -> VarId {
        self.var
    }

    /// Reload input and fixed value from the graph.
    pub fn load_input(&mut self, graph: &FactorGraph) -> Result<(), SolverError> {
        let var = graph.var(self.var)?;
        let size = var.domain().size();
        self.input = var.input().map(|i| i.to_vec());
        self.fixed = var.fixed();
        self.prior = match (self.fixed, &self.input) {
            (Some(fixed), _) => {
                let mut prior = vec![Energy::INFINITY; size];
                prior[fixed] = 0.0;
                prior
            }
            (None, Some(input)) => input.clone(),
            (None, None) => vec![0.0; size],
        };
        self.sums.resize(size, ExclusionSum::default());
        Ok(())
    }

    /// Prior used in messages, as of the last `initialize` or `load_input`.
    pub fn prior(&self) -> &[Energy] {
        &self.prior
    }

    pub fn fixed(&self) -> Option<usize> {
        self.fixed
    }

    /// Index of the most likely value: the fixed value if any, else the lowest belief energy.
    pub fn guess(&self, siblings: &[&EdgeState]) -> Result<usize, SolverError> {
        if let Some(fixed) = self.fixed {
            self.core.check_ready()?;
            return Ok(fixed);
        }
        Ok(message::argmin(&self.belief(siblings)?).unwrap_or(0))
    }

    /// Input energy at `guess`, 0 when the variable is fixed.
    pub fn score(&self, guess: usize) -> Energy {
        match (self.fixed, &self.input) {
            (Some(_), _) | (None, None) => 0.0,
            (None, Some(input)) => input.get(guess).copied().unwrap_or(Energy::INFINITY),
        }
    }
}

impl SolverNode for VariableNode {
    fn id(&self) -> NodeId {
        self.core.id
    }
    fn state(&self) -> NodeState {
        self.core.state
    }
    fn initialize(
        &mut self,
        graph: &FactorGraph,
        edges: &EdgeArena,
        config: &Config,
    ) -> Result<(), SolverError> {
        let var = graph.var(self.var)?;
        let sibling_edges: Vec<EdgeId> = var.edges().collect();
        let domain_sizes = vec![var.domain().size(); sibling_edges.len()];
        self.load_input(graph)?;
        self.core.bind(sibling_edges, domain_sizes, edges, config)
    }
    fn invalidate(&mut self) {
        self.core.invalidate();
    }
    fn sibling_edges(&self) -> &[EdgeId] {
        &self.core.edges
    }
    fn update(
        &mut self,
        siblings: &mut [&mut EdgeState],
        pool: &BufferPool,
    ) -> Result<UpdateReport, SolverError> {
        self.core.check_ready()?;
        self.core
            .check_siblings(siblings.iter().map(|s| s.domain_size()))?;
        let (incoming, mut outgoing): (Vec<&[Energy]>, Vec<&mut [Energy]>) =
            siblings.iter_mut().map(|s| s.variable_side()).unzip();
        let contradictions = variable_engine::update(
            &self.prior,
            &incoming,
            &mut outgoing,
            self.core.damping.as_deref(),
            pool,
            &mut self.sums,
        );
        Ok(UpdateReport { contradictions })
    }
    fn update_edge(
        &mut self,
        port: usize,
        siblings: &mut [&mut EdgeState],
        pool: &BufferPool,
    ) -> Result<UpdateReport, SolverError> {
        self.core.check_ready()?;
        self.core.check_port(port)?;
        self.core
            .check_siblings(siblings.iter().map(|s| s.domain_size()))?;
        let damping = self.core.damping(port)?;
        let (incoming, mut outgoing): (Vec<&[Energy]>, Vec<&mut [Energy]>) =
            siblings.iter_mut().map(|s| s.variable_side()).unzip();
        let res = variable_engine::update_edge(
            &self.prior,
            &incoming,
            port,
            &mut *outgoing[port],
            damping,
            pool,
        );
        Ok(report_port(port, res))
    }
    fn belief(&self, siblings: &[&EdgeState]) -> Result<Vec<Energy>, SolverError> {
        self.core.check_ready()?;
        self.core
            .check_siblings(siblings.iter().map(|s| s.domain_size()))?;
        let incoming: Vec<&[Energy]> = siblings.iter().map(|s| s.factor_to_var()).collect();
        Ok(variable_engine::belief(&self.prior, &incoming))
    }
    fn damping(&self, port: usize) -> Result<f64, SolverError> {
        self.core.damping(port)
    }
    fn options(&self) -> &NodeOptions {
        &self.core.options
    }
    fn set_options(&mut self, options: NodeOptions) -> Result<(), SolverError> {
        self.core.set_options(options)
    }
}

fn factor_domain_sizes(
    graph: &FactorGraph,
    factor: FactorId,
) -> Result<(Vec<EdgeId>, Vec<usize>), SolverError> {
    let f = graph.factor(factor)?;
    let domain_sizes = f
        .vars()
        .map(|v| graph.domain(v).map(|d| d.size()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((f.edges().collect(), domain_sizes))
}

/// Solver node of a factor defined by a [`FactorTable`].
#[derive(Debug, Clone)]
pub struct TableFactorNode {
    core: NodeCore,
    factor: FactorId,
    table: Arc<FactorTable>,
}

impl TableFactorNode {
    pub fn new(factor: FactorId, table: Arc<FactorTable>) -> Self {
        Self {
            core: NodeCore::new(NodeId::Factor(factor)),
            factor,
            table,
        }
    }
    pub fn table(&self) -> &Arc<FactorTable> {
        &self.table
    }
    /// Table energy of the assignment `guesses` (in port order).
    pub fn score(&self, guesses: &[usize]) -> Energy {
        self.table.energy_of(guesses)
    }
}

impl SolverNode for TableFactorNode {
    fn id(&self) -> NodeId {
        self.core.id
    }
    fn state(&self) -> NodeState {
        self.core.state
    }
    fn initialize(
        &mut self,
        graph: &FactorGraph,
        edges: &EdgeArena,
        config: &Config,
    ) -> Result<(), SolverError> {
        let (sibling_edges, domain_sizes) = factor_domain_sizes(graph, self.factor)?;
        self.core.bind(sibling_edges, domain_sizes, edges, config)
    }
    fn invalidate(&mut self) {
        self.core.invalidate();
    }
    fn sibling_edges(&self) -> &[EdgeId] {
        &self.core.edges
    }
    fn update(
        &mut self,
        siblings: &mut [&mut EdgeState],
        pool: &BufferPool,
    ) -> Result<UpdateReport, SolverError> {
        self.core.check_ready()?;
        self.core
            .check_siblings(siblings.iter().map(|s| s.domain_size()))?;
        let (incoming, mut outgoing): (Vec<&[Energy]>, Vec<&mut [Energy]>) =
            siblings.iter_mut().map(|s| s.factor_side()).unzip();
        let contradictions = table_engine::update(
            &self.table,
            &incoming,
            &mut outgoing,
            self.core.damping.as_deref(),
            pool,
        );
        Ok(UpdateReport { contradictions })
    }
    fn update_edge(
        &mut self,
        port: usize,
        siblings: &mut [&mut EdgeState],
        pool: &BufferPool,
    ) -> Result<UpdateReport, SolverError> {
        self.core.check_ready()?;
        self.core.check_port(port)?;
        self.core
            .check_siblings(siblings.iter().map(|s| s.domain_size()))?;
        let damping = self.core.damping(port)?;
        let (incoming, mut outgoing): (Vec<&[Energy]>, Vec<&mut [Energy]>) =
            siblings.iter_mut().map(|s| s.factor_side()).unzip();
        let res = table_engine::update_edge(
            &self.table,
            &incoming,
            port,
            &mut *outgoing[port],
            damping,
            pool,
        );
        Ok(report_port(port, res))
    }
    fn belief(&self, siblings: &[&EdgeState]) -> Result<Vec<Energy>, SolverError> {
        self.core.check_ready()?;
        self.core
            .check_siblings(siblings.iter().map(|s| s.domain_size()))?;
        let incoming: Vec<&[Energy]> = siblings.iter().map(|s| s.var_to_factor()).collect();
        Ok(table_engine::belief(&self.table, &incoming))
    }
    fn damping(&self, port: usize) -> Result<f64, SolverError> {
        self.core.damping(port)
    }
    fn options(&self) -> &NodeOptions {
        &self.core.options
    }
    fn set_options(&mut self, options: NodeOptions) -> Result<(), SolverError> {
        self.core.set_options(options)
    }
}

/// Solver node of a [`CustomFactor`].
#[derive(Debug, Clone)]
pub struct CustomFactorNode {
    core: NodeCore,
    factor: FactorId,
    custom: Arc<dyn CustomFactor>,
}

impl CustomFactorNode {
    pub fn new(factor: FactorId, custom: Arc<dyn CustomFactor>) -> Self {
        Self {
            core: NodeCore::new(NodeId::Factor(factor)),
            factor,
            custom,
        }
    }
    pub fn custom(&self) -> &Arc<dyn CustomFactor> {
        &self.custom
    }
    pub fn score(&self, guesses: &[usize]) -> Energy {
        self.custom.energy(guesses)
    }
}

impl SolverNode for CustomFactorNode {
    fn id(&self) -> NodeId {
        self.core.id
    }
    fn state(&self) -> NodeState {
        self.core.state
    }
    fn initialize(
        &mut self,
        graph: &FactorGraph,
        edges: &EdgeArena,
        config: &Config,
    ) -> Result<(), SolverError> {
        let (sibling_edges, domain_sizes) = factor_domain_sizes(graph, self.factor)?;
        self.core.bind(sibling_edges, domain_sizes, edges, config)
    }
    fn invalidate(&mut self) {
        self.core.invalidate();
    }
    fn sibling_edges(&self) -> &[EdgeId] {
        &self.core.edges
    }
    fn update(
        &mut self,
        siblings: &mut [&mut EdgeState],
        pool: &BufferPool,
    ) -> Result<UpdateReport, SolverError> {
        self.core.check_ready()?;
        self.core
            .check_siblings(siblings.iter().map(|s| s.domain_size()))?;
        let (incoming, mut outgoing): (Vec<&[Energy]>, Vec<&mut [Energy]>) =
            siblings.iter_mut().map(|s| s.factor_side()).unzip();
        let contradictions = custom::update(
            self.custom.as_ref(),
            &incoming,
            &mut outgoing,
            self.core.damping.as_deref(),
            pool,
        );
        Ok(UpdateReport { contradictions })
    }
    fn update_edge(
        &mut self,
        port: usize,
        siblings: &mut [&mut EdgeState],
        pool: &BufferPool,
    ) -> Result<UpdateReport, SolverError> {
        self.core.check_ready()?;
        self.core.check_port(port)?;
        self.core
            .check_siblings(siblings.iter().map(|s| s.domain_size()))?;
        let damping = self.core.damping(port)?;
        let (incoming, mut outgoing): (Vec<&[Energy]>, Vec<&mut [Energy]>) =
            siblings.iter_mut().map(|s| s.factor_side()).unzip();
        let res = custom::update_edge(
            self.custom.as_ref(),
            &incoming,
            port,
            &mut *outgoing[port],
            damping,
            pool,
        );
        Ok(report_port(port, res))
    }
    fn belief(&self, _siblings: &[&EdgeState]) -> Result<Vec<Energy>, SolverError> {
        Err(SolverError::Unsupported {
            node: self.core.id,
            what: "factor belief of a custom factor",
        })
    }
    fn damping(&self, port: usize) -> Result<f64, SolverError> {
        self.core.damping(port)
    }
    fn options(&self) -> &NodeOptions {
        &self.core.options
    }
    fn set_options(&mut self, options: NodeOptions) -> Result<(), SolverError> {
        self.core.set_options(options)
    }
}

/// Solver node of any factor.
#[derive(Debug, Clone)]
pub enum FactorNode {
    Table(TableFactorNode),
    Custom(CustomFactorNode),
}

impl FactorNode {
    pub fn new(graph: &FactorGraph, factor: FactorId) -> Result<Self, SolverError> {
        Ok(match graph.factor(factor)?.kind() {
            FactorKind::Table(table) => {
                FactorNode::Table(TableFactorNode::new(factor, table.clone()))
            }
            FactorKind::Custom(custom) => {
                FactorNode::Custom(CustomFactorNode::new(factor, custom.clone()))
            }
        })
    }
    fn inner(&self) -> &dyn SolverNode {
        match self {
            FactorNode::Table(node) => node,
            FactorNode::Custom(node) => node,
        }
    }
    fn inner_mut(&mut self) -> &mut dyn SolverNode {
        match self {
            FactorNode::Table(node) => node,
            FactorNode::Custom(node) => node,
        }
    }
    /// Energy of the assignment `guesses` (in port order).
    pub fn score(&self, guesses: &[usize]) -> Energy {
        match self {
            FactorNode::Table(node) => node.score(guesses),
            FactorNode::Custom(node) => node.score(guesses),
        }
    }
}

impl SolverNode for FactorNode {
    fn id(&self) -> NodeId {
        self.inner().id()
    }
    fn state(&self) -> NodeState {
        self.inner().state()
    }
    fn initialize(
        &mut self,
        graph: &FactorGraph,
        edges: &EdgeArena,
        config: &Config,
    ) -> Result<(), SolverError> {
        self.inner_mut().initialize(graph, edges, config)
    }
    fn invalidate(&mut self) {
        self.inner_mut().invalidate()
    }
    fn sibling_edges(&self) -> &[EdgeId] {
        self.inner().sibling_edges()
    }
    fn update(
        &mut self,
        siblings: &mut [&mut EdgeState],
        pool: &BufferPool,
    ) -> Result<UpdateReport, SolverError> {
        self.inner_mut().update(siblings, pool)
    }
    fn update_edge(
        &mut self,
        port: usize,
        siblings: &mut [&mut EdgeState],
        pool: &BufferPool,
    ) -> Result<UpdateReport, SolverError> {
        self.inner_mut().update_edge(port, siblings, pool)
    }
    fn belief(&self, siblings: &[&EdgeState]) -> Result<Vec<Energy>, SolverError> {
        self.inner().belief(siblings)
    }
    fn damping(&self, port: usize) -> Result<f64, SolverError> {
        self.inner().damping(port)
    }
    fn options(&self) -> &NodeOptions {
        self.inner().options()
    }
    fn set_options(&mut self, options: NodeOptions) -> Result<(), SolverError> {
        self.inner_mut().set_options(options)
    }
}
