//! Model factor graph: variables, factors and the edges between them.
//!
//! This is the structure the solver binds to. It only records topology, domains, tables and
//! variable inputs; messages live in the solver.

use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::domain::{DiscreteDomain, DomainInterner, DomainValue};
use crate::minsum::custom::CustomFactor;
use crate::minsum::message;
use crate::table::{FactorTable, TableInterner};
use crate::Energy;

pub type VarId = usize;
pub type FactorId = usize;
pub type EdgeId = usize;

type NamedList<T> = IndexMap<String, T>;

#[derive(Debug, Clone)]
pub struct Var {
    pub(crate) domain: Arc<DiscreteDomain>,
    /// Per-value energies, None means uniform.
    pub(crate) input: Option<Vec<Energy>>,
    pub(crate) fixed: Option<usize>,
    /// Sibling order is insertion order.
    pub(crate) edges: IndexMap<FactorId, EdgeId>,
}

#[derive(Debug, Clone)]
pub struct Factor {
    pub(crate) kind: FactorKind,
    // port order is insertion order
    pub(crate) edges: IndexMap<VarId, EdgeId>,
}

#[derive(Debug, Clone)]
pub enum FactorKind {
    Table(Arc<FactorTable>),
    Custom(Arc<dyn CustomFactor>),
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub var: VarId,
    pub factor: FactorId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    Var(VarId),
    Factor(FactorId),
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeId::Var(v) => write!(f, "variable {}", v),
            NodeId::Factor(x) => write!(f, "factor {}", x),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GraphError {
    #[error("Variable {0} declared multiple times.")]
    MultipleVarDecl(String),
    #[error("No variable named {0}.")]
    NoVar(String),
    #[error("No variable with id {0}.")]
    UnknownVar(VarId),
    #[error("No factor with id {0}.")]
    UnknownFactor(FactorId),
    #[error("No edge with id {0}.")]
    UnknownEdge(EdgeId),
    #[error("No edge between variable {var} and factor {factor}.")]
    NoEdge { var: String, factor: FactorId },
    #[error("Variable {0} is given twice to the same factor.")]
    RepeatedOperand(String),
    #[error("Factor expects {expected} variables, got {got}.")]
    Arity { expected: usize, got: usize },
    #[error("Domain of variable {var} has size {got}, expected {expected}.")]
    DomainSizeMismatch {
        var: String,
        expected: usize,
        got: usize,
    },
    #[error("Input of variable {var} has length {got}, expected {expected}.")]
    InputLength {
        var: String,
        expected: usize,
        got: usize,
    },
    #[error("Input of variable {var} contains invalid value {value}.")]
    InvalidInput { var: String, value: f64 },
    #[error("Fixed value index {index} out of range for variable {var} (domain size {size}).")]
    FixedValueOutOfRange {
        var: String,
        index: usize,
        size: usize,
    },
    #[error("Value {value} is not in the domain of variable {var}.")]
    UnknownValue { var: String, value: String },
    #[error("Custom factor {name} cannot be attached: {reason}")]
    CustomFactor { name: String, reason: String },
}

type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Clone, Default)]
pub struct FactorGraph {
    pub(crate) vars: NamedList<Var>,
    pub(crate) factors: Vec<Factor>,
    pub(crate) edges: Vec<Edge>,
    domains: DomainInterner,
    tables: TableInterner,
}

impl FactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_var(&mut self, name: impl Into<String>, domain: DiscreteDomain) -> Result<VarId> {
        let name = name.into();
        if self.vars.contains_key(&name) {
            return Err(GraphError::MultipleVarDecl(name));
        }
        let domain = self.domains.intern(domain);
        let (var_id, _) = self.vars.insert_full(
            name,
            Var {
                domain,
                input: None,
                fixed: None,
                edges: IndexMap::new(),
            },
        );
        Ok(var_id)
    }

    /// Attach a table factor to `vars`, in port order.
    pub fn add_table_factor(&mut self, table: FactorTable, vars: &[VarId]) -> Result<FactorId> {
        if table.n_ports() != vars.len() {
            return Err(GraphError::Arity {
                expected: table.n_ports(),
                got: vars.len(),
            });
        }
        for (var, size) in vars.iter().zip(table.domain_sizes()) {
            let v = self.var(*var)?;
            if v.domain.size() != *size {
                return Err(GraphError::DomainSizeMismatch {
                    var: self.var_name(*var).to_owned(),
                    expected: *size,
                    got: v.domain.size(),
                });
            }
        }
        let table = self.tables.intern(table);
        self.add_factor(FactorKind::Table(table), vars)
    }

    /// Attach a custom factor to `vars`, in port order.
    pub fn add_custom_factor(
        &mut self,
        custom: Arc<dyn CustomFactor>,
        vars: &[VarId],
    ) -> Result<FactorId> {
        let sizes = vars
            .iter()
            .map(|v| self.var(*v).map(|v| v.domain.size()))
            .collect::<Result<Vec<_>>>()?;
        custom
            .check_domains(&sizes)
            .map_err(|reason| GraphError::CustomFactor {
                name: custom.name().to_owned(),
                reason,
            })?;
        self.add_factor(FactorKind::Custom(custom), vars)
    }

    fn add_factor(&mut self, kind: FactorKind, vars: &[VarId]) -> Result<FactorId> {
        let factor_id = self.factors.len();
        let mut edges = IndexMap::new();
        for (i, var) in vars.iter().enumerate() {
            if vars[..i].contains(var) {
                return Err(GraphError::RepeatedOperand(self.var_name(*var).to_owned()));
            }
        }
        for var_id in vars {
            let edge_id = self.edges.len();
            edges.insert(*var_id, edge_id);
            self.vars[*var_id].edges.insert(factor_id, edge_id);
            self.edges.push(Edge {
                var: *var_id,
                factor: factor_id,
            });
        }
        self.factors.push(Factor { kind, edges });
        Ok(factor_id)
    }

    /// Set the input (prior energies) of a variable. None or an empty vector is uniform.
    pub fn set_input(&mut self, var: VarId, input: Option<Vec<Energy>>) -> Result<()> {
        let size = self.var(var)?.domain.size();
        let input = input.filter(|i| !i.is_empty());
        if let Some(input) = &input {
            if input.len() != size {
                return Err(GraphError::InputLength {
                    var: self.var_name(var).to_owned(),
                    expected: size,
                    got: input.len(),
                });
            }
            if let Some(value) = input
                .iter()
                .find(|x| x.is_nan() || **x == Energy::NEG_INFINITY)
            {
                return Err(GraphError::InvalidInput {
                    var: self.var_name(var).to_owned(),
                    value: *value,
                });
            }
        }
        self.vars[var].input = input;
        Ok(())
    }

    /// Set the input of a variable from (unnormalized) probabilities.
    pub fn set_input_probabilities(&mut self, var: VarId, probabilities: &[f64]) -> Result<()> {
        let energies = message::from_probabilities(probabilities).map_err(|value| {
            GraphError::InvalidInput {
                var: self.var_name(var).to_owned(),
                value,
            }
        })?;
        self.set_input(var, Some(energies))
    }

    /// Clamp a variable to the value with the given index. None releases it.
    pub fn fix_value(&mut self, var: VarId, index: Option<usize>) -> Result<()> {
        let size = self.var(var)?.domain.size();
        if let Some(index) = index {
            if index >= size {
                return Err(GraphError::FixedValueOutOfRange {
                    var: self.var_name(var).to_owned(),
                    index,
                    size,
                });
            }
        }
        self.vars[var].fixed = index;
        Ok(())
    }

    pub fn fix_value_of(&mut self, var: VarId, value: &DomainValue) -> Result<()> {
        let index = self.var(var)?.domain.index_of(value).ok_or_else(|| {
            GraphError::UnknownValue {
                var: self.var_name(var).to_owned(),
                value: value.to_string(),
            }
        })?;
        self.fix_value(var, Some(index))
    }

    pub fn var(&self, var: VarId) -> Result<&Var> {
        self.vars
            .get_index(var)
            .map(|(_, v)| v)
            .ok_or(GraphError::UnknownVar(var))
    }
    pub fn factor(&self, factor: FactorId) -> Result<&Factor> {
        self.factors
            .get(factor)
            .ok_or(GraphError::UnknownFactor(factor))
    }
    pub fn edge(&self, edge: EdgeId) -> Result<&Edge> {
        self.edges.get(edge).ok_or(GraphError::UnknownEdge(edge))
    }
    pub fn edge_between(&self, var: VarId, factor: FactorId) -> Result<EdgeId> {
        self.var(var)?
            .edges
            .get(&factor)
            .copied()
            .ok_or_else(|| GraphError::NoEdge {
                var: self.var_name(var).to_owned(),
                factor,
            })
    }
    pub fn get_varid(&self, var: &str) -> Result<VarId> {
        self.vars
            .get_index_of(var)
            .ok_or_else(|| GraphError::NoVar(var.to_owned()))
    }
    pub fn var_name(&self, var: VarId) -> &str {
        self.vars
            .get_index(var)
            .map(|(n, _)| n.as_str())
            .unwrap_or("<unknown>")
    }
    pub fn domain(&self, var: VarId) -> Result<&Arc<DiscreteDomain>> {
        Ok(&self.var(var)?.domain)
    }
    pub fn n_vars(&self) -> usize {
        self.vars.len()
    }
    pub fn n_factors(&self) -> usize {
        self.factors.len()
    }
    pub fn n_edges(&self) -> usize {
        self.edges.len()
    }
    pub fn range_vars(&self) -> std::ops::Range<VarId> {
        0..self.n_vars()
    }
    pub fn range_factors(&self) -> std::ops::Range<FactorId> {
        0..self.n_factors()
    }
}

impl Var {
    pub fn domain(&self) -> &Arc<DiscreteDomain> {
        &self.domain
    }
    pub fn input(&self) -> Option<&[Energy]> {
        self.input.as_deref()
    }
    pub fn fixed(&self) -> Option<usize> {
        self.fixed
    }
    /// Edge ids in sibling order.
    pub fn edges(&self) -> impl ExactSizeIterator<Item = EdgeId> + '_ {
        self.edges.values().copied()
    }
    pub fn factors(&self) -> impl ExactSizeIterator<Item = FactorId> + '_ {
        self.edges.keys().copied()
    }
}

impl Factor {
    pub fn kind(&self) -> &FactorKind {
        &self.kind
    }
    /// Edge ids in port order.
    pub fn edges(&self) -> impl ExactSizeIterator<Item = EdgeId> + '_ {
        self.edges.values().copied()
    }
    pub fn vars(&self) -> impl ExactSizeIterator<Item = VarId> + '_ {
        self.edges.keys().copied()
    }
}
