//! Messages carried by the edges of a graph.
//!
//! Each edge owns one [`EdgeState`], stored in an [`EdgeArena`] indexed by edge id. The
//! variable and the factor at both ends of the edge access the same state through the arena.

use super::SolverError;
use crate::graph::EdgeId;
use crate::Energy;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EdgeState {
    var_to_factor: Vec<Energy>,
    factor_to_var: Vec<Energy>,
}

impl EdgeState {
    /// Uniform messages for a variable with a domain of `domain_size` values.
    pub fn new(domain_size: usize) -> Self {
        Self {
            var_to_factor: vec![0.0; domain_size],
            factor_to_var: vec![0.0; domain_size],
        }
    }
    pub fn domain_size(&self) -> usize {
        self.var_to_factor.len()
    }
    pub fn var_to_factor(&self) -> &[Energy] {
        &self.var_to_factor
    }
    pub fn factor_to_var(&self) -> &[Energy] {
        &self.factor_to_var
    }
    pub fn set_var_to_factor(&mut self, msg: &[Energy]) -> Result<(), SolverError> {
        check_message(msg, self.domain_size())?;
        self.var_to_factor.copy_from_slice(msg);
        Ok(())
    }
    pub fn set_factor_to_var(&mut self, msg: &[Energy]) -> Result<(), SolverError> {
        check_message(msg, self.domain_size())?;
        self.factor_to_var.copy_from_slice(msg);
        Ok(())
    }
    /// Set both messages back to uniform.
    pub fn reset(&mut self) {
        self.var_to_factor.fill(0.0);
        self.factor_to_var.fill(0.0);
    }
    /// (incoming, outgoing) messages seen from the factor.
    pub(crate) fn factor_side(&mut self) -> (&[Energy], &mut [Energy]) {
        (&self.var_to_factor, &mut self.factor_to_var)
    }
    /// (incoming, outgoing) messages seen from the variable.
    pub(crate) fn variable_side(&mut self) -> (&[Energy], &mut [Energy]) {
        (&self.factor_to_var, &mut self.var_to_factor)
    }
}

fn check_message(msg: &[Energy], domain_size: usize) -> Result<(), SolverError> {
    if msg.len() != domain_size {
        return Err(SolverError::MessageLength {
            expected: domain_size,
            got: msg.len(),
        });
    }
    if let Some(x) = msg.iter().find(|x| x.is_nan() || **x == Energy::NEG_INFINITY) {
        return Err(SolverError::InvalidMessage(*x));
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct EdgeArena {
    states: Vec<EdgeState>,
}

impl EdgeArena {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push(&mut self, state: EdgeState) -> EdgeId {
        self.states.push(state);
        self.states.len() - 1
    }
    pub fn len(&self) -> usize {
        self.states.len()
    }
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
    pub fn get(&self, edge: EdgeId) -> Result<&EdgeState, SolverError> {
        self.states.get(edge).ok_or(SolverError::NoSuchEdge(edge))
    }
    pub fn get_mut(&mut self, edge: EdgeId) -> Result<&mut EdgeState, SolverError> {
        self.states
            .get_mut(edge)
            .ok_or(SolverError::NoSuchEdge(edge))
    }
    pub fn siblings(&self, edges: &[EdgeId]) -> Result<Vec<&EdgeState>, SolverError> {
        edges.iter().map(|e| self.get(*e)).collect()
    }
    /// Mutable references to the states of `edges`, in the same order. Edge ids must be
    /// distinct.
    pub fn siblings_mut(&mut self, edges: &[EdgeId]) -> Result<Vec<&mut EdgeState>, SolverError> {
        let mut order: Vec<usize> = (0..edges.len()).collect();
        order.sort_unstable_by_key(|i| edges[*i]);
        let mut slots: Vec<Option<&mut EdgeState>> = (0..edges.len()).map(|_| None).collect();
        let mut rest: &mut [EdgeState] = &mut self.states;
        // Id of the first state in `rest`.
        let mut offset = 0;
        for i in order {
            let edge = edges[i];
            if edge < offset {
                return Err(SolverError::DuplicateEdge(edge));
            }
            if edge - offset >= rest.len() {
                return Err(SolverError::NoSuchEdge(edge));
            }
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(edge - offset + 1);
            slots[i] = head.last_mut();
            rest = tail;
            offset = edge + 1;
        }
        Ok(slots.into_iter().flatten().collect())
    }
    /// One optional mutable reference per edge, to be taken out of order.
    pub(crate) fn slots_mut(&mut self) -> Vec<Option<&mut EdgeState>> {
        self.states.iter_mut().map(Some).collect()
    }
}
