//! Finite ordered domains of discrete values.
//!
//! A domain maps each of its values to a dense index in `0..size`. Domains are immutable once
//! built and can be shared between variables through a [`DomainInterner`].

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexSet;
use thiserror::Error;

/// Largest supported finite field is GF(2^MAX_FIELD_DEGREE).
const MAX_FIELD_DEGREE: u32 = 24;

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DomainValue {
    Int(i64),
    Text(String),
}

impl From<i64> for DomainValue {
    fn from(x: i64) -> Self {
        DomainValue::Int(x)
    }
}
impl From<i32> for DomainValue {
    fn from(x: i32) -> Self {
        DomainValue::Int(x.into())
    }
}
impl From<bool> for DomainValue {
    fn from(x: bool) -> Self {
        DomainValue::Int(x.into())
    }
}
impl From<&str> for DomainValue {
    fn from(x: &str) -> Self {
        DomainValue::Text(x.to_owned())
    }
}
impl From<String> for DomainValue {
    fn from(x: String) -> Self {
        DomainValue::Text(x)
    }
}

impl std::fmt::Display for DomainValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DomainValue::Int(x) => write!(f, "{}", x),
            DomainValue::Text(x) => write!(f, "{}", x),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DomainKind {
    Enumerated,
    /// Elements of GF(2^N), represented by their integer encoding `0..2^N`.
    FiniteField { polynomial: u32 },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("A domain must have at least one value.")]
    Empty,
    #[error("Value {0} appears more than once in the domain.")]
    DuplicateValue(String),
    #[error("Invalid range {start}..{end}.")]
    InvalidRange { start: i64, end: i64 },
    #[error("{0:#b} is not a valid primitive polynomial (degree must be in 1..=24, constant term must be 1).")]
    InvalidPolynomial(u32),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DiscreteDomain {
    kind: DomainKind,
    values: IndexSet<DomainValue>,
}

impl DiscreteDomain {
    /// Domain with the given values, in order.
    pub fn new<V: Into<DomainValue>>(
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self, DomainError> {
        let mut set = IndexSet::new();
        for v in values {
            let v = v.into();
            if let Some(v) = set.replace(v) {
                return Err(DomainError::DuplicateValue(v.to_string()));
            }
        }
        if set.is_empty() {
            return Err(DomainError::Empty);
        }
        Ok(Self {
            kind: DomainKind::Enumerated,
            values: set,
        })
    }
    /// Integers in `start..end`.
    pub fn range(start: i64, end: i64) -> Result<Self, DomainError> {
        if end <= start {
            return Err(DomainError::InvalidRange { start, end });
        }
        Self::new(start..end)
    }
    /// The {0, 1} domain.
    pub fn bit() -> Self {
        Self {
            kind: DomainKind::Enumerated,
            values: [DomainValue::Int(0), DomainValue::Int(1)].into_iter().collect(),
        }
    }
    /// GF(2^N) where N is the degree of `polynomial`.
    pub fn finite_field(polynomial: u32) -> Result<Self, DomainError> {
        let degree = (u32::BITS - 1).saturating_sub(polynomial.leading_zeros());
        if polynomial == 0 || degree == 0 || degree > MAX_FIELD_DEGREE || polynomial & 1 == 0 {
            return Err(DomainError::InvalidPolynomial(polynomial));
        }
        Ok(Self {
            kind: DomainKind::FiniteField { polynomial },
            values: (0..(1i64 << degree)).map(DomainValue::Int).collect(),
        })
    }
    pub fn kind(&self) -> &DomainKind {
        &self.kind
    }
    pub fn size(&self) -> usize {
        self.values.len()
    }
    pub fn index_of(&self, value: &DomainValue) -> Option<usize> {
        self.values.get_index_of(value)
    }
    pub fn value(&self, index: usize) -> Option<&DomainValue> {
        self.values.get_index(index)
    }
    pub fn values(&self) -> impl Iterator<Item = &DomainValue> {
        self.values.iter()
    }
}

// IndexSet equality ignores order, domains must not.
impl PartialEq for DiscreteDomain {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.values.iter().eq(other.values.iter())
    }
}
impl Eq for DiscreteDomain {}

impl Hash for DiscreteDomain {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.values.len().hash(state);
        for v in self.values.iter() {
            v.hash(state);
        }
    }
}

/// Shares structurally identical domains.
#[derive(Debug, Clone, Default)]
pub struct DomainInterner {
    domains: HashSet<Arc<DiscreteDomain>>,
}

impl DomainInterner {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn intern(&mut self, domain: DiscreteDomain) -> Arc<DiscreteDomain> {
        if let Some(d) = self.domains.get(&domain) {
            return d.clone();
        }
        let d = Arc::new(domain);
        self.domains.insert(d.clone());
        d
    }
    pub fn len(&self) -> usize {
        self.domains.len()
    }
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}
