//! Factors with a hand-written message computation.
//!
//! A [`CustomFactor`] only computes raw outgoing energies; the node hosting it takes care of
//! normalization and damping, exactly as for table factors.

use super::message::{self, ExclusionSum, Normalized};
use super::pool::BufferPool;
use crate::Energy;

pub trait CustomFactor: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Check that the factor can be attached to variables with these domain sizes, in port
    /// order.
    fn check_domains(&self, domain_sizes: &[usize]) -> Result<(), String>;

    /// Unnormalized message sent on `port`, given the messages received on all ports.
    fn compute_edge(&self, port: usize, inputs: &[&[Energy]], output: &mut [Energy]);

    /// Unnormalized messages sent on every port.
    fn compute_all(&self, inputs: &[&[Energy]], outputs: &mut [&mut [Energy]]) {
        for (port, output) in outputs.iter_mut().enumerate() {
            self.compute_edge(port, inputs, output);
        }
    }

    /// Energy of a joint assignment, +∞ if impossible.
    fn energy(&self, indices: &[usize]) -> Energy;
}

pub(crate) fn update_edge(
    custom: &dyn CustomFactor,
    inputs: &[&[Energy]],
    port: usize,
    output: &mut [Energy],
    damping: f64,
    pool: &BufferPool,
) -> Normalized {
    let saved = (damping != 0.0).then(|| pool.acquire_copy(output));
    custom.compute_edge(port, inputs, output);
    message::finish(output, saved.as_deref(), damping)
}

pub(crate) fn update(
    custom: &dyn CustomFactor,
    inputs: &[&[Energy]],
    outputs: &mut [&mut [Energy]],
    damping: Option<&[f64]>,
    pool: &BufferPool,
) -> Vec<usize> {
    let saved = damping.map(|_| {
        let total = outputs.iter().map(|o| o.len()).sum();
        let mut saved = pool.acquire(total);
        let mut offset = 0;
        for output in outputs.iter() {
            saved[offset..offset + output.len()].copy_from_slice(output);
            offset += output.len();
        }
        saved
    });
    custom.compute_all(inputs, outputs);
    let mut contradictions = Vec::new();
    let mut offset = 0;
    for (port, output) in outputs.iter_mut().enumerate() {
        let len = output.len();
        let d = damping.map(|d| d[port]).unwrap_or(0.0);
        let old = saved
            .as_ref()
            .filter(|_| d != 0.0)
            .map(|s| &s[offset..offset + len]);
        if message::finish(output, old, d) == Normalized::Contradiction {
            contradictions.push(port);
        }
        offset += len;
    }
    contradictions
}

/// All attached variables take the same value.
#[derive(Debug, Clone, Default)]
pub struct EqualityFactor;

impl CustomFactor for EqualityFactor {
    fn name(&self) -> &str {
        "equality"
    }
    fn check_domains(&self, domain_sizes: &[usize]) -> Result<(), String> {
        match domain_sizes.first() {
            None => Err("needs at least one variable".to_owned()),
            Some(size) if domain_sizes.iter().any(|s| s != size) => {
                Err(format!("domain sizes differ: {:?}", domain_sizes))
            }
            Some(_) => Ok(()),
        }
    }
    fn compute_edge(&self, port: usize, inputs: &[&[Energy]], output: &mut [Energy]) {
        output.fill(0.0);
        for (_, msg) in inputs.iter().enumerate().filter(|(p, _)| *p != port) {
            for (o, m) in output.iter_mut().zip(msg.iter()) {
                *o += m;
            }
        }
    }
    fn compute_all(&self, inputs: &[&[Energy]], outputs: &mut [&mut [Energy]]) {
        let Some(size) = inputs.first().map(|i| i.len()) else {
            return;
        };
        let sums: Vec<ExclusionSum> = (0..size)
            .map(|i| {
                let mut s = ExclusionSum::default();
                for msg in inputs {
                    s.add(msg[i]);
                }
                s
            })
            .collect();
        for (output, msg) in outputs.iter_mut().zip(inputs.iter()) {
            for ((o, s), m) in output.iter_mut().zip(sums.iter()).zip(msg.iter()) {
                *o = s.excluding(*m);
            }
        }
    }
    fn energy(&self, indices: &[usize]) -> Energy {
        if indices.windows(2).all(|w| w[0] == w[1]) {
            0.0
        } else {
            Energy::INFINITY
        }
    }
}
