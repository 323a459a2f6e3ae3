//! Min-sum messages of a discrete variable.
//!
//! The message sent on a port is the prior plus the messages received on every other port.

use super::message::{self, ExclusionSum, Normalized};
use super::pool::BufferPool;
use crate::Energy;

/// `prior + sum of all incoming messages`.
pub fn belief(prior: &[Energy], incoming: &[&[Energy]]) -> Vec<Energy> {
    let mut belief = prior.to_vec();
    for msg in incoming {
        for (b, m) in belief.iter_mut().zip(msg.iter()) {
            *b += m;
        }
    }
    belief
}

/// Recompute the message sent on `port`.
///
/// `output` holds the previous outgoing message, which is used for damping when
/// `damping != 0`.
pub fn update_edge(
    prior: &[Energy],
    incoming: &[&[Energy]],
    port: usize,
    output: &mut [Energy],
    damping: f64,
    pool: &BufferPool,
) -> Normalized {
    debug_assert_eq!(prior.len(), output.len());
    let saved = (damping != 0.0).then(|| pool.acquire_copy(output));
    output.copy_from_slice(prior);
    for (_, msg) in incoming.iter().enumerate().filter(|(p, _)| *p != port) {
        for (o, m) in output.iter_mut().zip(msg.iter()) {
            *o += m;
        }
    }
    message::finish(output, saved.as_deref(), damping)
}

/// Recompute the messages sent on every port.
///
/// The belief is accumulated once in `sums` (one entry per domain value), then each port's
/// own incoming message is taken back out of it.
/// Returns the ports whose new message is a contradiction.
pub fn update(
    prior: &[Energy],
    incoming: &[&[Energy]],
    outputs: &mut [&mut [Energy]],
    damping: Option<&[f64]>,
    pool: &BufferPool,
    sums: &mut [ExclusionSum],
) -> Vec<usize> {
    debug_assert_eq!(prior.len(), sums.len());
    for (s, p) in sums.iter_mut().zip(prior.iter()) {
        *s = ExclusionSum::new(*p);
    }
    for msg in incoming {
        for (s, m) in sums.iter_mut().zip(msg.iter()) {
            s.add(*m);
        }
    }
    let mut saved = damping.map(|_| pool.acquire(prior.len()));
    let mut contradictions = Vec::new();
    for (port, (output, msg)) in outputs.iter_mut().zip(incoming.iter()).enumerate() {
        let d = damping.map(|d| d[port]).unwrap_or(0.0);
        let old = match saved.as_mut() {
            Some(saved) if d != 0.0 => {
                saved.copy_from_slice(&**output);
                Some(&**saved)
            }
            _ => None,
        };
        for ((o, s), m) in output.iter_mut().zip(sums.iter()).zip(msg.iter()) {
            *o = s.excluding(*m);
        }
        if message::finish(output, old, d) == Normalized::Contradiction {
            contradictions.push(port);
        }
    }
    contradictions
}
