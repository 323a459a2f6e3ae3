//! Min-sum messages of a table factor.
//!
//! In the min-plus semiring the message sent on port `o` is
//! `out[x_o] = min over rows with index x_o at o of (row energy + sum_{p != o} in_p[x_p])`.
//! Output values with no row keep an infinite energy.

use super::message::{self, ExclusionSum, Normalized};
use super::pool::BufferPool;
use crate::table::FactorTable;
use crate::Energy;

/// Recompute the message sent on `out_port`.
///
/// `inputs[p]` is the message received on port `p`. `output` holds the previous outgoing
/// message, which is used for damping when `damping != 0`.
pub fn update_edge(
    table: &FactorTable,
    inputs: &[&[Energy]],
    out_port: usize,
    output: &mut [Energy],
    damping: f64,
    pool: &BufferPool,
) -> Normalized {
    debug_assert_eq!(inputs.len(), table.n_ports());
    debug_assert_eq!(output.len(), table.domain_sizes()[out_port]);
    let saved = (damping != 0.0).then(|| pool.acquire_copy(output));
    output.fill(Energy::INFINITY);
    for (row, energy) in table.indices().outer_iter().zip(table.energies().iter()) {
        let mut l = *energy;
        for (port, (index, input)) in row.iter().zip(inputs.iter()).enumerate() {
            if port != out_port {
                l += input[*index];
            }
        }
        let out_index = row[out_port];
        if l < output[out_index] {
            output[out_index] = l;
        }
    }
    message::finish(output, saved.as_deref(), damping)
}

/// Recompute the messages sent on every port with a single pass over the table.
///
/// `damping[p]` is the damping of port `p`, None for no damping at all.
/// Returns the ports whose new message is a contradiction.
pub fn update(
    table: &FactorTable,
    inputs: &[&[Energy]],
    outputs: &mut [&mut [Energy]],
    damping: Option<&[f64]>,
    pool: &BufferPool,
) -> Vec<usize> {
    debug_assert_eq!(inputs.len(), table.n_ports());
    debug_assert_eq!(outputs.len(), table.n_ports());
    // All damped ports are saved in a single buffer, at consecutive offsets.
    let saved = damping.map(|damping| {
        let total = outputs.iter().map(|o| o.len()).sum();
        let mut saved = pool.acquire(total);
        let mut offset = 0;
        for (output, d) in outputs.iter().zip(damping.iter()) {
            if *d != 0.0 {
                saved[offset..offset + output.len()].copy_from_slice(output);
            }
            offset += output.len();
        }
        saved
    });
    for output in outputs.iter_mut() {
        output.fill(Energy::INFINITY);
    }
    for (row, energy) in table.indices().outer_iter().zip(table.energies().iter()) {
        let mut l = ExclusionSum::new(*energy);
        for (index, input) in row.iter().zip(inputs.iter()) {
            l.add(input[*index]);
        }
        if l.is_blocked() {
            continue;
        }
        for ((index, input), output) in row.iter().zip(inputs.iter()).zip(outputs.iter_mut()) {
            // Remove the contribution of the port itself.
            let l_port = l.excluding(input[*index]);
            if l_port < output[*index] {
                output[*index] = l_port;
            }
        }
    }
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

/// Per-row energies of the factor belief: row energy plus every incoming message.
pub fn belief(table: &FactorTable, inputs: &[&[Energy]]) -> Vec<Energy> {
    table
        .indices()
        .outer_iter()
        .zip(table.energies().iter())
        .map(|(row, energy)| {
            row.iter()
                .zip(inputs.iter())
                .fold(*energy, |acc, (index, input)| acc + input[*index])
        })
        .collect()
}
