//! Arithmetic on energy messages.
//!
//! Messages are dense vectors of energies indexed by a variable's domain. They are
//! shift-invariant, so after every update they are normalized to a minimum of 0.
//! +∞ marks an impossible value; no message ever contains NaN or -∞.

use itertools::Itertools;

use crate::Energy;

/// Result of normalizing a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalized {
    Finite,
    /// Every entry is +∞: no value is possible given the incoming messages.
    Contradiction,
}

/// Subtract the minimum entry from every entry.
///
/// A message whose entries are all +∞ is left untouched.
pub fn normalize(msg: &mut [Energy]) -> Normalized {
    let min = msg.iter().copied().fold(Energy::INFINITY, Energy::min);
    if min == Energy::INFINITY {
        return Normalized::Contradiction;
    }
    if min != 0.0 {
        for x in msg.iter_mut() {
            *x -= min;
        }
    }
    Normalized::Finite
}

/// `msg = (1-damping)*msg + damping*old`.
pub fn damp(msg: &mut [Energy], old: &[Energy], damping: f64) {
    debug_assert_eq!(msg.len(), old.len());
    if damping == 0.0 {
        return;
    }
    if damping == 1.0 {
        // 0*inf would be NaN.
        msg.copy_from_slice(old);
        return;
    }
    let keep = 1.0 - damping;
    for (m, o) in msg.iter_mut().zip(old.iter()) {
        *m = keep * *m + damping * *o;
    }
}

/// Final step of every message update: normalize, then damp against the saved previous
/// message if any.
pub fn finish(msg: &mut [Energy], saved: Option<&[Energy]>, damping: f64) -> Normalized {
    let res = normalize(msg);
    if let Some(saved) = saved {
        damp(msg, saved, damping);
    }
    res
}

/// A sum of energies from which any single term can be taken back out.
///
/// Subtracting an infinite term from an infinite total would give NaN, so infinite terms are
/// counted separately.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExclusionSum {
    finite: Energy,
    n_inf: u32,
}

impl ExclusionSum {
    pub fn new(base: Energy) -> Self {
        let mut res = Self::default();
        res.add(base);
        res
    }
    #[inline]
    pub fn add(&mut self, x: Energy) {
        if x == Energy::INFINITY {
            self.n_inf += 1;
        } else {
            self.finite += x;
        }
    }
    #[inline]
    pub fn total(&self) -> Energy {
        if self.n_inf > 0 {
            Energy::INFINITY
        } else {
            self.finite
        }
    }
    /// The sum without the term `x`, which must be one of the added terms.
    #[inline]
    pub fn excluding(&self, x: Energy) -> Energy {
        if x == Energy::INFINITY {
            if self.n_inf > 1 {
                Energy::INFINITY
            } else {
                self.finite
            }
        } else if self.n_inf > 0 {
            Energy::INFINITY
        } else {
            self.finite - x
        }
    }
    /// Infinite whichever term is excluded.
    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.n_inf > 1
    }
}

/// Convert energies into a probability distribution.
///
/// If every energy is +∞ the result is all zeros.
pub fn to_probabilities(energies: &[Energy]) -> Vec<f64> {
    let min = energies.iter().copied().fold(Energy::INFINITY, Energy::min);
    if min == Energy::INFINITY {
        return vec![0.0; energies.len()];
    }
    let mut res: Vec<f64> = energies.iter().map(|e| (-(e - min)).exp()).collect();
    let norm_f = 1.0 / res.iter().sum::<f64>();
    res.iter_mut().for_each(|p| *p *= norm_f);
    res
}

/// Convert unnormalized probabilities into energies. Zero maps to +∞.
///
/// On error, returns the first value that is not a valid probability.
pub fn from_probabilities(probabilities: &[f64]) -> Result<Vec<Energy>, f64> {
    probabilities
        .iter()
        .map(|p| {
            if !p.is_finite() || *p < 0.0 {
                Err(*p)
            } else if *p == 0.0 {
                Ok(Energy::INFINITY)
            } else {
                Ok(-p.ln())
            }
        })
        .collect()
}

/// Index of the lowest energy, the first one on ties.
pub fn argmin(energies: &[Energy]) -> Option<usize> {
    energies.iter().position_min_by(|a, b| a.total_cmp(b))
}
