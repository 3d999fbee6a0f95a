use crate::sequence::{Alphabet, Sequence};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How often a position is resampled when a mutant is generated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationRate {
    /// Independent per-site probability.
    PerSite(f64),
    /// Expected number of resampled sites per sequence (`mu / len` per site).
    PerSequence(f64),
}

impl MutationRate {
    /// Per-site probability for a sequence of `len` symbols, clamped to `[0, 1]`.
    pub fn per_site(&self, len: usize) -> f64 {
        let raw = match *self {
            MutationRate::PerSite(p) => p,
            MutationRate::PerSequence(_) if len == 0 => 0.0,
            MutationRate::PerSequence(mu) => mu / len as f64,
        };
        if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 1.0) }
    }
}

/// Returns a copy of `sequence` in which every position, independently with probability
/// `mutation_rate`, is replaced by a uniformly drawn symbol of `alphabet`.
///
/// The drawn symbol may equal the current one, so the effective substitution rate is
/// `mutation_rate * (k - 1) / k` for an alphabet of `k` symbols.
pub fn generate_random_mutant<R: Rng + ?Sized>(
    sequence: &Sequence,
    mutation_rate: f64,
    alphabet: &Alphabet,
    rng: &mut R,
) -> Sequence {
    let rate = if mutation_rate.is_nan() {
        0.0
    } else {
        mutation_rate.clamp(0.0, 1.0)
    };
    let symbols = alphabet.symbols();
    let mutant: Vec<u8> = sequence
        .as_bytes()
        .iter()
        .map(|&current| {
            if rng.random::<f64>() < rate {
                symbols[rng.random_range(0..symbols.len())]
            } else {
                current
            }
        })
        .collect();
    Sequence::from_bytes(mutant)
}

/// A `Mutator` derives a new candidate sequence from an existing one.
///
/// # Type Parameters
/// * `R`: The random number generator used for mutation decisions.
pub trait Mutator<R: Rng + ?Sized> {
    fn mutate(&mut self, sequence: &Sequence, alphabet: &Alphabet, rng: &mut R) -> Sequence;
}

/// Point mutations at a fixed [`MutationRate`]; the workhorse of every explorer here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointMutator {
    pub rate: MutationRate,
}

impl PointMutator {
    pub fn new(rate: MutationRate) -> Self {
        Self { rate }
    }

    /// `mu` expected substitutions per sequence.
    pub fn per_sequence(mu: f64) -> Self {
        Self::new(MutationRate::PerSequence(mu))
    }
}

impl<R: Rng + ?Sized> Mutator<R> for PointMutator {
    fn mutate(&mut self, sequence: &Sequence, alphabet: &Alphabet, rng: &mut R) -> Sequence {
        let rate = self.rate.per_site(sequence.len());
        generate_random_mutant(sequence, rate, alphabet, rng)
    }
}
