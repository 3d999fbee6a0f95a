use crate::sequence::{Alphabet, Sequence};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;

/// A `Landscape` is the ground-truth fitness oracle over sequences.
///
/// Queries are expensive in the real world (wet-lab assays, folding simulations), which
/// is why explorers only reach it through a [`crate::model::Model`] that counts them.
pub trait Landscape: Send + Sync {
    /// Human-readable, stable identity of the landscape. Used as `landscape_id` in logs.
    fn name(&self) -> &str;

    fn get_fitness(&self, sequence: &Sequence) -> f64;

    fn get_fitnesses(&self, sequences: &[Sequence]) -> Vec<f64> {
        sequences.iter().map(|s| self.get_fitness(s)).collect()
    }
}

/// Fitness is the number of positions holding one symbol, e.g. the count of `G`.
#[derive(Debug, Clone)]
pub struct SymbolCountLandscape {
    symbol: u8,
    name: String,
}

impl SymbolCountLandscape {
    pub fn new(symbol: u8) -> Self {
        Self {
            symbol,
            name: format!("count_{}", symbol as char),
        }
    }
}

impl Landscape for SymbolCountLandscape {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_fitness(&self, sequence: &Sequence) -> f64 {
        sequence.count(self.symbol) as f64
    }
}

/// Fitness is the fraction of positions matching a target sequence.
#[derive(Debug, Clone)]
pub struct HammingLandscape {
    target: Sequence,
    name: String,
}

impl HammingLandscape {
    pub fn new(target: Sequence) -> Self {
        let name = format!("hamming_{}", target.short_id());
        Self { target, name }
    }

    pub fn target(&self) -> &Sequence {
        &self.target
    }
}

impl Landscape for HammingLandscape {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_fitness(&self, sequence: &Sequence) -> f64 {
        if self.target.is_empty() {
            return 0.0;
        }
        let matches = sequence
            .as_bytes()
            .iter()
            .zip(self.target.as_bytes())
            .filter(|(a, b)| a == b)
            .count();
        matches as f64 / self.target.len() as f64
    }
}

/// Additive position-weight matrix drawn from a seed, normalised so the best sequence
/// scores 1 and the worst 0. Positions past the matrix length contribute nothing.
#[derive(Debug, Clone)]
pub struct PositionWeightLandscape {
    alphabet: Alphabet,
    weights: Vec<Vec<f64>>,
    min_total: f64,
    span: f64,
    name: String,
}

impl PositionWeightLandscape {
    pub fn random(alphabet: Alphabet, length: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let weights: Vec<Vec<f64>> = (0..length)
            .map(|_| {
                (0..alphabet.len())
                    .map(|_| rng.random_range(-1.0..1.0))
                    .collect()
            })
            .collect();
        let fold = |pick: fn(f64, f64) -> f64, init: f64| -> f64 {
            weights
                .iter()
                .map(|row| row.iter().copied().fold(init, pick))
                .sum()
        };
        let min_total = fold(f64::min, f64::INFINITY);
        let max_total = fold(f64::max, f64::NEG_INFINITY);
        let span = (max_total - min_total).max(f64::EPSILON);
        Self {
            alphabet,
            weights,
            min_total,
            span,
            name: format!("pwm_L{}_s{}", length, seed),
        }
    }
}

impl Landscape for PositionWeightLandscape {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_fitness(&self, sequence: &Sequence) -> f64 {
        if self.weights.is_empty() {
            return 0.0;
        }
        let mut total = 0.0;
        for (row, &symbol) in self.weights.iter().zip(sequence.as_bytes()) {
            match self.alphabet.index_of(symbol) {
                Some(i) => total += row[i],
                // Foreign symbols score as the worst choice at that site.
                None => total += row.iter().copied().fold(f64::INFINITY, f64::min),
            }
        }
        // Missing positions also take the worst choice.
        for row in self.weights.iter().skip(sequence.len()) {
            total += row.iter().copied().fold(f64::INFINITY, f64::min);
        }
        (total - self.min_total) / self.span
    }
}
