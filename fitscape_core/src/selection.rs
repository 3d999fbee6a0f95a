use rand::Rng;
use rand_core::RngCore;
use thiserror::Error;

/// Errors that can occur while picking parents from a population.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SelectionError {
    /// The population is empty, so there is nothing to select.
    #[error("Population is empty, cannot select a parent")]
    EmptyPopulation,
    /// The weights do not form a usable distribution (non-finite or all zero).
    #[error("Selection weights do not sum to a positive finite value")]
    InvalidWeights,
}

/// A `Selector` picks the index of the next parent in a population.
pub trait Selector: Send + Sync {
    /// Returns the index of the selected individual.
    fn select(&self, rng: &mut dyn RngCore) -> Result<usize, SelectionError>;

    /// Number of individuals the selector chooses among.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Picks every individual with equal probability; no selection pressure.
#[derive(Debug, Clone, Copy)]
pub struct UniformSelector {
    len: usize,
}

impl UniformSelector {
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl Selector for UniformSelector {
    fn select(&self, rng: &mut dyn RngCore) -> Result<usize, SelectionError> {
        if self.len == 0 {
            return Err(SelectionError::EmptyPopulation);
        }
        Ok(rng.random_range(0..self.len))
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// Inverse-CDF sampling over a discrete distribution.
///
/// A uniform draw `u` maps to the first index whose cumulative weight is `>= u`
/// ("left" search), so a draw landing exactly on a boundary selects the individual
/// that closes that boundary.
#[derive(Debug, Clone)]
pub struct CumulativeSelector {
    cumulative: Vec<f64>,
}

impl CumulativeSelector {
    /// Builds the selector from non-negative weights; they need not be normalised.
    pub fn new(weights: &[f64]) -> Result<Self, SelectionError> {
        if weights.is_empty() {
            return Err(SelectionError::EmptyPopulation);
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(SelectionError::InvalidWeights);
        }
        let total: f64 = weights.iter().sum();
        if !(total > 0.0 && total.is_finite()) {
            return Err(SelectionError::InvalidWeights);
        }
        let mut running = 0.0;
        let cumulative = weights
            .iter()
            .map(|w| {
                running += w / total;
                running
            })
            .collect();
        Ok(Self { cumulative })
    }

    pub fn cumulative(&self) -> &[f64] {
        &self.cumulative
    }

    /// Index for a given uniform draw in `[0, 1)`.
    pub fn index_for(&self, u: f64) -> usize {
        let idx = self.cumulative.partition_point(|&c| c < u);
        // Rounding can leave the last cumulative value a hair below 1.
        idx.min(self.cumulative.len() - 1)
    }
}

impl Selector for CumulativeSelector {
    fn select(&self, rng: &mut dyn RngCore) -> Result<usize, SelectionError> {
        Ok(self.index_for(rng.random::<f64>()))
    }

    fn len(&self) -> usize {
        self.cumulative.len()
    }
}

/// Boltzmann selection weights: `exp(score * beta)` normalised to sum to one.
///
/// Evaluated in max-shifted form, which is the same distribution but cannot overflow
/// for large `beta`. As `beta -> 0` the weights approach uniform.
pub fn boltzmann_weights(scores: &[f64], beta: f64) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let scaled: Vec<f64> = scores.iter().map(|s| s * beta).collect();
    let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scaled.iter().map(|s| (s - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    #[test]
    fn uniform_selector_on_empty_population_returns_error() {
        let selector = UniformSelector::new(0);
        let mut rng = ChaCha8Rng::from_seed([0; 32]);
        match selector.select(&mut rng) {
            Err(SelectionError::EmptyPopulation) => {}
            other => panic!("Expected EmptyPopulation, got {:?}", other),
        }
    }

    #[test]
    fn uniform_selector_reaches_every_index() {
        let selector = UniformSelector::new(3);
        let mut rng = ChaCha8Rng::from_seed([1; 32]);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..60 {
            let id = selector.select(&mut rng).unwrap();
            assert!(id < 3, "Selected index {} out of bounds", id);
            seen.insert(id);
        }
        assert_eq!(seen.len(), 3, "All indices should be selected over 60 draws");
    }

    #[test]
    fn cumulative_selector_uses_left_boundary_policy() {
        let selector = CumulativeSelector::new(&[1.0, 1.0, 2.0]).unwrap();
        assert_eq!(selector.cumulative(), &[0.25, 0.5, 1.0]);
        assert_eq!(selector.index_for(0.0), 0);
        assert_eq!(selector.index_for(0.25), 0, "Boundary draw belongs to the left bin");
        assert_eq!(selector.index_for(0.2500001), 1);
        assert_eq!(selector.index_for(0.5), 1);
        assert_eq!(selector.index_for(0.99), 2);
        assert_eq!(selector.index_for(1.5), 2, "Out-of-range draws clamp to the last bin");
    }

    #[test]
    fn cumulative_selector_never_picks_zero_weight_interior_bins() {
        let selector = CumulativeSelector::new(&[1.0, 0.0, 1.0]).unwrap();
        let mut rng = ChaCha8Rng::from_seed([2; 32]);
        for _ in 0..200 {
            assert_ne!(selector.select(&mut rng).unwrap(), 1);
        }
    }

    #[test]
    fn cumulative_selector_rejects_degenerate_weights() {
        assert_eq!(
            CumulativeSelector::new(&[]).unwrap_err(),
            SelectionError::EmptyPopulation
        );
        assert_eq!(
            CumulativeSelector::new(&[0.0, 0.0]).unwrap_err(),
            SelectionError::InvalidWeights
        );
        assert_eq!(
            CumulativeSelector::new(&[f64::NAN, 1.0]).unwrap_err(),
            SelectionError::InvalidWeights
        );
    }

    #[test]
    fn boltzmann_weights_favour_higher_scores() {
        let weights = boltzmann_weights(&[0.0, 1.0, 2.0], 1.0);
        assert!(weights[0] < weights[1] && weights[1] < weights[2]);
        let large_beta = boltzmann_weights(&[0.0, 1.0, 2.0], 100.0);
        assert!(large_beta[2] > 0.999, "Large beta should be nearly greedy");
        assert!(large_beta.iter().all(|w| w.is_finite()));
    }

    #[test]
    fn boltzmann_weights_approach_uniform_as_beta_vanishes() {
        let weights = boltzmann_weights(&[0.0, 5.0, 50.0, 500.0], 1e-9);
        for w in weights {
            assert!((w - 0.25).abs() < 1e-6, "Expected near-uniform weight, got {}", w);
        }
    }

    proptest! {
        #[test]
        fn boltzmann_weights_sum_to_one(
            scores in prop::collection::vec(-50.0f64..50.0, 1..40),
            beta in 0.0f64..200.0,
        ) {
            let weights = boltzmann_weights(&scores, beta);
            let total: f64 = weights.iter().sum();
            prop_assert!((total - 1.0).abs() < 1e-9);
            prop_assert!(weights.iter().all(|w| *w >= 0.0));
        }
    }
}
