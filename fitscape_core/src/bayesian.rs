use crate::explorer::{ExplorerError, ProposalContext, ProposalStrategy};
use crate::model::ModelError;
use crate::mutator::{Mutator, PointMutator};
use crate::selection::{Selector, UniformSelector};
use crate::sequence::Sequence;
use rand_core::RngCore;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Turns a prediction and its uncertainty into a ranking score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "acquisition", rename_all = "kebab-case")]
pub enum Acquisition {
    /// Upper confidence bound, `mean + kappa * std`.
    Ucb { kappa: f64 },
    /// One draw from `Normal(mean, std)`.
    Thompson,
    Greedy,
}

impl Default for Acquisition {
    fn default() -> Self {
        Acquisition::Ucb { kappa: 1.0 }
    }
}

impl fmt::Display for Acquisition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Acquisition::Ucb { kappa } => write!(f, "UCB_k{}", kappa),
            Acquisition::Thompson => write!(f, "Thompson"),
            Acquisition::Greedy => write!(f, "Greedy"),
        }
    }
}

impl Acquisition {
    pub fn score(&self, mean: f64, std: f64, rng: &mut dyn RngCore) -> Result<f64, ModelError> {
        match *self {
            Acquisition::Ucb { kappa } => Ok(mean + kappa * std),
            Acquisition::Thompson => {
                if !(std.is_finite() && std >= 0.0) {
                    return Err(ModelError::Backend(format!(
                        "invalid posterior standard deviation {std} for mean {mean}"
                    )));
                }
                let normal = Normal::new(mean, std)
                    .map_err(|e| ModelError::Backend(format!("invalid posterior ({mean}, {std}): {e}")))?;
                Ok(normal.sample(rng))
            }
            Acquisition::Greedy => Ok(mean),
        }
    }
}

/// Screens `batch_size * virtual_screen` mutants of the best measured sequences and
/// proposes the ones with the highest acquisition score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BayesianOptimization {
    pub mu: f64,
    pub acquisition: Acquisition,
}

impl BayesianOptimization {
    pub fn new(mu: f64, acquisition: Acquisition) -> Self {
        Self { mu, acquisition }
    }
}

impl ProposalStrategy for BayesianOptimization {
    fn name(&self) -> String {
        format!("BO_{}", self.acquisition)
    }

    fn propose(&mut self, ctx: &mut ProposalContext<'_>) -> Result<Vec<Sequence>, ExplorerError> {
        let parents: Vec<Sequence> = ctx
            .measured_by_score()
            .into_iter()
            .take(ctx.batch_size)
            .map(|(s, _)| s)
            .collect();
        if parents.is_empty() {
            return Err(ExplorerError::EmptyPopulation);
        }

        let screen_size = ctx.batch_size * ctx.virtual_screen.max(1);
        let selector = UniformSelector::new(parents.len());
        let mut mutator = PointMutator::per_sequence(self.mu);
        let alphabet = ctx.alphabet;
        let candidates = ctx.collect_novel(screen_size, |rng| {
            let parent = &parents[selector.select(&mut *rng)?];
            Ok(mutator.mutate(parent, alphabet, rng))
        })?;

        let mut scored = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let (mean, std) = ctx.model.predict_with_uncertainty(&candidate)?;
            let score = self.acquisition.score(mean, std, ctx.rng)?;
            scored.push((score, candidate));
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(scored
            .into_iter()
            .take(ctx.batch_size)
            .map(|(_, seq)| seq)
            .collect())
    }
}
