use crate::explorer::{ExplorerError, ProposalContext, ProposalStrategy};
use crate::mutator::{Mutator, PointMutator};
use crate::selection::{Selector, UniformSelector};
use crate::sequence::Sequence;

/// Mutation-only baseline: mutants of uniformly drawn measured sequences, no selection.
#[derive(Debug, Clone, Copy)]
pub struct RandomMutagenesis {
    pub mu: f64,
}

impl RandomMutagenesis {
    pub fn new(mu: f64) -> Self {
        Self { mu }
    }
}

impl ProposalStrategy for RandomMutagenesis {
    fn name(&self) -> String {
        format!("Random_mu{}", self.mu)
    }

    fn propose(&mut self, ctx: &mut ProposalContext<'_>) -> Result<Vec<Sequence>, ExplorerError> {
        let parents: Vec<Sequence> = ctx.model.measured_sequences().keys().cloned().collect();
        if parents.is_empty() {
            return Err(ExplorerError::EmptyPopulation);
        }
        let selector = UniformSelector::new(parents.len());
        let mut mutator = PointMutator::per_sequence(self.mu);
        let alphabet = ctx.alphabet;
        ctx.collect_novel(ctx.batch_size, |rng| {
            let parent = &parents[selector.select(&mut *rng)?];
            Ok(mutator.mutate(parent, alphabet, rng))
        })
    }
}
