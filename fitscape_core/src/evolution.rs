//! Population-genetics explorers: Wright-Fisher, model-screened Wright-Fisher and Moran.
//!
//! All of them share [`EvolutionParams`]: a per-sequence mutation rate `mu`, `rho`
//! rounds of recombination at per-site switch probability `recomb_rate`, and the
//! Boltzmann selection strength `beta`.

use crate::explorer::{ExplorerError, ProposalContext, ProposalStrategy};
use crate::model::Model;
use crate::mutator::generate_random_mutant;
use crate::selection::{CumulativeSelector, Selector, UniformSelector, boltzmann_weights};
use crate::sequence::{Alphabet, Sequence};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct EvolutionParams {
    #[serde(default = "default_mu")]
    pub mu: f64,
    #[serde(default = "default_rho")]
    pub rho: usize,
    #[serde(default)]
    pub recomb_rate: f64,
    #[serde(default = "default_beta")]
    pub beta: f64,
}

fn default_mu() -> f64 {
    1.0
}
fn default_rho() -> usize {
    1
}
fn default_beta() -> f64 {
    100.0
}

impl Default for EvolutionParams {
    fn default() -> Self {
        Self {
            mu: default_mu(),
            rho: default_rho(),
            recomb_rate: 0.0,
            beta: default_beta(),
        }
    }
}

impl EvolutionParams {
    fn tag(&self) -> String {
        format!(
            "mu{}_r{}_rho{}_beta{}",
            self.mu, self.recomb_rate, self.rho, self.beta
        )
    }

    /// Boltzmann selection probabilities of `sequences` under the model.
    pub fn compute_fitnesses(
        &self,
        sequences: &[Sequence],
        model: &mut dyn Model,
    ) -> Result<Vec<f64>, ExplorerError> {
        let scores = model.get_fitnesses(sequences)?;
        Ok(boltzmann_weights(&scores, self.beta))
    }

    /// Two recombinant children of `first` and `second`. Walking the positions, the
    /// parent feeding each child switches with probability `recomb_rate` per site.
    /// Positions past the shorter parent stay with their own parent's child.
    pub fn recombine<R: Rng + ?Sized>(
        &self,
        first: &Sequence,
        second: &Sequence,
        rng: &mut R,
    ) -> (Sequence, Sequence) {
        let (a, b) = (first.as_bytes(), second.as_bytes());
        let mut child_a = Vec::with_capacity(a.len());
        let mut child_b = Vec::with_capacity(b.len());
        let mut flipped = false;
        for (&sa, &sb) in a.iter().zip(b) {
            if rng.random::<f64>() < self.recomb_rate {
                flipped = !flipped;
            }
            if flipped {
                child_a.push(sb);
                child_b.push(sa);
            } else {
                child_a.push(sa);
                child_b.push(sb);
            }
        }
        let shared = a.len().min(b.len());
        child_a.extend_from_slice(&a[shared..]);
        child_b.extend_from_slice(&b[shared..]);
        (Sequence::from_bytes(child_a), Sequence::from_bytes(child_b))
    }

    /// Shuffles the population and recombines consecutive pairs. With an odd count the
    /// individual left over after shuffling passes through unchanged.
    pub fn recombine_population<R: Rng + ?Sized>(
        &self,
        mut population: Vec<Sequence>,
        rng: &mut R,
    ) -> Vec<Sequence> {
        population.shuffle(rng);
        let mut next = Vec::with_capacity(population.len());
        for pair in population.chunks(2) {
            match pair {
                [a, b] => {
                    let (x, y) = self.recombine(a, b, rng);
                    next.push(x);
                    next.push(y);
                }
                [single] => next.push(single.clone()),
                _ => unreachable!("chunks(2) yields one or two items"),
            }
        }
        next
    }

    fn mutate<R: Rng + ?Sized>(&self, parent: &Sequence, alphabet: &Alphabet, rng: &mut R) -> Sequence {
        let rate = if parent.is_empty() {
            0.0
        } else {
            self.mu / parent.len() as f64
        };
        generate_random_mutant(parent, rate, alphabet, rng)
    }

    /// `count` fitness-weighted draws from `population`, each mutated.
    fn replicate(
        &self,
        population: &[Sequence],
        count: usize,
        ctx: &mut ProposalContext<'_>,
    ) -> Result<Vec<Sequence>, ExplorerError> {
        let weights = self.compute_fitnesses(population, ctx.model)?;
        let selector = CumulativeSelector::new(&weights)?;
        let mut replicated = Vec::with_capacity(count);
        for _ in 0..count {
            let picked = selector.select(ctx.rng)?;
            replicated.push(self.mutate(&population[picked], ctx.alphabet, ctx.rng));
        }
        Ok(replicated)
    }

    /// `rho` successive rounds of population recombination, if recombination is on.
    fn recombine_rounds(&self, mut population: Vec<Sequence>, ctx: &mut ProposalContext<'_>) -> Vec<Sequence> {
        if self.recomb_rate > 0.0 {
            for _ in 0..self.rho {
                population = self.recombine_population(population, ctx.rng);
            }
        }
        population
    }
}

/// Repeats the first individual until the population holds `size` members.
///
/// This biases the first generation toward that individual when the previous batch
/// was small.
pub fn pad_population(mut population: Vec<Sequence>, size: usize) -> Vec<Sequence> {
    if let Some(first) = population.first().cloned() {
        while population.len() < size {
            population.push(first.clone());
        }
    }
    population
}

/// One Wright-Fisher generation: fitness-weighted resampling of the last batch,
/// mutation and optional recombination.
#[derive(Debug, Clone, Default)]
pub struct WrightFisher {
    pub params: EvolutionParams,
}

impl WrightFisher {
    pub fn new(params: EvolutionParams) -> Self {
        Self { params }
    }
}

impl ProposalStrategy for WrightFisher {
    fn name(&self) -> String {
        format!("WF_{}", self.params.tag())
    }

    fn propose(&mut self, ctx: &mut ProposalContext<'_>) -> Result<Vec<Sequence>, ExplorerError> {
        let population = pad_population(ctx.population()?, ctx.batch_size);
        let replicated = self.params.replicate(&population, ctx.batch_size, ctx)?;
        let mut next = self.params.recombine_rounds(replicated, ctx);
        next.truncate(ctx.batch_size);
        Ok(next)
    }
}

/// Wright-Fisher with a model screen: breeds `batch_size * virtual_screen` candidates
/// and keeps the `batch_size` the model likes best.
#[derive(Debug, Clone, Default)]
pub struct MlWrightFisher {
    pub params: EvolutionParams,
}

impl MlWrightFisher {
    pub fn new(params: EvolutionParams) -> Self {
        Self { params }
    }

    /// The `batch_size` distinct sequences with the highest predictions. Equal
    /// predictions are ordered by sequence, descending.
    pub fn sub_sample(
        &self,
        sequences: &[Sequence],
        batch_size: usize,
        model: &mut dyn Model,
    ) -> Result<Vec<Sequence>, ExplorerError> {
        let unique = dedup_in_order(sequences.iter().cloned());
        let scores = model.get_fitnesses(&unique)?;
        let mut scored: Vec<(f64, Sequence)> = scores.into_iter().zip(unique).collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(scored
            .into_iter()
            .take(batch_size)
            .map(|(_, seq)| seq)
            .collect())
    }
}

impl ProposalStrategy for MlWrightFisher {
    fn name(&self) -> String {
        format!("MLWFG_{}", self.params.tag())
    }

    fn propose(&mut self, ctx: &mut ProposalContext<'_>) -> Result<Vec<Sequence>, ExplorerError> {
        let screen_size = ctx.batch_size * ctx.virtual_screen.max(1);
        let population = pad_population(ctx.population()?, ctx.batch_size);
        let replicated = self.params.replicate(&population, screen_size, ctx)?;
        let recombined = self.params.recombine_rounds(replicated, ctx);

        let mut candidates = dedup_in_order(recombined);
        candidates.truncate(screen_size);
        self.sub_sample(&candidates, ctx.batch_size, ctx.model)
    }
}

/// Moran birth-death process. Each event picks a parent by Boltzmann weight, mutates
/// (and optionally recombines) its offspring, and replaces a uniformly chosen member
/// with it. The offspring of `batch_size` events are proposed.
#[derive(Debug, Clone, Default)]
pub struct Moran {
    pub params: EvolutionParams,
}

impl Moran {
    pub fn new(params: EvolutionParams) -> Self {
        Self { params }
    }
}

impl ProposalStrategy for Moran {
    fn name(&self) -> String {
        format!("Moran_{}", self.params.tag())
    }

    fn propose(&mut self, ctx: &mut ProposalContext<'_>) -> Result<Vec<Sequence>, ExplorerError> {
        let mut population = pad_population(ctx.population()?, ctx.batch_size);
        let mut scores = ctx.model.get_fitnesses(&population)?;
        let death = UniformSelector::new(population.len());
        let mut offspring = Vec::with_capacity(ctx.batch_size);

        for _ in 0..ctx.batch_size {
            let weights = boltzmann_weights(&scores, self.params.beta);
            let birth = CumulativeSelector::new(&weights)?;
            let parent = birth.select(ctx.rng)?;
            let mut child = self.params.mutate(&population[parent], ctx.alphabet, ctx.rng);
            if self.params.recomb_rate > 0.0 {
                let mate = birth.select(ctx.rng)?;
                child = self.params.recombine(&child, &population[mate], ctx.rng).0;
            }
            let child_score = ctx.model.get_fitness(&child)?;
            let dying = death.select(ctx.rng)?;
            population[dying] = child.clone();
            scores[dying] = child_score;
            offspring.push(child);
        }
        Ok(offspring)
    }
}

fn dedup_in_order(sequences: impl IntoIterator<Item = Sequence>) -> Vec<Sequence> {
    let mut seen = HashSet::new();
    sequences
        .into_iter()
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explorer::test_utils::{g_count_model, seqs};
    use crate::explorer::{Explorer, ExplorerSettings};
    use crate::history::BatchHistory;
    use proptest::prelude::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    fn params(mu: f64, recomb_rate: f64, beta: f64) -> EvolutionParams {
        EvolutionParams {
            mu,
            rho: 1,
            recomb_rate,
            beta,
        }
    }

    /// Runs one proposal of `strategy` against a fresh model holding `start`.
    fn propose_once<S: ProposalStrategy>(
        strategy: &mut S,
        start: &[&str],
        batch_size: usize,
        virtual_screen: usize,
        seed: u64,
    ) -> Vec<Sequence> {
        let mut model = g_count_model(start, 0.0);
        let alphabet = Alphabet::rna();
        let batches = BatchHistory::new();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut ctx = ProposalContext {
            alphabet: &alphabet,
            batch_size,
            virtual_screen,
            max_proposal_attempts: 1000,
            batches: &batches,
            model: model.as_mut(),
            rng: &mut rng,
        };
        strategy.propose(&mut ctx).unwrap()
    }

    #[test]
    fn compute_fitnesses_is_normalised_and_ordered() {
        let mut model = g_count_model(&["GGGG", "GGAA", "AAAA"], 0.0);
        let evo = params(1.0, 0.0, 1.0);
        let weights = evo
            .compute_fitnesses(&seqs(&["AAAA", "GGAA", "GGGG"]), model.as_mut())
            .unwrap();
        let total: f64 = weights.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!(weights[0] < weights[1] && weights[1] < weights[2]);

        let neutral = params(1.0, 0.0, 1e-12)
            .compute_fitnesses(&seqs(&["AAAA", "GGAA", "GGGG"]), model.as_mut())
            .unwrap();
        for w in neutral {
            assert!((w - 1.0 / 3.0).abs() < 1e-9, "beta -> 0 should be neutral drift");
        }
    }

    #[test]
    fn recombine_without_switches_returns_parents() {
        let mut rng = ChaCha8Rng::from_seed([0; 32]);
        let (a, b) = params(1.0, 0.0, 1.0).recombine(
            &Sequence::from("AAAA"),
            &Sequence::from("GGGG"),
            &mut rng,
        );
        assert_eq!(a, Sequence::from("AAAA"));
        assert_eq!(b, Sequence::from("GGGG"));
    }

    #[test]
    fn recombine_with_certain_switch_alternates_sites() {
        let mut rng = ChaCha8Rng::from_seed([0; 32]);
        let (a, b) = params(1.0, 1.0, 1.0).recombine(
            &Sequence::from("AAAA"),
            &Sequence::from("GGGG"),
            &mut rng,
        );
        assert_eq!(a, Sequence::from("GAGA"));
        assert_eq!(b, Sequence::from("AGAG"));
    }

    #[test]
    fn recombine_keeps_unequal_tails() {
        let mut rng = ChaCha8Rng::from_seed([0; 32]);
        let (a, b) = params(1.0, 0.0, 1.0).recombine(
            &Sequence::from("AAAAUU"),
            &Sequence::from("GGGG"),
            &mut rng,
        );
        assert_eq!(a.len(), 6);
        assert_eq!(b.len(), 4);
    }

    #[test]
    fn odd_population_carries_one_individual_over() {
        let mut rng = ChaCha8Rng::from_seed([5; 32]);
        let population = seqs(&["AAAA", "GGGG", "UUUU"]);
        let next = params(1.0, 0.5, 1.0).recombine_population(population.clone(), &mut rng);
        assert_eq!(next.len(), 3);
        assert!(
            population.contains(&next[2]),
            "Unpaired individual should pass through unchanged"
        );
    }

    #[test]
    fn pad_population_repeats_first_member() {
        let padded = pad_population(seqs(&["GA", "UU"]), 4);
        assert_eq!(padded, seqs(&["GA", "UU", "GA", "GA"]));
        assert!(pad_population(Vec::new(), 3).is_empty());
    }

    #[test]
    fn wright_fisher_returns_exactly_batch_size() {
        let mut wf = WrightFisher::new(params(1.0, 0.0, 100.0));
        let proposals = propose_once(&mut wf, &["UCGAUCGA"], 4, 0, 9);
        assert_eq!(proposals.len(), 4);
        for seq in &proposals {
            assert_eq!(seq.len(), 8);
            assert!(Alphabet::rna().validate(seq).is_ok());
        }
    }

    #[test]
    fn wright_fisher_is_reproducible_under_a_fixed_seed() {
        let mut wf = WrightFisher::new(params(2.0, 0.2, 1.0));
        let a = propose_once(&mut wf, &["UCGAUCGA", "GGGGAAAA"], 6, 0, 42);
        let b = propose_once(&mut wf, &["UCGAUCGA", "GGGGAAAA"], 6, 0, 42);
        assert_eq!(a, b);
        assert_eq!(a.len(), 6, "Recombination must not change the batch size");
    }

    #[test]
    fn wright_fisher_round_measures_filtered_proposals() {
        let settings = ExplorerSettings {
            batch_size: 4,
            alphabet: Alphabet::new("UCGA").unwrap(),
            virtual_screen: 0,
            debug: true,
            seed: 3,
            ..ExplorerSettings::default()
        };
        let mut explorer = Explorer::new(WrightFisher::new(params(1.0, 0.0, 100.0)), settings);
        explorer
            .set_model(g_count_model(&["UCGAUCGAUCGA"], 0.0), true)
            .unwrap();
        let start = Sequence::from("UCGAUCGAUCGA");
        let raw = propose_once(&mut WrightFisher::new(params(1.0, 0.0, 100.0)), &["UCGAUCGAUCGA"], 4, 0, 3);
        assert_eq!(raw.len(), 4, "The strategy itself breeds a full batch");

        // The explorer drops duplicates and measured parents, so fewer may survive.
        let proposals = explorer.propose_samples().unwrap();
        assert!(!proposals.is_empty() && proposals.len() <= 4);
        for seq in &proposals {
            assert_eq!(seq.len(), start.len());
            assert_ne!(seq, &start, "Unmutated copies of measured parents are dropped");
        }
        explorer.measure_proposals(proposals.clone()).unwrap();
        assert_eq!(explorer.get_last_batch(), Some(1));
        assert_eq!(explorer.batches().get(1).unwrap().len(), proposals.len());
    }

    #[test]
    fn ml_wright_fisher_keeps_best_predictions() {
        let mut mlwf = MlWrightFisher::new(params(2.0, 0.0, 1.0));
        let proposals = propose_once(&mut mlwf, &["UCGAUCGA"], 3, 10, 7);
        assert!(proposals.len() <= 3);
        let unique: HashSet<&Sequence> = proposals.iter().collect();
        assert_eq!(unique.len(), proposals.len(), "Screened proposals are distinct");
        let g_counts: Vec<usize> = proposals.iter().map(|s| s.count(b'G')).collect();
        assert!(
            g_counts.windows(2).all(|w| w[0] >= w[1]),
            "Proposals should be sorted by predicted fitness, got {:?}",
            g_counts
        );
    }

    #[test]
    fn sub_sample_breaks_ties_by_sequence() {
        let mut model = g_count_model(&["AAAA"], 0.0);
        let mlwf = MlWrightFisher::default();
        let picked = mlwf
            .sub_sample(&seqs(&["GAAA", "AGAA", "GGAA", "AGAA"]), 2, model.as_mut())
            .unwrap();
        assert_eq!(picked, seqs(&["GGAA", "GAAA"]));
    }

    #[test]
    fn moran_returns_batch_size_offspring() {
        let mut moran = Moran::new(params(1.0, 0.3, 10.0));
        let proposals = propose_once(&mut moran, &["UCGAUCGA", "GGGGGGGG"], 5, 0, 11);
        assert_eq!(proposals.len(), 5);
        assert!(proposals.iter().all(|s| s.len() == 8));
        assert!(moran.name().starts_with("Moran_mu1_r0.3"));
    }

    proptest! {
        #[test]
        fn recombined_sites_come_from_one_pair_of_parents(
            parents in prop::collection::vec("[UCGA]{6}", 2..10),
            rate in 0.0f64..=1.0,
            seed in any::<u64>(),
        ) {
            let population: Vec<Sequence> =
                parents.iter().map(|p| Sequence::from(p.as_str())).collect();
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let next = params(1.0, rate, 1.0).recombine_population(population.clone(), &mut rng);
            prop_assert_eq!(next.len(), population.len());

            for children in next.chunks(2) {
                let [c1, c2] = children else { continue };
                let explained = population.iter().enumerate().any(|(i, p)| {
                    population.iter().enumerate().any(|(j, q)| {
                        i != j && (0..6).all(|k| {
                            let mut kids = [c1.as_bytes()[k], c2.as_bytes()[k]];
                            let mut pair = [p.as_bytes()[k], q.as_bytes()[k]];
                            kids.sort_unstable();
                            pair.sort_unstable();
                            kids == pair
                        })
                    })
                });
                prop_assert!(explained, "Children {:?}/{:?} mix symbols of no parent pair", c1, c2);
            }
        }
    }
}
