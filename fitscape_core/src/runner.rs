//! Round-driven experiment runner. Unlike [`crate::explorer::Explorer`], the runner
//! owns the ground-truth landscape and a cumulative measurement table; proposers only
//! see the table and the surrogate.

use crate::explorer::{ExplorerError, check_exhaustion};
use crate::landscape::Landscape;
use crate::model::{Model, ModelError};
use crate::mutator::{Mutator, PointMutator};
use crate::novelty::NoveltyFilter;
use crate::recorder::{MeasurementRow, RecorderError, RunMetadata, SnapshotRecorder};
use crate::selection::{Selector, UniformSelector};
use crate::sequence::{Alphabet, Sequence};
use log::info;
use rand_core::RngCore;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error(
        "Proposed {proposed} sequences but at most {budget} ground-truth measurements are allowed per round"
    )]
    TooManyProposals { proposed: usize, budget: usize },
    #[error("A run needs at least one initial sequence")]
    NoInitialSequences,
    #[error("Model operation failed: {0}")]
    Model(#[from] ModelError),
    #[error("Writing the run snapshot failed: {0}")]
    Recorder(#[from] RecorderError),
    #[error("Proposal failed: {0}")]
    Explorer(#[from] ExplorerError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSettings {
    pub rounds: usize,
    pub ground_truth_measurements_per_round: usize,
    pub model_queries_per_round: usize,
    /// Snapshot log rewritten after every round.
    pub log_file: Option<PathBuf>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            rounds: 10,
            ground_truth_measurements_per_round: 100,
            model_queries_per_round: 1000,
            log_file: None,
        }
    }
}

impl RunnerSettings {
    pub fn budget(&self) -> RoundBudget {
        RoundBudget {
            ground_truth_measurements: self.ground_truth_measurements_per_round,
            model_queries: self.model_queries_per_round,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundBudget {
    pub ground_truth_measurements: usize,
    pub model_queries: usize,
}

/// Proposes one round of sequences together with the model's predictions for them.
pub trait BatchProposer {
    fn name(&self) -> String;

    fn propose_sequences(
        &mut self,
        measured: &[MeasurementRow],
        model: &mut dyn Model,
        budget: RoundBudget,
        rng: &mut dyn RngCore,
    ) -> Result<(Vec<Sequence>, Vec<f64>), RunnerError>;
}

/// Screens more than `model_queries` unseen mutants of the table's sequences and keeps
/// the `ground_truth_measurements` best predicted ones.
#[derive(Debug, Clone)]
pub struct RandomProposer {
    pub mu: f64,
    pub alphabet: Alphabet,
    pub max_attempts: usize,
}

impl RandomProposer {
    pub fn new(mu: f64, alphabet: Alphabet) -> Self {
        Self {
            mu,
            alphabet,
            max_attempts: crate::explorer::DEFAULT_MAX_PROPOSAL_ATTEMPTS,
        }
    }
}

impl BatchProposer for RandomProposer {
    fn name(&self) -> String {
        format!("Random_mu{}", self.mu)
    }

    fn propose_sequences(
        &mut self,
        measured: &[MeasurementRow],
        model: &mut dyn Model,
        budget: RoundBudget,
        rng: &mut dyn RngCore,
    ) -> Result<(Vec<Sequence>, Vec<f64>), RunnerError> {
        if measured.is_empty() {
            return Err(ExplorerError::EmptyPopulation.into());
        }
        let selector = UniformSelector::new(measured.len());
        let mut mutator = PointMutator::per_sequence(self.mu);
        let mut filter = NoveltyFilter::seeded(measured.iter().map(|row| &row.sequence));

        let target = budget.model_queries + 1;
        let mut new_seqs = Vec::with_capacity(target);
        let mut attempts = 0;
        while new_seqs.len() < target && attempts < self.max_attempts {
            attempts += 1;
            let parent = &measured[selector.select(&mut *rng).map_err(ExplorerError::from)?].sequence;
            let candidate = mutator.mutate(parent, &self.alphabet, rng);
            if filter.report_interesting(&candidate) {
                new_seqs.push(candidate);
            }
        }
        let new_seqs = check_exhaustion(new_seqs, target, attempts)?;

        let preds = model.get_fitnesses(&new_seqs)?;
        let mut ranked: Vec<(f64, Sequence)> = preds.into_iter().zip(new_seqs).collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        ranked.truncate(budget.ground_truth_measurements);
        Ok(ranked.into_iter().map(|(p, s)| (s, p)).unzip())
    }
}

/// Drives a [`BatchProposer`] for a number of rounds against a landscape.
pub struct RoundRunner {
    model: Box<dyn Model>,
    landscape: Arc<dyn Landscape>,
    initial_sequences: Vec<Sequence>,
    settings: RunnerSettings,
    rows: Vec<MeasurementRow>,
}

impl RoundRunner {
    pub fn new(
        model: Box<dyn Model>,
        landscape: Arc<dyn Landscape>,
        initial_sequences: Vec<Sequence>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            model,
            landscape,
            initial_sequences,
            settings,
            rows: Vec::new(),
        }
    }

    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// The cumulative table so far.
    pub fn measurements(&self) -> &[MeasurementRow] {
        &self.rows
    }

    /// Round 0 records the initial sequences. Every later round trains the model on the
    /// table, asks `proposer` for a batch and measures it on the landscape.
    pub fn run<P: BatchProposer + ?Sized>(
        &mut self,
        proposer: &mut P,
        rng: &mut dyn RngCore,
        verbose: bool,
    ) -> Result<(Vec<MeasurementRow>, RunMetadata), RunnerError> {
        if self.initial_sequences.is_empty() {
            return Err(RunnerError::NoInitialSequences);
        }
        let evals_at_start = self.model.evals();
        let metadata = RunMetadata {
            run_id: run_id(),
            exp_name: proposer.name(),
            model_name: self.model.model_type().to_string(),
            landscape_name: self.landscape.name().to_string(),
            rounds: self.settings.rounds,
            ground_truth_measurements_per_round: self.settings.ground_truth_measurements_per_round,
            model_queries_per_round: self.settings.model_queries_per_round,
        };

        let initial_scores = self.landscape.get_fitnesses(&self.initial_sequences);
        let measurement_cost = self.initial_sequences.len();
        self.rows = self
            .initial_sequences
            .iter()
            .zip(&initial_scores)
            .map(|(sequence, &true_score)| MeasurementRow {
                sequence: sequence.clone(),
                model_score: None,
                true_score,
                round: 0,
                model_cost: 0,
                measurement_cost,
            })
            .collect();
        self.log(&metadata, 0, &initial_scores, verbose)?;

        let budget = self.settings.budget();
        for round in 1..=self.settings.rounds {
            let (sequences, scores): (Vec<Sequence>, Vec<f64>) = self
                .rows
                .iter()
                .map(|row| (row.sequence.clone(), row.true_score))
                .unzip();
            self.model.train(&sequences, &scores)?;

            let (proposals, preds) =
                proposer.propose_sequences(&self.rows, self.model.as_mut(), budget, rng)?;
            if proposals.len() > budget.ground_truth_measurements {
                return Err(RunnerError::TooManyProposals {
                    proposed: proposals.len(),
                    budget: budget.ground_truth_measurements,
                });
            }
            if preds.len() != proposals.len() {
                return Err(ModelError::LengthMismatch {
                    sequences: proposals.len(),
                    scores: preds.len(),
                }
                .into());
            }

            let true_scores = self.landscape.get_fitnesses(&proposals);
            let model_cost = self.model.evals() - evals_at_start;
            let measurement_cost = self.rows.len() + proposals.len();
            self.rows.extend(proposals.into_iter().zip(preds).zip(&true_scores).map(
                |((sequence, pred), &true_score)| MeasurementRow {
                    sequence,
                    model_score: Some(pred),
                    true_score,
                    round,
                    model_cost,
                    measurement_cost,
                },
            ));
            self.log(&metadata, round, &true_scores, verbose)?;
        }
        Ok((self.rows.clone(), metadata))
    }

    fn log(&self, metadata: &RunMetadata, round: usize, true_scores: &[f64], verbose: bool) -> Result<(), RunnerError> {
        if let Some(path) = &self.settings.log_file {
            SnapshotRecorder::new(path).write(metadata, &self.rows)?;
        }
        if verbose {
            let top = true_scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            info!("round: {}, top: {}", round, top);
        }
        Ok(())
    }
}

/// Local wall-clock time of the run, `HH:MM:SS-mm/dd/YYYY`.
fn run_id() -> String {
    chrono::Local::now().format("%H:%M:%S-%m/%d/%Y").to_string()
}
