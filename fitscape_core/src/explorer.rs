use crate::history::{Batch, BatchEntry, BatchHistory};
use crate::model::{Model, ModelError};
use crate::novelty::NoveltyFilter;
use crate::recorder::{BatchCsvRecorder, BatchLogContext, RecorderError};
use crate::selection::SelectionError;
use crate::sequence::{Alphabet, Sequence, SequenceError};
use log::{debug, info, warn};
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

/// Default cap on draws spent looking for unseen sequences in a single proposal.
pub const DEFAULT_MAX_PROPOSAL_ATTEMPTS: usize = 10_000;

#[derive(Error, Debug)]
pub enum ExplorerError {
    #[error("No model bound to the explorer; call set_model before running")]
    ModelNotSet,
    #[error("No population to propose from: no batches and no measured sequences")]
    EmptyPopulation,
    #[error(
        "Search space exhausted: found {found} of {requested} new sequences after {attempts} attempts"
    )]
    SearchSpaceExhausted {
        found: usize,
        requested: usize,
        attempts: usize,
    },
    #[error("Model operation failed: {0}")]
    Model(#[from] ModelError),
    #[error("Parent selection failed: {0}")]
    Selection(#[from] SelectionError),
    #[error("Writing the batch log failed: {0}")]
    Recorder(#[from] RecorderError),
    #[error("Invalid sequence: {0}")]
    Sequence(#[from] SequenceError),
}

/// Settings shared by every explorer regardless of strategy.
#[derive(Debug, Clone)]
pub struct ExplorerSettings {
    pub batch_size: usize,
    pub alphabet: Alphabet,
    /// Model-only evaluations allowed per ground-truth measurement.
    pub virtual_screen: usize,
    /// Directory the batch log is written to.
    pub path: PathBuf,
    /// Skips the batch log entirely.
    pub debug: bool,
    pub seed: u64,
    pub max_proposal_attempts: usize,
}

impl Default for ExplorerSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            alphabet: Alphabet::rna(),
            virtual_screen: 10,
            path: PathBuf::from("./simulations/"),
            debug: false,
            seed: 0,
            max_proposal_attempts: DEFAULT_MAX_PROPOSAL_ATTEMPTS,
        }
    }
}

/// Everything a strategy may look at or consume while proposing one batch.
pub struct ProposalContext<'a> {
    pub alphabet: &'a Alphabet,
    pub batch_size: usize,
    pub virtual_screen: usize,
    pub max_proposal_attempts: usize,
    pub batches: &'a BatchHistory,
    pub model: &'a mut dyn Model,
    pub rng: &'a mut dyn RngCore,
}

impl ProposalContext<'_> {
    /// Measured sequences, best first. Equal scores are ordered by sequence.
    pub fn measured_by_score(&self) -> Vec<(Sequence, f64)> {
        let mut measured: Vec<(Sequence, f64)> = self
            .model
            .measured_sequences()
            .iter()
            .map(|(s, &score)| (s.clone(), score))
            .collect();
        measured.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        measured
    }

    /// The population the next generation is bred from: the newest non-empty batch,
    /// or the measured sequences (best first) before any batch exists.
    pub fn population(&self) -> Result<Vec<Sequence>, ExplorerError> {
        if let Some(batch) = self.batches.last_non_empty() {
            return Ok(batch.sequences().cloned().collect());
        }
        let measured: Vec<Sequence> = self
            .measured_by_score()
            .into_iter()
            .map(|(s, _)| s)
            .collect();
        if measured.is_empty() {
            return Err(ExplorerError::EmptyPopulation);
        }
        Ok(measured)
    }

    /// A novelty filter that already knows every measured sequence.
    pub fn novelty_filter(&self) -> NoveltyFilter {
        NoveltyFilter::seeded(self.model.measured_sequences().keys())
    }

    /// Calls `draw` until `target` distinct unmeasured sequences exist or the attempt
    /// budget runs out. A partial result is returned with a warning; finding nothing
    /// at all is [`ExplorerError::SearchSpaceExhausted`].
    pub fn collect_novel<F>(&mut self, target: usize, mut draw: F) -> Result<Vec<Sequence>, ExplorerError>
    where
        F: FnMut(&mut dyn RngCore) -> Result<Sequence, ExplorerError>,
    {
        let mut filter = self.novelty_filter();
        let mut found = Vec::with_capacity(target);
        let mut attempts = 0;
        while found.len() < target && attempts < self.max_proposal_attempts {
            attempts += 1;
            let candidate = draw(&mut *self.rng)?;
            if filter.report_interesting(&candidate) {
                found.push(candidate);
            }
        }
        check_exhaustion(found, target, attempts)
    }
}

/// Applies the exhaustion policy to the outcome of a bounded search.
pub(crate) fn check_exhaustion(
    found: Vec<Sequence>,
    requested: usize,
    attempts: usize,
) -> Result<Vec<Sequence>, ExplorerError> {
    if found.len() >= requested {
        return Ok(found);
    }
    if found.is_empty() && requested > 0 {
        return Err(ExplorerError::SearchSpaceExhausted {
            found: 0,
            requested,
            attempts,
        });
    }
    warn!(
        "Only {} of {} new sequences found after {} attempts; proposing a partial batch",
        found.len(),
        requested,
        attempts
    );
    Ok(found)
}

/// A batch-proposal policy. The explorer's control loop depends only on this trait.
pub trait ProposalStrategy {
    /// Explorer type used in logs, e.g. `WF_mu1_r0_rho1_beta100`.
    fn name(&self) -> String;

    /// Proposes the next batch. The explorer deduplicates the result, drops measured
    /// sequences and truncates it to the batch size, so strategies may over-propose.
    fn propose(&mut self, ctx: &mut ProposalContext<'_>) -> Result<Vec<Sequence>, ExplorerError>;

    /// Forgets any state learned from a previous model.
    fn reset(&mut self) {}
}

impl<S: ProposalStrategy + ?Sized> ProposalStrategy for Box<S> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn propose(&mut self, ctx: &mut ProposalContext<'_>) -> Result<Vec<Sequence>, ExplorerError> {
        (**self).propose(ctx)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Round-driven explorer: propose, measure, log, repeat.
pub struct Explorer<S: ProposalStrategy> {
    settings: ExplorerSettings,
    strategy: S,
    batches: BatchHistory,
    model: Option<Box<dyn Model>>,
    horizon: usize,
    rng: ChaCha8Rng,
}

impl<S: ProposalStrategy> Explorer<S> {
    pub fn new(strategy: S, settings: ExplorerSettings) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(settings.seed);
        Self {
            settings,
            strategy,
            batches: BatchHistory::new(),
            model: None,
            horizon: 1,
            rng,
        }
    }

    pub fn explorer_type(&self) -> String {
        self.strategy.name()
    }

    pub fn settings(&self) -> &ExplorerSettings {
        &self.settings
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn batches(&self) -> &BatchHistory {
        &self.batches
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn model(&self) -> Option<&dyn Model> {
        self.model.as_deref()
    }

    pub fn take_model(&mut self) -> Option<Box<dyn Model>> {
        self.model.take()
    }

    pub fn get_last_batch(&self) -> Option<usize> {
        self.batches.last_index()
    }

    /// Redirects the batch log, e.g. to give every start of a sweep its own file.
    pub fn set_log_dir(&mut self, path: impl Into<PathBuf>) {
        self.settings.path = path.into();
    }

    pub fn recorder(&self) -> BatchCsvRecorder {
        BatchCsvRecorder::new(&self.settings.path, self.explorer_type())
    }

    /// Binds `model`. With `reset` the batch history and strategy state are cleared.
    /// A model that already paid for measurements seeds a cold-start batch from them.
    pub fn set_model(&mut self, mut model: Box<dyn Model>, reset: bool) -> Result<(), ExplorerError> {
        if reset {
            self.batches.clear();
            self.strategy.reset();
        }
        if model.cost() > 0 {
            let measured: Vec<Sequence> = model.measured_sequences().keys().cloned().collect();
            let mut entries = Vec::with_capacity(measured.len());
            for sequence in measured {
                let score = model.get_fitness(&sequence)?;
                entries.push(BatchEntry {
                    sequence,
                    model_score: score,
                    true_score: score,
                });
            }
            let id = self.batches.push(Batch::new(entries));
            debug!("Seeded cold-start batch {} from the bound model", id);
        }
        self.model = Some(model);
        Ok(())
    }

    /// Asks the strategy for a batch and enforces the proposal contract: distinct,
    /// unmeasured, in the alphabet, at most `batch_size` long.
    pub fn propose_samples(&mut self) -> Result<Vec<Sequence>, ExplorerError> {
        let model = self.model.as_deref_mut().ok_or(ExplorerError::ModelNotSet)?;
        let mut ctx = ProposalContext {
            alphabet: &self.settings.alphabet,
            batch_size: self.settings.batch_size,
            virtual_screen: self.settings.virtual_screen,
            max_proposal_attempts: self.settings.max_proposal_attempts,
            batches: &self.batches,
            model,
            rng: &mut self.rng,
        };
        let raw = self.strategy.propose(&mut ctx)?;
        let proposed = raw.len();

        let measured = model_ref(&self.model)?.measured_sequences();
        let alphabet = &self.settings.alphabet;
        let mut seen = HashSet::with_capacity(raw.len());
        let accepted: Vec<Sequence> = raw
            .into_iter()
            .filter(|s| alphabet.validate(s).is_ok())
            .filter(|s| !measured.contains_key(s))
            .filter(|s| seen.insert(s.clone()))
            .take(self.settings.batch_size)
            .collect();

        if accepted.len() < proposed {
            debug!(
                "{} kept {} of {} proposals after dedup and batch-size cap",
                self.explorer_type(),
                accepted.len(),
                proposed
            );
        }
        Ok(accepted)
    }

    /// Measures up to `batch_size` proposals and appends them as a new batch.
    ///
    /// Each entry keeps the model's prediction from before the measurement and the
    /// answer after it. The batch is only appended once every call succeeded.
    pub fn measure_proposals(&mut self, proposals: Vec<Sequence>) -> Result<usize, ExplorerError> {
        let model = self.model.as_deref_mut().ok_or(ExplorerError::ModelNotSet)?;
        let mut seen = HashSet::new();
        let to_measure: Vec<Sequence> = proposals
            .into_iter()
            .take(self.settings.batch_size)
            .filter(|s| seen.insert(s.clone()))
            .collect();

        let before = model.get_fitnesses(&to_measure)?;
        model.update_model(&to_measure)?;
        let after = model.get_fitnesses(&to_measure)?;

        let entries = to_measure
            .into_iter()
            .zip(before)
            .zip(after)
            .map(|((sequence, model_score), true_score)| BatchEntry {
                sequence,
                model_score,
                true_score,
            })
            .collect();
        Ok(self.batches.push(Batch::new(entries)))
    }

    /// Runs `rounds` propose/measure cycles. Unless `debug` is set, each round's batch
    /// is logged; `overwrite` restarts the log at round 0.
    pub fn run(&mut self, rounds: usize, overwrite: bool, verbose: bool) -> Result<(), ExplorerError> {
        model_ref(&self.model)?;
        self.horizon = rounds;
        for round in 0..rounds {
            if verbose {
                let model = model_ref(&self.model)?;
                let top = model
                    .measured_sequences()
                    .values()
                    .copied()
                    .fold(f64::NEG_INFINITY, f64::max);
                info!(
                    "round: {}, cost: {}, evals: {}, top: {}",
                    round,
                    model.cost(),
                    model.evals(),
                    top
                );
            }
            let proposals = self.propose_samples()?;
            self.measure_proposals(proposals)?;
            if !self.settings.debug {
                self.write(round, overwrite)?;
            }
            self.horizon -= 1;
        }
        Ok(())
    }

    /// Appends the newest batch to the batch log.
    pub fn write(&self, round: usize, overwrite: bool) -> Result<(), ExplorerError> {
        let model = model_ref(&self.model)?;
        let (Some(batch_id), Some(batch)) = (self.batches.last_index(), self.batches.last()) else {
            return Ok(());
        };
        let explorer_type = self.explorer_type();
        let context = BatchLogContext {
            batch_size: self.settings.batch_size,
            measurement_cost: model.cost(),
            virtual_evals: model.evals(),
            landscape_id: model.landscape_id(),
            start_id: model.start_id(),
            model_type: model.model_type(),
            virtual_screen: self.settings.virtual_screen,
            horizon: self.horizon,
            explorer_type: &explorer_type,
        };
        self.recorder()
            .write(round, overwrite, batch_id, batch, &context)?;
        Ok(())
    }
}

fn model_ref(model: &Option<Box<dyn Model>>) -> Result<&dyn Model, ExplorerError> {
    model.as_deref().ok_or(ExplorerError::ModelNotSet)
}
