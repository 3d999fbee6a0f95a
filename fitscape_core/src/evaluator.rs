//! Multi-start sweeps. One explorer is re-bound to a fresh surrogate for every
//! landscape, start sequence and noise level, and each combination gets its own log.

use crate::explorer::{Explorer, ExplorerError, ProposalStrategy};
use crate::landscape::Landscape;
use crate::model::{EnsembleModel, Model, ModelError, NoisyOracleModel};
use crate::sequence::{Alphabet, Sequence, SequenceError};
use log::info;
use rand::Rng;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub const SUMMARY_FILE: &str = "summary.csv";

#[derive(Error, Debug)]
pub enum EvaluatorError {
    #[error("A sweep needs at least one landscape")]
    NoLandscapes,
    #[error("A sweep needs at least one start sequence")]
    NoStarts,
    #[error("A sweep needs at least one noise level")]
    NoNoiseLevels,
    #[error("Invalid start sequence: {0}")]
    Sequence(#[from] SequenceError),
    #[error("Building the surrogate failed: {0}")]
    Model(#[from] ModelError),
    #[error("Exploring {landscape} from start {start} failed: {source}")]
    Explorer {
        landscape: String,
        start: usize,
        #[source]
        source: ExplorerError,
    },
    #[error("Writing the sweep summary failed: {0}")]
    Summary(#[from] csv::Error),
    #[error("Sweep summary I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationSettings {
    pub rounds: usize,
    /// Surrogate noise levels every start is explored under.
    pub noise_levels: Vec<f64>,
    /// More than one member gives every run an ensemble surrogate.
    pub ensemble_size: usize,
    pub seed: u64,
    pub overwrite: bool,
    pub verbose: bool,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            rounds: 10,
            noise_levels: vec![0.0, 0.1, 0.5],
            ensemble_size: 1,
            seed: 0,
            overwrite: true,
            verbose: false,
        }
    }
}

/// Outcome of one (landscape, start, noise) run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRecord {
    pub landscape_id: String,
    pub start_index: usize,
    pub start: Sequence,
    pub noise_std: f64,
    pub best_sequence: Sequence,
    pub best_score: f64,
    pub measurement_cost: u64,
    pub virtual_evals: u64,
    pub batches: usize,
    pub log_file: Option<PathBuf>,
}

/// `count` uniformly random sequences of `length` symbols.
pub fn random_starts<R: Rng + ?Sized>(
    alphabet: &Alphabet,
    count: usize,
    length: usize,
    rng: &mut R,
) -> Vec<Sequence> {
    let symbols = alphabet.symbols();
    (0..count)
        .map(|_| {
            let bytes: Vec<u8> = (0..length)
                .map(|_| symbols[rng.random_range(0..symbols.len())])
                .collect();
            Sequence::from_bytes(bytes)
        })
        .collect()
}

pub struct Evaluator<S: ProposalStrategy> {
    explorer: Explorer<S>,
    settings: EvaluationSettings,
    base_path: PathBuf,
}

impl<S: ProposalStrategy> Evaluator<S> {
    pub fn new(explorer: Explorer<S>, settings: EvaluationSettings) -> Self {
        let base_path = explorer.settings().path.clone();
        Self {
            explorer,
            settings,
            base_path,
        }
    }

    pub fn explorer(&self) -> &Explorer<S> {
        &self.explorer
    }

    pub fn settings(&self) -> &EvaluationSettings {
        &self.settings
    }

    /// Log directory of one run: `<base>/<landscape>/start<i>/noise<std>`.
    pub fn run_dir(&self, landscape_id: &str, start_index: usize, noise_std: f64) -> PathBuf {
        self.base_path
            .join(landscape_id)
            .join(format!("start{}", start_index))
            .join(format!("noise{}", noise_std))
    }

    /// Explores every landscape from every start under every noise level. Each run
    /// binds a fresh surrogate with `reset`, so no history leaks between runs. Unless
    /// the explorer is in debug mode a summary table is written next to the logs.
    pub fn evaluate_for_landscapes(
        &mut self,
        landscapes: &[Arc<dyn Landscape>],
        starts: &[Sequence],
    ) -> Result<Vec<EvaluationRecord>, EvaluatorError> {
        if landscapes.is_empty() {
            return Err(EvaluatorError::NoLandscapes);
        }
        if starts.is_empty() {
            return Err(EvaluatorError::NoStarts);
        }
        if self.settings.noise_levels.is_empty() {
            return Err(EvaluatorError::NoNoiseLevels);
        }
        for start in starts {
            self.explorer.settings().alphabet.validate(start)?;
        }

        let noise_levels = self.settings.noise_levels.clone();
        let mut records = Vec::with_capacity(landscapes.len() * starts.len() * noise_levels.len());
        let mut model_seed = self.settings.seed;
        for landscape in landscapes {
            for (start_index, start) in starts.iter().enumerate() {
                for &noise_std in &noise_levels {
                    let model = self.build_model(Arc::clone(landscape), start, noise_std, model_seed)?;
                    model_seed = model_seed.wrapping_add(1);
                    records.push(self.evaluate_one(model, start_index, start, noise_std)?);
                }
            }
        }

        if !self.explorer.settings().debug {
            self.write_summary(&records)?;
        }
        Ok(records)
    }

    fn build_model(
        &self,
        landscape: Arc<dyn Landscape>,
        start: &Sequence,
        noise_std: f64,
        seed: u64,
    ) -> Result<Box<dyn Model>, ModelError> {
        let start = std::slice::from_ref(start);
        let model: Box<dyn Model> = if self.settings.ensemble_size > 1 {
            Box::new(
                EnsembleModel::noisy(landscape, self.settings.ensemble_size, noise_std, seed)?
                    .with_start(start)?,
            )
        } else {
            Box::new(NoisyOracleModel::new(landscape, noise_std, seed)?.with_start(start)?)
        };
        Ok(model)
    }

    fn evaluate_one(
        &mut self,
        model: Box<dyn Model>,
        start_index: usize,
        start: &Sequence,
        noise_std: f64,
    ) -> Result<EvaluationRecord, EvaluatorError> {
        let landscape_id = model.landscape_id().to_string();
        let explorer_err = |source: ExplorerError| EvaluatorError::Explorer {
            landscape: landscape_id.clone(),
            start: start_index,
            source,
        };

        self.explorer.set_model(model, true).map_err(explorer_err)?;
        let run_dir = self.run_dir(&landscape_id, start_index, noise_std);
        self.explorer.set_log_dir(run_dir);
        info!(
            "Evaluating {} on {} from start {} ({}) with noise {}",
            self.explorer.explorer_type(),
            landscape_id,
            start_index,
            start,
            noise_std
        );
        self.explorer
            .run(self.settings.rounds, self.settings.overwrite, self.settings.verbose)
            .map_err(explorer_err)?;

        let model = self
            .explorer
            .model()
            .ok_or_else(|| explorer_err(ExplorerError::ModelNotSet))?;
        let (best_sequence, best_score) = model
            .measured_sequences()
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(s, &score)| (s.clone(), score))
            .unwrap_or_else(|| (start.clone(), f64::NEG_INFINITY));
        let log_file = (!self.explorer.settings().debug).then(|| self.explorer.recorder().file_path());

        Ok(EvaluationRecord {
            landscape_id: landscape_id.clone(),
            start_index,
            start: start.clone(),
            noise_std,
            best_sequence,
            best_score,
            measurement_cost: model.cost(),
            virtual_evals: model.evals(),
            batches: self.explorer.batches().len(),
            log_file,
        })
    }

    pub fn summary_path(&self) -> PathBuf {
        self.base_path.join(SUMMARY_FILE)
    }

    fn write_summary(&self, records: &[EvaluationRecord]) -> Result<(), EvaluatorError> {
        let path = self.summary_path();
        write_summary(&path, records)?;
        info!("Sweep summary of {} runs written to {:?}", records.len(), path);
        Ok(())
    }
}

/// One header row, then one row per run.
pub fn write_summary(path: &Path, records: &[EvaluationRecord]) -> Result<(), EvaluatorError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| EvaluatorError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush().map_err(|source| EvaluatorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
