use crate::landscape::Landscape;
use crate::sequence::Sequence;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Got {sequences} sequences but {scores} scores")]
    LengthMismatch { sequences: usize, scores: usize },
    #[error("Invalid noise standard deviation {0}")]
    InvalidNoise(f64),
    #[error("Ensemble needs at least one member")]
    EmptyEnsemble,
    #[error("Model backend failure: {0}")]
    Backend(String),
}

/// A `Model` is the cheap, trainable surrogate an explorer screens candidates with.
///
/// It owns the authoritative set of measured sequences. `update_model` is the only way
/// a ground-truth measurement enters it; every such measurement advances `cost`, while
/// every prediction advances `evals`.
pub trait Model: Send {
    /// Predicted fitness. Sequences that have been measured return their measured value.
    fn get_fitness(&mut self, sequence: &Sequence) -> Result<f64, ModelError>;

    fn get_fitnesses(&mut self, sequences: &[Sequence]) -> Result<Vec<f64>, ModelError> {
        sequences.iter().map(|s| self.get_fitness(s)).collect()
    }

    /// Mean prediction and its standard deviation. Models without an uncertainty
    /// estimate report zero.
    fn predict_with_uncertainty(&mut self, sequence: &Sequence) -> Result<(f64, f64), ModelError> {
        Ok((self.get_fitness(sequence)?, 0.0))
    }

    /// Measures `sequences` against the ground truth and retrains on the result.
    fn update_model(&mut self, sequences: &[Sequence]) -> Result<(), ModelError>;

    /// Retrains on externally measured data without spending measurement budget.
    fn train(&mut self, sequences: &[Sequence], scores: &[f64]) -> Result<(), ModelError>;

    /// Ground-truth measurements consumed so far.
    fn cost(&self) -> u64;

    /// Model queries answered so far.
    fn evals(&self) -> u64;

    fn measured_sequences(&self) -> &BTreeMap<Sequence, f64>;

    fn landscape_id(&self) -> &str;

    fn start_id(&self) -> &str;

    fn model_type(&self) -> &str;
}

/// A surrogate that answers with the true fitness plus Gaussian noise.
///
/// Predictions are cached per sequence until the next retrain, so repeated queries
/// within a round agree with each other the way a fixed trained network would.
pub struct NoisyOracleModel {
    landscape: Arc<dyn Landscape>,
    measured: BTreeMap<Sequence, f64>,
    predictions: HashMap<Sequence, f64>,
    noise: Normal<f64>,
    noise_std: f64,
    rng: ChaCha8Rng,
    cost: u64,
    evals: u64,
    landscape_id: String,
    start_id: String,
    model_type: String,
}

impl NoisyOracleModel {
    pub fn new(landscape: Arc<dyn Landscape>, noise_std: f64, seed: u64) -> Result<Self, ModelError> {
        if !(noise_std.is_finite() && noise_std >= 0.0) {
            return Err(ModelError::InvalidNoise(noise_std));
        }
        let noise = Normal::new(0.0, noise_std).map_err(|_| ModelError::InvalidNoise(noise_std))?;
        let landscape_id = landscape.name().to_string();
        Ok(Self {
            landscape,
            measured: BTreeMap::new(),
            predictions: HashMap::new(),
            noise,
            noise_std,
            rng: ChaCha8Rng::seed_from_u64(seed),
            cost: 0,
            evals: 0,
            landscape_id,
            start_id: String::from("none"),
            model_type: format!("NoisyOracle_noise{}", noise_std),
        })
    }

    /// Measures the starting sequences. The first one names the run's `start_id`.
    pub fn with_start(mut self, start: &[Sequence]) -> Result<Self, ModelError> {
        if let Some(first) = start.first() {
            self.start_id = first.short_id();
        }
        self.update_model(start)?;
        Ok(self)
    }

    pub fn noise_std(&self) -> f64 {
        self.noise_std
    }
}

impl Model for NoisyOracleModel {
    fn get_fitness(&mut self, sequence: &Sequence) -> Result<f64, ModelError> {
        self.evals += 1;
        if let Some(&score) = self.measured.get(sequence) {
            return Ok(score);
        }
        if let Some(&cached) = self.predictions.get(sequence) {
            return Ok(cached);
        }
        let prediction = self.landscape.get_fitness(sequence) + self.noise.sample(&mut self.rng);
        self.predictions.insert(sequence.clone(), prediction);
        Ok(prediction)
    }

    fn update_model(&mut self, sequences: &[Sequence]) -> Result<(), ModelError> {
        for seq in sequences {
            if self.measured.contains_key(seq) {
                continue;
            }
            let score = self.landscape.get_fitness(seq);
            self.measured.insert(seq.clone(), score);
            self.cost += 1;
        }
        self.predictions.clear();
        Ok(())
    }

    fn train(&mut self, sequences: &[Sequence], scores: &[f64]) -> Result<(), ModelError> {
        if sequences.len() != scores.len() {
            return Err(ModelError::LengthMismatch {
                sequences: sequences.len(),
                scores: scores.len(),
            });
        }
        for (seq, &score) in sequences.iter().zip(scores) {
            self.measured.insert(seq.clone(), score);
        }
        self.predictions.clear();
        Ok(())
    }

    fn cost(&self) -> u64 {
        self.cost
    }

    fn evals(&self) -> u64 {
        self.evals
    }

    fn measured_sequences(&self) -> &BTreeMap<Sequence, f64> {
        &self.measured
    }

    fn landscape_id(&self) -> &str {
        &self.landscape_id
    }

    fn start_id(&self) -> &str {
        &self.start_id
    }

    fn model_type(&self) -> &str {
        &self.model_type
    }
}

/// Several independently seeded noisy members; the spread of their predictions is the
/// uncertainty estimate.
pub struct EnsembleModel {
    members: Vec<NoisyOracleModel>,
    evals: u64,
    model_type: String,
}

impl EnsembleModel {
    pub fn new(members: Vec<NoisyOracleModel>) -> Result<Self, ModelError> {
        let first = members.first().ok_or(ModelError::EmptyEnsemble)?;
        let model_type = format!("Ensemble{}_noise{}", members.len(), first.noise_std());
        Ok(Self {
            members,
            evals: 0,
            model_type,
        })
    }

    /// `size` members over one landscape, seeded `seed, seed + 1, ...`.
    pub fn noisy(
        landscape: Arc<dyn Landscape>,
        size: usize,
        noise_std: f64,
        seed: u64,
    ) -> Result<Self, ModelError> {
        let members = (0..size as u64)
            .map(|i| NoisyOracleModel::new(Arc::clone(&landscape), noise_std, seed.wrapping_add(i)))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(members)
    }

    pub fn with_start(mut self, start: &[Sequence]) -> Result<Self, ModelError> {
        let mut members = Vec::with_capacity(self.members.len());
        for member in self.members.drain(..) {
            members.push(member.with_start(start)?);
        }
        self.members = members;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn first(&self) -> &NoisyOracleModel {
        // Construction guarantees at least one member.
        &self.members[0]
    }
}

impl Model for EnsembleModel {
    fn get_fitness(&mut self, sequence: &Sequence) -> Result<f64, ModelError> {
        Ok(self.predict_with_uncertainty(sequence)?.0)
    }

    fn predict_with_uncertainty(&mut self, sequence: &Sequence) -> Result<(f64, f64), ModelError> {
        self.evals += 1;
        let predictions = self
            .members
            .iter_mut()
            .map(|m| m.get_fitness(sequence))
            .collect::<Result<Vec<_>, _>>()?;
        let n = predictions.len() as f64;
        let mean = predictions.iter().sum::<f64>() / n;
        let variance = predictions.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
        Ok((mean, variance.sqrt()))
    }

    fn update_model(&mut self, sequences: &[Sequence]) -> Result<(), ModelError> {
        for member in &mut self.members {
            member.update_model(sequences)?;
        }
        Ok(())
    }

    fn train(&mut self, sequences: &[Sequence], scores: &[f64]) -> Result<(), ModelError> {
        for member in &mut self.members {
            member.train(sequences, scores)?;
        }
        Ok(())
    }

    fn cost(&self) -> u64 {
        self.first().cost()
    }

    fn evals(&self) -> u64 {
        self.evals
    }

    fn measured_sequences(&self) -> &BTreeMap<Sequence, f64> {
        self.first().measured_sequences()
    }

    fn landscape_id(&self) -> &str {
        self.first().landscape_id()
    }

    fn start_id(&self) -> &str {
        self.first().start_id()
    }

    fn model_type(&self) -> &str {
        &self.model_type
    }
}

impl Model for Box<dyn Model> {
    fn get_fitness(&mut self, sequence: &Sequence) -> Result<f64, ModelError> {
        (**self).get_fitness(sequence)
    }
    fn get_fitnesses(&mut self, sequences: &[Sequence]) -> Result<Vec<f64>, ModelError> {
        (**self).get_fitnesses(sequences)
    }
    fn predict_with_uncertainty(&mut self, sequence: &Sequence) -> Result<(f64, f64), ModelError> {
        (**self).predict_with_uncertainty(sequence)
    }
    fn update_model(&mut self, sequences: &[Sequence]) -> Result<(), ModelError> {
        (**self).update_model(sequences)
    }
    fn train(&mut self, sequences: &[Sequence], scores: &[f64]) -> Result<(), ModelError> {
        (**self).train(sequences, scores)
    }
    fn cost(&self) -> u64 {
        (**self).cost()
    }
    fn evals(&self) -> u64 {
        (**self).evals()
    }
    fn measured_sequences(&self) -> &BTreeMap<Sequence, f64> {
        (**self).measured_sequences()
    }
    fn landscape_id(&self) -> &str {
        (**self).landscape_id()
    }
    fn start_id(&self) -> &str {
        (**self).start_id()
    }
    fn model_type(&self) -> &str {
        (**self).model_type()
    }
}
