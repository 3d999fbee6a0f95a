pub mod bayesian;
pub mod config;
pub mod evaluator;
pub mod evolution;
pub mod explorer;
pub mod history;
pub mod landscape;
pub mod model;
pub mod mutator;
pub mod novelty;
pub mod policy;
pub mod random;
pub mod recorder;
pub mod runner;
pub mod selection;
pub mod sequence;

pub use bayesian::{Acquisition, BayesianOptimization};
pub use config::ExperimentConfig;
pub use evaluator::{EvaluationRecord, EvaluationSettings, Evaluator, EvaluatorError};
pub use evolution::{EvolutionParams, MlWrightFisher, Moran, WrightFisher};
pub use explorer::{Explorer, ExplorerError, ExplorerSettings, ProposalContext, ProposalStrategy};
pub use history::{Batch, BatchEntry, BatchHistory};
pub use landscape::{HammingLandscape, Landscape, PositionWeightLandscape, SymbolCountLandscape};
pub use model::{EnsembleModel, Model, ModelError, NoisyOracleModel};
pub use mutator::{MutationRate, Mutator, PointMutator, generate_random_mutant};
pub use novelty::NoveltyFilter;
pub use policy::{Policy, PolicyExplorer, SitePreferencePolicy};
pub use random::RandomMutagenesis;
pub use recorder::{BatchCsvRecorder, MeasurementRow, RecorderError, RunMetadata, SnapshotRecorder};
pub use runner::{BatchProposer, RandomProposer, RoundRunner, RunnerError, RunnerSettings};
pub use selection::{CumulativeSelector, SelectionError, Selector, UniformSelector};
pub use sequence::{Alphabet, Sequence, SequenceError};
