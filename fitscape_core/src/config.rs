use crate::bayesian::{Acquisition, BayesianOptimization};
use crate::evaluator::{EvaluationSettings, random_starts};
use crate::evolution::{EvolutionParams, MlWrightFisher, Moran, WrightFisher};
use crate::explorer::{DEFAULT_MAX_PROPOSAL_ATTEMPTS, ExplorerSettings, ProposalStrategy};
use crate::landscape::{HammingLandscape, Landscape, PositionWeightLandscape, SymbolCountLandscape};
use crate::model::{EnsembleModel, Model, NoisyOracleModel};
use crate::policy::{PolicyExplorer, SitePreferencePolicy};
use crate::random::RandomMutagenesis;
use crate::runner::{RandomProposer, RunnerSettings};
use crate::sequence::{Alphabet, Sequence};
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ExplorerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub alphabet: Alphabet,
    #[serde(default = "default_virtual_screen")]
    pub virtual_screen: usize,
    #[serde(default = "default_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_max_proposal_attempts")]
    pub max_proposal_attempts: usize,
}

fn default_batch_size() -> usize {
    100
}
fn default_virtual_screen() -> usize {
    10
}
pub fn default_path() -> PathBuf {
    PathBuf::from("./simulations/")
}
fn default_max_proposal_attempts() -> usize {
    DEFAULT_MAX_PROPOSAL_ATTEMPTS
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            alphabet: Alphabet::default(),
            virtual_screen: default_virtual_screen(),
            path: default_path(),
            debug: false,
            seed: 0,
            max_proposal_attempts: default_max_proposal_attempts(),
        }
    }
}

impl ExplorerConfig {
    pub fn to_settings(&self) -> ExplorerSettings {
        ExplorerSettings {
            batch_size: self.batch_size,
            alphabet: self.alphabet.clone(),
            virtual_screen: self.virtual_screen,
            path: self.path.clone(),
            debug: self.debug,
            seed: self.seed,
            max_proposal_attempts: self.max_proposal_attempts,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[default]
    Random,
    WrightFisher,
    MlWrightFisher,
    Moran,
    Policy,
    Bayesian,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct PolicySettings {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
}

fn default_learning_rate() -> f64 {
    0.1
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
        }
    }
}

/// `kind` picks the strategy; the matching sub-table carries its hyperparameters.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    #[serde(default)]
    pub kind: StrategyKind,
    /// Per-sequence mutation rate of the random and Bayesian-optimization strategies.
    #[serde(default = "default_mu")]
    pub mu: f64,
    #[serde(default)]
    pub evolution: Option<EvolutionParams>,
    #[serde(default)]
    pub policy: Option<PolicySettings>,
    #[serde(default)]
    pub bayesian: Option<Acquisition>,
}

fn default_mu() -> f64 {
    1.0
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            kind: StrategyKind::default(),
            mu: default_mu(),
            evolution: None,
            policy: None,
            bayesian: None,
        }
    }
}

impl StrategyConfig {
    pub fn build(&self) -> Box<dyn ProposalStrategy> {
        let evolution = self.evolution.unwrap_or_default();
        match self.kind {
            StrategyKind::Random => Box::new(RandomMutagenesis::new(self.mu)),
            StrategyKind::WrightFisher => Box::new(WrightFisher::new(evolution)),
            StrategyKind::MlWrightFisher => Box::new(MlWrightFisher::new(evolution)),
            StrategyKind::Moran => Box::new(Moran::new(evolution)),
            StrategyKind::Policy => {
                let settings = self.policy.clone().unwrap_or_default();
                Box::new(PolicyExplorer::new(SitePreferencePolicy::new(settings.learning_rate)))
            }
            StrategyKind::Bayesian => Box::new(BayesianOptimization::new(
                self.mu,
                self.bayesian.unwrap_or_default(),
            )),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub enum LandscapeConfig {
    SymbolCount {
        #[serde(default = "default_symbol")]
        symbol: char,
    },
    Hamming {
        target: Sequence,
    },
    PositionWeight {
        length: usize,
        #[serde(default)]
        seed: u64,
    },
}

fn default_symbol() -> char {
    'G'
}

impl Default for LandscapeConfig {
    fn default() -> Self {
        LandscapeConfig::SymbolCount {
            symbol: default_symbol(),
        }
    }
}

impl LandscapeConfig {
    pub fn build(&self, alphabet: &Alphabet) -> Result<Arc<dyn Landscape>, anyhow::Error> {
        let landscape: Arc<dyn Landscape> = match self {
            LandscapeConfig::SymbolCount { symbol } => {
                if !symbol.is_ascii() {
                    return Err(anyhow::anyhow!(
                        "Landscape symbol {:?} is not an ASCII character",
                        symbol
                    ));
                }
                Arc::new(SymbolCountLandscape::new(*symbol as u8))
            }
            LandscapeConfig::Hamming { target } => {
                alphabet
                    .validate(target)
                    .map_err(|e| anyhow::anyhow!("Invalid Hamming target {}: {}", target, e))?;
                Arc::new(HammingLandscape::new(target.clone()))
            }
            LandscapeConfig::PositionWeight { length, seed } => Arc::new(
                PositionWeightLandscape::random(alphabet.clone(), *length, *seed),
            ),
        };
        Ok(landscape)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    #[serde(default = "default_noise_std")]
    pub noise_std: f64,
    /// More than one member builds an ensemble with an uncertainty estimate.
    #[serde(default = "default_ensemble_size")]
    pub ensemble_size: usize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_start")]
    pub start: Vec<Sequence>,
}

fn default_noise_std() -> f64 {
    0.1
}
fn default_ensemble_size() -> usize {
    1
}
fn default_start() -> Vec<Sequence> {
    vec![Sequence::from("UCGAUCGAUCGAUCGA")]
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            noise_std: default_noise_std(),
            ensemble_size: default_ensemble_size(),
            seed: 0,
            start: default_start(),
        }
    }
}

impl ModelConfig {
    /// Builds the surrogate and measures the starting sequences on it.
    pub fn build(
        &self,
        landscape: Arc<dyn Landscape>,
        alphabet: &Alphabet,
    ) -> Result<Box<dyn Model>, anyhow::Error> {
        if self.start.is_empty() {
            return Err(anyhow::anyhow!(
                "[model] start must list at least one starting sequence"
            ));
        }
        for seq in &self.start {
            alphabet
                .validate(seq)
                .map_err(|e| anyhow::anyhow!("Invalid starting sequence {}: {}", seq, e))?;
        }

        let model: Box<dyn Model> = if self.ensemble_size > 1 {
            Box::new(
                EnsembleModel::noisy(landscape, self.ensemble_size, self.noise_std, self.seed)?
                    .with_start(&self.start)?,
            )
        } else {
            Box::new(NoisyOracleModel::new(landscape, self.noise_std, self.seed)?.with_start(&self.start)?)
        };
        Ok(model)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default = "default_rounds")]
    pub rounds: usize,
    #[serde(default = "default_true")]
    pub overwrite: bool,
    #[serde(default = "default_true")]
    pub verbose: bool,
}

pub fn default_rounds() -> usize {
    10
}
fn default_true() -> bool {
    true
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
            overwrite: true,
            verbose: true,
        }
    }
}

/// Settings of the round runner used by `fitscape benchmark`.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct BenchmarkConfig {
    #[serde(default = "default_ground_truth_measurements")]
    pub ground_truth_measurements_per_round: usize,
    #[serde(default = "default_model_queries")]
    pub model_queries_per_round: usize,
    #[serde(default = "default_mu")]
    pub mu: f64,
    pub log_file: Option<PathBuf>,
}

fn default_ground_truth_measurements() -> usize {
    100
}
fn default_model_queries() -> usize {
    1000
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            ground_truth_measurements_per_round: default_ground_truth_measurements(),
            model_queries_per_round: default_model_queries(),
            mu: default_mu(),
            log_file: None,
        }
    }
}

impl BenchmarkConfig {
    pub fn to_settings(&self, rounds: usize) -> RunnerSettings {
        RunnerSettings {
            rounds,
            ground_truth_measurements_per_round: self.ground_truth_measurements_per_round,
            model_queries_per_round: self.model_queries_per_round,
            log_file: self.log_file.clone(),
        }
    }

    pub fn proposer(&self, explorer: &ExplorerConfig) -> RandomProposer {
        RandomProposer {
            mu: self.mu,
            alphabet: explorer.alphabet.clone(),
            max_attempts: explorer.max_proposal_attempts,
        }
    }
}

/// Settings of the multi-start sweep run by `fitscape evaluate`.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct EvaluationConfig {
    #[serde(default = "default_num_starts")]
    pub num_starts: usize,
    #[serde(default = "default_start_length")]
    pub start_length: usize,
    /// Fixed starts. When empty, `num-starts` random starts are drawn instead.
    #[serde(default)]
    pub starts: Vec<Sequence>,
    #[serde(default = "default_noise_levels")]
    pub noise_levels: Vec<f64>,
    #[serde(default = "default_ensemble_size")]
    pub ensemble_size: usize,
    #[serde(default)]
    pub seed: u64,
    /// Landscapes to sweep. When empty, the `[landscape]` section is used alone.
    #[serde(default)]
    pub landscapes: Vec<LandscapeConfig>,
}

fn default_num_starts() -> usize {
    5
}
fn default_start_length() -> usize {
    16
}
fn default_noise_levels() -> Vec<f64> {
    vec![0.0, 0.1, 0.5]
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            num_starts: default_num_starts(),
            start_length: default_start_length(),
            starts: Vec::new(),
            noise_levels: default_noise_levels(),
            ensemble_size: default_ensemble_size(),
            seed: 0,
            landscapes: Vec::new(),
        }
    }
}

impl EvaluationConfig {
    pub fn to_settings(&self, run: &RunConfig) -> EvaluationSettings {
        EvaluationSettings {
            rounds: run.rounds,
            noise_levels: self.noise_levels.clone(),
            ensemble_size: self.ensemble_size,
            seed: self.seed,
            overwrite: run.overwrite,
            verbose: run.verbose,
        }
    }

    pub fn starts(&self, alphabet: &Alphabet) -> Result<Vec<Sequence>, anyhow::Error> {
        if !self.starts.is_empty() {
            for seq in &self.starts {
                alphabet
                    .validate(seq)
                    .map_err(|e| anyhow::anyhow!("Invalid evaluation start {}: {}", seq, e))?;
            }
            return Ok(self.starts.clone());
        }
        if self.num_starts == 0 || self.start_length == 0 {
            return Err(anyhow::anyhow!(
                "[evaluation] needs explicit starts or a positive num-starts and start-length"
            ));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        Ok(random_starts(alphabet, self.num_starts, self.start_length, &mut rng))
    }

    pub fn build_landscapes(
        &self,
        fallback: &LandscapeConfig,
        alphabet: &Alphabet,
    ) -> Result<Vec<Arc<dyn Landscape>>, anyhow::Error> {
        if self.landscapes.is_empty() {
            return Ok(vec![fallback.build(alphabet)?]);
        }
        self.landscapes.iter().map(|l| l.build(alphabet)).collect()
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub explorer: ExplorerConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub landscape: LandscapeConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub benchmark: Option<BenchmarkConfig>,
    #[serde(default)]
    pub evaluation: Option<EvaluationConfig>,
}

impl ExperimentConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;
        Self::from_toml(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e))
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn build_landscape(&self) -> Result<Arc<dyn Landscape>, anyhow::Error> {
        self.landscape.build(&self.explorer.alphabet)
    }

    pub fn build_model(&self, landscape: Arc<dyn Landscape>) -> Result<Box<dyn Model>, anyhow::Error> {
        self.model.build(landscape, &self.explorer.alphabet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explorer::Explorer;
    use std::io::Write;

    const SAMPLE: &str = include_str!("../../config.example.toml");

    #[test]
    fn sample_config_parses_into_typed_sections() {
        let config = ExperimentConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.explorer.batch_size, 20);
        assert_eq!(config.explorer.virtual_screen, 5);
        assert_eq!(config.explorer.alphabet, Alphabet::rna());
        assert_eq!(config.strategy.kind, StrategyKind::MlWrightFisher);
        assert_eq!(
            config.strategy.evolution,
            Some(EvolutionParams {
                mu: 1.0,
                rho: 2,
                recomb_rate: 0.2,
                beta: 10.0,
            })
        );
        assert_eq!(
            config.landscape,
            LandscapeConfig::PositionWeight { length: 16, seed: 3 }
        );
        assert_eq!(config.model.ensemble_size, 3);
        assert_eq!(config.run.rounds, 5);
        let benchmark = config.benchmark.unwrap();
        assert_eq!(benchmark.ground_truth_measurements_per_round, 20);
        assert_eq!(benchmark.log_file, Some(PathBuf::from("./simulations/benchmark.csv")));
        let evaluation = config.evaluation.unwrap();
        assert_eq!(evaluation.num_starts, 3);
        assert_eq!(evaluation.landscapes.len(), 2);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = ExperimentConfig::from_toml("").unwrap();
        assert_eq!(config.explorer.batch_size, 100);
        assert_eq!(config.explorer.max_proposal_attempts, DEFAULT_MAX_PROPOSAL_ATTEMPTS);
        assert_eq!(config.strategy.kind, StrategyKind::Random);
        assert_eq!(config.landscape, LandscapeConfig::SymbolCount { symbol: 'G' });
        assert_eq!(config.run.rounds, default_rounds());
        assert!(config.benchmark.is_none());
        assert!(config.evaluation.is_none());
    }

    #[test]
    fn builtin_and_empty_configs_explore_one_round() {
        for mut config in [
            ExperimentConfig::default(),
            ExperimentConfig::from_toml("").unwrap(),
        ] {
            assert_eq!(config.strategy.mu, 1.0, "Default mutation rate must mutate");
            config.explorer.batch_size = 4;
            config.explorer.debug = true;
            let landscape = config.build_landscape().unwrap();
            let model = config.build_model(landscape).unwrap();
            let mut explorer = Explorer::new(config.strategy.build(), config.explorer.to_settings());
            explorer.set_model(model, true).unwrap();
            explorer.run(1, false, false).unwrap();
            assert_eq!(explorer.get_last_batch(), Some(1));
            assert_eq!(explorer.model().unwrap().cost(), 1 + 4);
        }
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(ExperimentConfig::from_toml("[explorer]\nbatch-sise = 3\n").is_err());
        assert!(ExperimentConfig::from_toml("[landscape]\nkind = \"hamming\"\ntarget = \"GG\"\nextra = 1\n").is_err());
        assert!(ExperimentConfig::from_toml("[strategy]\nkind = \"simulated-annealing\"\n").is_err());
    }

    #[test]
    fn invalid_alphabet_is_a_parse_error() {
        assert!(ExperimentConfig::from_toml("[explorer]\nalphabet = \"AAC\"\n").is_err());
    }

    #[test]
    fn strategies_build_with_their_names() {
        let names: Vec<String> = [
            "kind = \"random\"\nmu = 2.0",
            "kind = \"wright-fisher\"",
            "kind = \"ml-wright-fisher\"",
            "kind = \"moran\"",
            "kind = \"policy\"\n[strategy.policy]\nlearning-rate = 0.5",
            "kind = \"bayesian\"\n[strategy.bayesian]\nacquisition = \"thompson\"",
        ]
        .iter()
        .map(|body| {
            let config = ExperimentConfig::from_toml(&format!("[strategy]\n{}\n", body)).unwrap();
            config.strategy.build().name()
        })
        .collect();
        assert_eq!(
            names,
            vec![
                "Random_mu2",
                "WF_mu1_r0_rho1_beta100",
                "MLWFG_mu1_r0_rho1_beta100",
                "Moran_mu1_r0_rho1_beta100",
                "Policy_SitePreference_lr0.5",
                "BO_Thompson",
            ]
        );
    }

    #[test]
    fn ucb_acquisition_reads_kappa() {
        let config = ExperimentConfig::from_toml(
            "[strategy]\nkind = \"bayesian\"\n[strategy.bayesian]\nacquisition = \"ucb\"\nkappa = 2.5\n",
        )
        .unwrap();
        assert_eq!(config.strategy.bayesian, Some(Acquisition::Ucb { kappa: 2.5 }));
    }

    #[test]
    fn model_build_validates_start_sequences() {
        let mut config = ExperimentConfig::default();
        let landscape = config.build_landscape().unwrap();
        let model = config.build_model(Arc::clone(&landscape)).unwrap();
        assert_eq!(model.cost(), 1);
        assert_eq!(model.landscape_id(), "count_G");

        config.model.start = vec![Sequence::from("GGTT")];
        assert!(config.build_model(Arc::clone(&landscape)).is_err());
        config.model.start = vec![Sequence::from("GGAA")];
        config.model.noise_std = -0.5;
        assert!(config.build_model(Arc::clone(&landscape)).is_err(), "Negative noise is rejected");
        config.model.noise_std = 0.1;
        config.model.start.clear();
        assert!(config.build_model(landscape).is_err());
    }

    #[test]
    fn ensemble_size_selects_ensemble_model() {
        let mut config = ExperimentConfig::default();
        config.model.ensemble_size = 4;
        let model = config.build_model(config.build_landscape().unwrap()).unwrap();
        assert_eq!(model.model_type(), "Ensemble4_noise0.1");
    }

    #[test]
    fn hamming_target_must_fit_alphabet() {
        let config = ExperimentConfig::from_toml("[landscape]\nkind = \"hamming\"\ntarget = \"GGXX\"\n").unwrap();
        assert!(config.build_landscape().is_err());
    }

    #[test]
    fn load_from_file_reports_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(ExperimentConfig::load_from_file(&missing).is_err());

        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[run]\nrounds = 3").unwrap();
        let config = ExperimentConfig::load_from_file(&path).unwrap();
        assert_eq!(config.run.rounds, 3);

        std::fs::write(&path, "[run]\nrounds = \"three\"").unwrap();
        let err = ExperimentConfig::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse TOML"));
    }

    #[test]
    fn evaluation_section_parses_and_draws_seeded_starts() {
        let config = ExperimentConfig::from_toml(
            r#"
            [landscape]
            kind = "symbol-count"
            symbol = "A"

            [evaluation]
            num-starts = 3
            start-length = 10
            noise-levels = [0.0, 0.2]
            seed = 9

            [[evaluation.landscapes]]
            kind = "symbol-count"

            [[evaluation.landscapes]]
            kind = "hamming"
            target = "GAUCGAUCGA"
            "#,
        )
        .unwrap();
        let evaluation = config.evaluation.clone().unwrap();
        assert_eq!(evaluation.noise_levels, vec![0.0, 0.2]);
        assert_eq!(evaluation.ensemble_size, 1);

        let alphabet = &config.explorer.alphabet;
        let starts = evaluation.starts(alphabet).unwrap();
        assert_eq!(starts.len(), 3);
        assert!(starts.iter().all(|s| s.len() == 10));
        assert_eq!(starts, evaluation.starts(alphabet).unwrap(), "Starts are seeded");

        let landscapes = evaluation.build_landscapes(&config.landscape, alphabet).unwrap();
        assert_eq!(landscapes.len(), 2);
        assert_eq!(landscapes[0].name(), "count_G");

        let settings = evaluation.to_settings(&config.run);
        assert_eq!(settings.rounds, default_rounds());
        assert_eq!(settings.noise_levels, vec![0.0, 0.2]);
    }

    #[test]
    fn evaluation_falls_back_to_the_landscape_section() {
        let config = ExperimentConfig::from_toml(
            r#"
            [landscape]
            kind = "symbol-count"
            symbol = "A"

            [evaluation]
            starts = ["GGGG", "AAAA"]
            "#,
        )
        .unwrap();
        let evaluation = config.evaluation.clone().unwrap();
        let landscapes = evaluation
            .build_landscapes(&config.landscape, &config.explorer.alphabet)
            .unwrap();
        assert_eq!(landscapes.len(), 1);
        assert_eq!(landscapes[0].name(), "count_A");
        assert_eq!(
            evaluation.starts(&config.explorer.alphabet).unwrap(),
            vec![Sequence::from("GGGG"), Sequence::from("AAAA")]
        );

        let bad = EvaluationConfig {
            starts: vec![Sequence::from("GTGG")],
            ..EvaluationConfig::default()
        };
        assert!(bad.starts(&config.explorer.alphabet).is_err());
        let empty = EvaluationConfig {
            num_starts: 0,
            ..EvaluationConfig::default()
        };
        assert!(empty.starts(&config.explorer.alphabet).is_err());
    }
}
