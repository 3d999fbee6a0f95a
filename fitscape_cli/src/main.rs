use fitscape_core::config::ExperimentConfig;
use fitscape_core::evaluator::Evaluator;
use fitscape_core::explorer::Explorer;
use fitscape_core::runner::RoundRunner;

use clap::{Parser, Subcommand};
use log::info;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser, global = true)]
    config_file: Option<PathBuf>,
    #[clap(short, long, global = true)]
    rounds: Option<usize>,
    #[clap(short, long, global = true)]
    seed: Option<u64>,
    #[clap(short, long, global = true)]
    batch_size: Option<usize>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the configured explorer against the configured landscape.
    Explore,
    /// Run the round runner with the random proposer.
    Benchmark,
    /// Sweep the configured explorer over several landscapes, starts and noise levels.
    Evaluate,
}

fn load_config(config_file: Option<PathBuf>) -> Result<ExperimentConfig, anyhow::Error> {
    match config_file {
        Some(config_path) => {
            println!("Loading configuration from specified path: {config_path:?}");
            ExperimentConfig::load_from_file(&config_path)
        }
        None => {
            let default_config_path = PathBuf::from("config.toml");
            if default_config_path.exists() {
                println!(
                    "No config file specified via CLI, loading default: {default_config_path:?}"
                );
                ExperimentConfig::load_from_file(&default_config_path)
            } else {
                println!(
                    "No config file specified and default 'config.toml' not found, using built-in defaults."
                );
                Ok(ExperimentConfig::default())
            }
        }
    }
}

fn explore(config: &ExperimentConfig) -> Result<(), anyhow::Error> {
    let landscape = config.build_landscape()?;
    let model = config.build_model(landscape)?;
    let mut explorer = Explorer::new(config.strategy.build(), config.explorer.to_settings());
    explorer.set_model(model, true)?;

    info!(
        "Starting {} for {} rounds of {} sequences",
        explorer.explorer_type(),
        config.run.rounds,
        config.explorer.batch_size
    );
    let start_time = Instant::now();
    explorer.run(config.run.rounds, config.run.overwrite, config.run.verbose)?;
    let elapsed_total = start_time.elapsed();

    let model = explorer
        .model()
        .ok_or_else(|| anyhow::anyhow!("Explorer lost its model during the run"))?;
    let best = model
        .measured_sequences()
        .iter()
        .max_by(|a, b| a.1.total_cmp(b.1));
    println!("\nExploration finished in {elapsed_total:.2?}.");
    println!(
        "Batches: {}, Measurements: {}, Model queries: {}",
        explorer.batches().len(),
        model.cost(),
        model.evals()
    );
    if let Some((sequence, score)) = best {
        println!("Best sequence: {sequence} ({score})");
    }
    if !config.explorer.debug {
        println!("Batch log: {:?}", explorer.recorder().file_path());
    }
    Ok(())
}

fn benchmark(config: &ExperimentConfig) -> Result<(), anyhow::Error> {
    let bench = config.benchmark.clone().unwrap_or_default();
    let landscape = config.build_landscape()?;
    let model = config.build_model(landscape.clone())?;
    let mut runner = RoundRunner::new(
        model,
        landscape,
        config.model.start.clone(),
        bench.to_settings(config.run.rounds),
    );
    let mut proposer = bench.proposer(&config.explorer);
    let mut rng = ChaCha8Rng::seed_from_u64(config.explorer.seed);

    let start_time = Instant::now();
    let (rows, metadata) = runner.run(&mut proposer, &mut rng, config.run.verbose)?;
    let elapsed_total = start_time.elapsed();

    println!("\nBenchmark {} finished in {elapsed_total:.2?}.", metadata.run_id);
    println!(
        "Explorer: {}, Model: {}, Landscape: {}, Measured rows: {}",
        metadata.exp_name,
        metadata.model_name,
        metadata.landscape_name,
        rows.len()
    );
    if let Some(best) = rows.iter().max_by(|a, b| a.true_score.total_cmp(&b.true_score)) {
        println!(
            "Best sequence: {} ({}) from round {}",
            best.sequence, best.true_score, best.round
        );
    }
    if let Some(path) = &bench.log_file {
        println!("Snapshot log: {path:?}");
    }
    Ok(())
}

fn evaluate(config: &ExperimentConfig) -> Result<(), anyhow::Error> {
    let evaluation = config.evaluation.clone().unwrap_or_default();
    let alphabet = &config.explorer.alphabet;
    let landscapes = evaluation.build_landscapes(&config.landscape, alphabet)?;
    let starts = evaluation.starts(alphabet)?;
    let explorer = Explorer::new(config.strategy.build(), config.explorer.to_settings());
    let mut evaluator = Evaluator::new(explorer, evaluation.to_settings(&config.run));

    info!(
        "Sweeping {} over {} landscapes, {} starts and {} noise levels",
        evaluator.explorer().explorer_type(),
        landscapes.len(),
        starts.len(),
        evaluation.noise_levels.len()
    );
    let start_time = Instant::now();
    let records = evaluator.evaluate_for_landscapes(&landscapes, &starts)?;
    let elapsed_total = start_time.elapsed();

    println!("\nEvaluation of {} runs finished in {elapsed_total:.2?}.", records.len());
    for record in &records {
        println!(
            "{} start {} noise {}: best {} ({}), cost {}",
            record.landscape_id,
            record.start_index,
            record.noise_std,
            record.best_sequence,
            record.best_score,
            record.measurement_cost
        );
    }
    if !config.explorer.debug {
        println!("Summary: {:?}", evaluator.summary_path());
    }
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = load_config(cli.config_file)?;
    if let Some(rounds) = cli.rounds {
        config.run.rounds = rounds;
    }
    if let Some(seed) = cli.seed {
        config.explorer.seed = seed;
    }
    if let Some(batch_size) = cli.batch_size {
        config.explorer.batch_size = batch_size;
    }

    println!("Effective configuration: {config:#?}");

    match cli.command {
        Command::Explore => explore(&config),
        Command::Benchmark => benchmark(&config),
        Command::Evaluate => evaluate(&config),
    }
}
