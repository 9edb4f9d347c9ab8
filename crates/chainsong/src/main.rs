use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chainconf::ChainConfig;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use chainsong::{
    BundleCache, ChainOrchestrator, FileStorage, HttpGenerator, PrimerRef, Schedule,
    ScheduleDefaults, WindowCalculator,
};

mod telemetry;

#[derive(Parser)]
#[command(name = "chainsong")]
#[command(about = "Generate music in chained stages, each continuing the last")]
#[command(version)]
struct Cli {
    /// Config file (replaces ./chainsong.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage of a schedule
    Run {
        /// Schedule file (TOML)
        schedule: PathBuf,

        /// Boundary epsilon in seconds between primer and generation windows
        #[arg(long)]
        epsilon: Option<f64>,

        /// Replace artifacts that already exist
        #[arg(long)]
        overwrite: bool,
    },

    /// Validate a schedule and print each stage's windows
    Plan {
        /// Schedule file (TOML)
        schedule: PathBuf,

        /// Boundary epsilon in seconds between primer and generation windows
        #[arg(long)]
        epsilon: Option<f64>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = ChainConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Config => {
            for file in &sources.files {
                println!("# loaded: {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# env: {var}");
            }
            print!("{}", config.to_toml());
            Ok(())
        }
        Commands::Plan { schedule, epsilon } => {
            telemetry::init(&config.telemetry.log_level)?;
            plan(&config, &schedule, epsilon).await
        }
        Commands::Run {
            schedule,
            epsilon,
            overwrite,
        } => {
            telemetry::init(&config.telemetry.log_level)?;
            let succeeded = run(&config, &schedule, epsilon, overwrite).await?;
            if !succeeded {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn load_schedule(config: &ChainConfig, path: &Path) -> Result<Schedule> {
    Schedule::load(path, &ScheduleDefaults::from(&config.defaults))
        .with_context(|| format!("Failed to load schedule {}", path.display()))
}

fn window_calculator(config: &ChainConfig, epsilon: Option<f64>) -> WindowCalculator {
    WindowCalculator::with_epsilon(epsilon.unwrap_or(config.defaults.boundary_epsilon))
}

fn http_generator(config: &ChainConfig) -> Result<HttpGenerator> {
    HttpGenerator::from_config(&config.generator).context("Failed to build generator client")
}

fn orchestrator(
    config: &ChainConfig,
    epsilon: Option<f64>,
    overwrite: bool,
) -> Result<ChainOrchestrator> {
    let storage = Arc::new(
        FileStorage::from_config(&config.paths)
            .with_overwrite(overwrite || config.defaults.overwrite),
    );
    let generator = Arc::new(http_generator(config)?);
    let bundles = Arc::new(BundleCache::from_config(config));

    Ok(
        ChainOrchestrator::new(storage.clone(), generator, storage, bundles)
            .with_window_calculator(window_calculator(config, epsilon)),
    )
}

async fn run(
    config: &ChainConfig,
    path: &Path,
    epsilon: Option<f64>,
    overwrite: bool,
) -> Result<bool> {
    let schedule = load_schedule(config, path)?;
    let chain = orchestrator(config, epsilon, overwrite)?;

    let cancel: CancellationToken = chain.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after the current stage");
            cancel.cancel();
        }
    });

    tracing::info!(
        schedule = %path.display(),
        stages = schedule.len(),
        endpoint = %config.generator.endpoint,
        "Starting chain"
    );

    let report = chain.run(&schedule).await;

    for outcome in &report.completed {
        println!(
            "stage {:>2}  {:<24} {:>6} notes  {}",
            outcome.index,
            outcome.output_name,
            outcome.artifact.note_count,
            outcome.artifact.path.display()
        );
    }
    if let Some(failure) = &report.failure {
        eprintln!(
            "stage {:>2}  {:<24} FAILED: {}",
            failure.index, failure.output_name, failure.error
        );
    }

    Ok(report.is_success())
}

async fn plan(config: &ChainConfig, path: &Path, epsilon: Option<f64>) -> Result<()> {
    let schedule = load_schedule(config, path)?;
    let storage = Arc::new(FileStorage::from_config(&config.paths));
    let chain = ChainOrchestrator::new(
        storage.clone(),
        Arc::new(http_generator(config)?),
        storage,
        Arc::new(BundleCache::offline(&config.paths.bundles_dir)),
    )
    .with_window_calculator(window_calculator(config, epsilon));

    for (preview, stage) in chain.preview(&schedule).await.into_iter().zip(schedule.stages()) {
        let primer = match &preview.primer_source {
            PrimerRef::Empty => "(empty)".to_string(),
            PrimerRef::File(name) => name.clone(),
            PrimerRef::Stage(index) => format!("stage {index}"),
        };
        println!(
            "stage {:>2}  {:<24} bundle={} primer={} qpm={} spq={} total_steps={}",
            preview.index,
            preview.output_name,
            stage.bundle_id,
            primer,
            stage.time_base.qpm,
            stage.time_base.steps_per_quarter,
            preview.total_length_steps
        );
        match preview.plan {
            Some(Ok(plan)) => println!(
                "          primer [{:.5}, {:.5}] {} steps, generate [{:.5}, {:.5}] {} steps at {} qpm",
                plan.primer_window.start_time,
                plan.primer_window.end_time,
                plan.primer_length_steps,
                plan.generation_window.start_time,
                plan.generation_window.end_time,
                plan.generation_length_steps,
                plan.time_base.qpm
            ),
            Some(Err(e)) => println!("          error: {e}"),
            None => println!("          windows depend on the output of an earlier stage"),
        }
    }

    Ok(())
}
