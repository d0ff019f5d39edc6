//! glycopredict: glucose prediction pipeline
//!
//! Main entry point for the command-line application.
//!
//! ```text
//! glycopredict train   [--samples N] [--seed S] [--models-dir DIR] [--tune] [--quick]
//! glycopredict predict (--input FILE | --example) [--models-dir DIR]
//! glycopredict info    [--models-dir DIR]
//! glycopredict analyze [--samples N] [--seed S]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use glycopredict::adapters::sanitize::SanitizingMakeWriter;
use glycopredict::adapters::{quick_catalog, standard_catalog, Estimator, FsArtifactStore};
use glycopredict::domain::{
    fields, vocab, CohortGenerator, CohortSummary, PatientRecord, PredictionFailure,
    PredictionOutcome,
};
use glycopredict::{EngineState, InferenceEngine, ModelTrainingOrchestrator, PipelineConfig};

const USAGE: &str = "Usage:
  glycopredict train   [--samples N] [--seed S] [--models-dir DIR] [--tune] [--quick]
  glycopredict predict (--input FILE | --example) [--models-dir DIR]
  glycopredict info    [--models-dir DIR]
  glycopredict analyze [--samples N] [--seed S]";

#[derive(Debug, Default)]
struct Args {
    samples: Option<usize>,
    seed: Option<u64>,
    models_dir: Option<PathBuf>,
    input: Option<PathBuf>,
    example: bool,
    tune: bool,
    quick: bool,
}

fn usage_exit(message: &str) -> ! {
    eprintln!("{message}\n{USAGE}");
    std::process::exit(2);
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Args {
    let mut out = Args::default();
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| usage_exit(&format!("{flag} needs a value")))
        };
        match arg.as_str() {
            "--samples" => {
                let v = value("--samples");
                let n = v.parse().unwrap_or_else(|_| usage_exit(&format!("invalid --samples {v}")));
                out.samples = Some(n);
            }
            "--seed" => {
                let v = value("--seed");
                let seed = v.parse().unwrap_or_else(|_| usage_exit(&format!("invalid --seed {v}")));
                out.seed = Some(seed);
            }
            "--models-dir" => out.models_dir = Some(PathBuf::from(value("--models-dir"))),
            "--input" => out.input = Some(PathBuf::from(value("--input"))),
            "--example" => out.example = true,
            "--tune" => out.tune = true,
            "--quick" => out.quick = true,
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            _ => usage_exit(&format!("Unknown arg: {arg}")),
        }
    }
    out
}

fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    // Results go to stdout, so logs default to stderr.
    let log_mode = std::env::var("GLYCO_LOG_MODE").unwrap_or_else(|_| "stderr".to_string());

    let (writer, guard) = match log_mode.as_str() {
        "file" => {
            let log_file = std::env::var("GLYCO_LOG_FILE")
                .unwrap_or_else(|_| "logs/glycopredict.log".to_string());
            if let Some(parent) = std::path::Path::new(&log_file).parent() {
                // Best-effort: a missing directory should not abort startup.
                let _ = std::fs::create_dir_all(parent);
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
                .with_context(|| format!("opening log file {log_file}"))?;
            tracing_appender::non_blocking(file)
        }
        "stdout" => tracing_appender::non_blocking(std::io::stdout()),
        _ => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(writer)))
        .init();
    Ok(guard)
}

fn example_record() -> PatientRecord {
    PatientRecord::new()
        .with(fields::EDAD, 55)
        .with(fields::SEXO, vocab::MALE)
        .with(fields::IMC, 28.5)
        .with(fields::TAS, 135)
        .with(fields::TAD, 85)
        .with(fields::PERIMETRO_ABDOMINAL, 95)
        .with(fields::REALIZA_EJERCICIO, vocab::NO)
        .with(fields::FUMA, vocab::NO)
        .with(fields::HISTORIA_FAMILIAR_DM, vocab::YES)
        .with(fields::PUNTAJE_FINDRISC, 12)
        .with(fields::RIESGO_CARDIOVASCULAR, 0.4)
}

/// A single JSON object or an array of them.
fn read_records(path: &Path) -> Result<(Vec<PatientRecord>, bool)> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text).context("input is not valid JSON")?;
    if value.is_array() {
        Ok((serde_json::from_value(value).context("expected an array of records")?, true))
    } else {
        Ok((vec![serde_json::from_value(value).context("expected a record object")?], false))
    }
}

fn train(config: PipelineConfig, args: &Args) -> Result<()> {
    let samples = args.samples.unwrap_or(config.default_samples);
    let seed = args.seed.unwrap_or(config.random_seed);
    let catalog = if args.quick {
        quick_catalog(config.random_seed)
    } else {
        standard_catalog(config.random_seed)
    };
    let store = Arc::new(FsArtifactStore::new(&config.models_dir));
    let orchestrator = ModelTrainingOrchestrator::new(config, catalog, store);

    let outcome = orchestrator.train_cohort(samples, seed)?;

    println!(
        "{:<28} {:>9} {:>9} {:>9} {:>9} {:>9}",
        "Model", "Test R2", "RMSE", "MAE", "CV R2", "Gap"
    );
    for row in &outcome.leaderboard {
        println!(
            "{:<28} {:>9.4} {:>9.2} {:>9.2} {:>9.4} {:>9.4}",
            row.name, row.test.r2, row.test.rmse, row.test.mae, row.cv_mean_r2, row.overfitting_gap
        );
    }
    println!(
        "\nBest model: {} (R2 {:.4})\nArtifacts: {}",
        outcome.artifact.metadata.best_model,
        outcome.artifact.metadata.best_r2_score,
        outcome.paths.dir.display()
    );
    Ok(())
}

fn predict(config: PipelineConfig, args: &Args) -> Result<()> {
    let (records, batch) = match (&args.input, args.example) {
        (Some(path), false) => read_records(path)?,
        (None, true) => (vec![example_record()], false),
        _ => bail!("predict needs exactly one of --input FILE or --example"),
    };

    let store = Arc::new(FsArtifactStore::new(&config.models_dir));
    let engine: InferenceEngine<Estimator, _> = InferenceEngine::loaded(config, store);
    if engine.status() == EngineState::Degraded {
        tracing::warn!("Predictions come from a degraded model load");
    }

    let outcomes: Vec<PredictionOutcome> = records
        .iter()
        .zip(engine.predict_batch(&records))
        .map(|(record, result)| match record.validate() {
            Ok(()) => PredictionOutcome::from(result),
            Err(errors) => PredictionOutcome::Failure(PredictionFailure::new(errors.join("; "))),
        })
        .collect();

    let out = if batch {
        serde_json::to_string_pretty(&outcomes)?
    } else {
        serde_json::to_string_pretty(&outcomes[0])?
    };
    println!("{out}");
    Ok(())
}

fn info(config: PipelineConfig) -> Result<()> {
    let store = Arc::new(FsArtifactStore::new(&config.models_dir));
    let engine: InferenceEngine<Estimator, _> = InferenceEngine::loaded(config, store);
    match engine.model_info() {
        Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
        None => bail!(
            "no model available: {}",
            engine.failure_reason().unwrap_or("not loaded")
        ),
    }
    Ok(())
}

fn analyze(config: PipelineConfig, args: &Args) -> Result<()> {
    let samples = args.samples.unwrap_or(config.default_samples);
    let seed = args.seed.unwrap_or(config.random_seed);
    let cohort = CohortGenerator::new(config.cohort).generate(samples, seed);
    println!("{}", CohortSummary::from_cohort(&cohort));
    Ok(())
}

fn main() -> Result<()> {
    let _guard = init_logging()?;

    let mut argv = std::env::args().skip(1);
    let command = argv.next().unwrap_or_else(|| usage_exit("Missing command"));
    let args = parse_args(argv);

    let mut config = PipelineConfig::from_env_or_default();
    if let Some(dir) = &args.models_dir {
        config = config.with_models_dir(dir);
    }
    if args.tune {
        config.tune_best_model = true;
    }

    tracing::info!("Starting glycopredict {command}...");
    match command.as_str() {
        "train" => train(config, &args),
        "predict" => predict(config, &args),
        "info" => info(config),
        "analyze" => analyze(config, &args),
        "-h" | "--help" => {
            println!("{USAGE}");
            Ok(())
        }
        other => usage_exit(&format!("Unknown command: {other}")),
    }
}
