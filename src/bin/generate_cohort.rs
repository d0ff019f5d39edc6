//! Synthetic cohort export utility.
//!
//! Writes one labeled record per line as JSON (JSON lines), including the
//! `Resultado` target and the generating band.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin generate_cohort -- [--samples N] [--seed S] [--out <path>] [--summary]
//! ```
//!
//! Without `--out` the records go to stdout.

use std::io::{BufWriter, Write};

use anyhow::{Context, Result};

use glycopredict::domain::{CohortGenerator, CohortSummary};
use glycopredict::PipelineConfig;

const USAGE: &str = "Usage: generate_cohort [--samples N] [--seed S] [--out <path>] [--summary]";

fn main() -> Result<()> {
    let config = PipelineConfig::from_env_or_default();
    let mut samples = config.default_samples;
    let mut seed = config.random_seed;
    let mut out_path: Option<std::path::PathBuf> = None;
    let mut summary = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--samples" | "--seed" | "--out" => {
                let value = args.next().unwrap_or_default();
                if value.is_empty() {
                    eprintln!("{arg} needs a value\n{USAGE}");
                    std::process::exit(2);
                }
                match arg.as_str() {
                    "--samples" => {
                        samples = value
                            .parse()
                            .with_context(|| format!("invalid --samples {value}"))?;
                    }
                    "--seed" => {
                        seed = value.parse().with_context(|| format!("invalid --seed {value}"))?;
                    }
                    _ => out_path = Some(std::path::PathBuf::from(value)),
                }
            }
            "--summary" => summary = true,
            "-h" | "--help" => {
                println!("{USAGE}\n\nWrites a seeded synthetic cohort as JSON lines.");
                return Ok(());
            }
            _ => {
                eprintln!("Unknown arg: {arg}\n{USAGE}");
                std::process::exit(2);
            }
        }
    }

    let cohort = CohortGenerator::new(config.cohort).generate(samples, seed);

    let sink: Box<dyn Write> = match &out_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let file = std::fs::File::create(path)
                .with_context(|| format!("creating {}", path.display()))?;
            Box::new(file)
        }
        None => Box::new(std::io::stdout().lock()),
    };
    let mut writer = BufWriter::new(sink);
    for record in &cohort {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    if summary {
        eprintln!("{}", CohortSummary::from_cohort(&cohort));
    }
    if let Some(path) = out_path {
        eprintln!("Wrote {} records to {}", cohort.len(), path.display());
    }
    Ok(())
}
