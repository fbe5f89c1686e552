//! gammafit CLI

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::{info, warn};

use gammacore::fit::optimizer::LevenbergMarquardt;
use gammacore::fit::region::{RegionFitter, StopReason};
use gammafit::job::{FitJob, FitReport};
use gammafit::logging::setup_logging;

#[derive(Parser)]
#[command(name = "gammafit")]
#[command(about = "Fit a region of a gamma-ray spectrum with Gaussian peaks")]
#[command(version)]
struct Cli {
    /// Job file (JSON): spectrum, calibrations, region, peaks, parameters
    job: PathBuf,

    /// Override the maximum number of fit cycles
    #[arg(long)]
    max_cycles: Option<usize>,

    /// Override the number of fits reported
    #[arg(long)]
    max_output_fits: Option<usize>,

    /// Curve samples per channel in the JSON output
    #[arg(long, default_value = "1")]
    samples_per_channel: usize,

    /// Print the fits as JSON instead of text reports
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _logger = setup_logging(&cli.log_level)?;

    let mut job = FitJob::load(&cli.job)?;
    if let Some(n) = cli.max_cycles {
        job.parameters.max_cycles = n;
    }
    if let Some(n) = cli.max_output_fits {
        job.parameters.max_output_fits = n;
    }
    let inputs = job.into_inputs()?;

    let optimizer = LevenbergMarquardt::default();
    let outcome = RegionFitter::new(&inputs, &optimizer).run()?;
    match &outcome.stop {
        StopReason::Settled => info!("model settled after {} cycles", outcome.cycles_run),
        StopReason::CycleLimit => info!("stopped at the cycle limit ({})", outcome.cycles_run),
        StopReason::Failed(e) => warn!("cycle {} failed: {}", outcome.cycles_run, e),
    }

    if cli.json {
        let reports: Vec<FitReport> = outcome
            .fits
            .iter()
            .enumerate()
            .map(|(i, record)| FitReport::new(i + 1, record, cli.samples_per_channel))
            .collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for (i, record) in outcome.fits.iter().enumerate() {
            if i > 0 {
                println!();
            }
            println!("{}", record);
        }
    }
    Ok(())
}
