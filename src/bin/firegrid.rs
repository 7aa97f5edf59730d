//! `firegrid` command line entry point.
//!
//! The CLI never cancels its run: the [`CancellationToken`] it passes is only
//! there to satisfy [`Pipeline::run`]. Between-batch cancellation is a library
//! feature for callers that own a token, such as a service wrapping the
//! pipeline. An interrupted CLI run can be continued with `--resume`.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use firegrid::{CancellationToken, DatasetStore, DateSpan, Pipeline, PipelineConfig, PipelineInputs, SysinfoMonitor};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Build a gridded weather and wildfire dataset", long_about = None)]
struct Cli {
    /// JSON pipeline configuration. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Station table (JSON array or JSON Lines).
    #[arg(long)]
    stations: PathBuf,
    /// Daily station observations (JSON array or JSON Lines).
    #[arg(long)]
    observations: PathBuf,
    /// Wildfire records (JSON array or JSON Lines).
    #[arg(long)]
    fires: Option<PathBuf>,
    /// Dataset directory to write.
    #[arg(long)]
    output: PathBuf,
    /// First day to interpolate (YYYY-MM-DD).
    #[arg(long)]
    start: NaiveDate,
    /// Last day to interpolate, inclusive (YYYY-MM-DD).
    #[arg(long)]
    end: NaiveDate,
    /// Continue an existing dataset instead of replacing it.
    #[arg(long)]
    resume: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let pipeline = Pipeline::new(config).context("invalid pipeline configuration")?;
    let span = DateSpan::new(cli.start, cli.end)?;

    let inputs = PipelineInputs::from_files(&cli.stations, &cli.observations, cli.fires.as_ref())
        .context("reading input records")?;

    let mut store = if cli.resume && DatasetStore::exists(&cli.output) {
        DatasetStore::open(&cli.output)
    } else {
        DatasetStore::create(&cli.output)
    }
    .with_context(|| format!("preparing dataset at {}", cli.output.display()))?;

    let summary = pipeline
        .run(
            inputs,
            &span.days(),
            &mut store,
            Box::new(SysinfoMonitor::new()),
            &CancellationToken::new(),
        )
        .context("pipeline run failed")?;

    println!("{}", summary);
    Ok(())
}
