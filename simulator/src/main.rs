use anyhow::Context;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use thzcore::SessionOutcome;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use workflow::config::AppConfig;
use workflow::runner::{RunOptions, Runner};

mod devices;
mod generator;
mod gui_bridge;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "THz wafer QC station driver")]
struct Args {
    /// Station config (YAML)
    #[arg(long, default_value = "config/tqc.yml")]
    config: PathBuf,
    #[arg(long, default_value = "W0")]
    wafer_id: String,
    /// Id of the first sensor inspected
    #[arg(long, default_value_t = 1)]
    sensor_id: u32,
    /// Measure the chip in the beam as the new standard reference and exit
    #[arg(long, default_value_t = false)]
    measure_reference: bool,
    /// Average N pulses, export them and exit
    #[arg(long)]
    average: Option<u32>,
    /// Finish the batch after N inspected sensors
    #[arg(long)]
    sensors: Option<usize>,
    /// Expose the operator bridge over HTTP while the batch runs
    #[arg(long, default_value_t = false)]
    serve: bool,
    /// Standard reference file, overriding paths.std_ref_file
    #[arg(long)]
    std_ref: Option<PathBuf>,
    /// Report directory, overriding paths.qc_save_dir
    #[arg(long)]
    output: Option<PathBuf>,
    /// Seed for the simulated pulse noise
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = AppConfig::load(&args.config)?;
    if let Some(path) = args.std_ref {
        config.qc.paths.std_ref_file = path;
    }
    if let Some(dir) = args.output {
        config.qc.paths.qc_save_dir = dir;
    }
    if let Some(seed) = args.seed {
        config.simulator.pulse.seed = seed;
    }
    let runner = Runner::new(config);

    let interrupt = CancellationToken::new();
    let on_ctrl_c = interrupt.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received; cancelling");
            on_ctrl_c.cancel();
        }
    });

    if args.measure_reference {
        let reference = runner
            .measure_reference(&args.wafer_id, args.sensor_id, interrupt)
            .await?;
        println!(
            "New standard reference saved to {}; set paths.std_ref_file to use it.",
            reference.source.display()
        );
        return Ok(());
    }

    if let Some(averages) = args.average {
        let path = runner.average_and_export(averages, interrupt).await?;
        println!("Averaged pulse exported to {}", path.display());
        return Ok(());
    }

    let options = RunOptions {
        wafer_id: args.wafer_id,
        sensor_id: args.sensor_id,
        sensors: args.sensors,
        serve: args.serve,
    };
    let summary = runner.run_qc(options, interrupt).await?;

    println!(
        "QC finished ({:?}): {} passed, {} failed, {} skipped",
        summary.outcome, summary.metrics.passed, summary.metrics.failed, summary.metrics.skipped
    );
    for result in &summary.results {
        println!(
            "  sensor {:>4}  {}  violations {:>3}  resonance {:.4} THz",
            result.sensor_id, result.verdict, result.violations, result.resonance_min_thz
        );
    }
    if let Some(report) = &summary.report {
        println!("Report: {}", report.display());
    }

    match summary.outcome {
        SessionOutcome::Aborted(reason) => Err(anyhow::anyhow!(reason)).context("QC session aborted"),
        SessionOutcome::Completed | SessionOutcome::Cancelled => Ok(()),
    }
}
