use anyhow::{Context, Result};
use clap::Parser;
use colbench_runner::{
    run_harness, HarnessConfig, HarnessError, ReportFormat, Reporter, SizeRange, SystemExecutor,
    MIB,
};
use serde_json::{json, Value};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Exit status for usage errors and for any failed trial.
const FAILURE_EXIT_CODE: i32 = 2;

#[derive(Parser)]
#[command(
    name = "colbench",
    version = "0.1.0",
    about = "Round-trip correctness and throughput harness for a CSV <-> columnar converter"
)]
struct Cli {
    /// Converter binary (path or name on PATH)
    converter: PathBuf,
    /// Number of trials to run
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    trials: u32,
    /// Directory that receives the bench_NNN trial directories
    #[arg(long, default_value = ".")]
    workdir: PathBuf,
    /// Smallest target corpus size in MiB
    #[arg(long, default_value_t = 64)]
    min_mib: u64,
    /// Largest target corpus size in MiB
    #[arg(long, default_value_t = 1024)]
    max_mib: u64,
    #[arg(long, default_value_t = 10)]
    columns: usize,
    /// Leading int64 columns; the rest are strings
    #[arg(long, default_value_t = 5)]
    int_columns: usize,
    /// Outer seed; the same seed and trial count reproduce a run
    #[arg(long, default_value_t = 12345)]
    seed: u64,
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    let json_mode = cli.json;
    match run(cli) {
        Ok(()) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error(&err));
            }
            eprintln!("{:#}", err);
            std::process::exit(FAILURE_EXIT_CODE);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli);
    config.validate()?;
    let format = if cli.json {
        ReportFormat::JsonLines
    } else {
        ReportFormat::Text
    };
    let stdout = std::io::stdout();
    let mut reporter = Reporter::new(stdout.lock(), format);
    let summary = run_harness(&config, SystemExecutor, &mut reporter)
        .with_context(|| format!("round-trip run of {} aborted", config.converter.display()))?;
    info!(
        trials = summary.trials_completed,
        csv2col_total_s = summary.forward_total.as_secs_f64(),
        col2csv_total_s = summary.reverse_total.as_secs_f64(),
        "all trials passed"
    );
    Ok(())
}

fn build_config(cli: &Cli) -> HarnessConfig {
    let mut config = HarnessConfig::new(cli.converter.clone(), cli.trials);
    config.workdir = cli.workdir.clone();
    config.size_range = SizeRange::new(
        cli.min_mib.saturating_mul(MIB),
        cli.max_mib.saturating_mul(MIB),
    );
    config.columns = cli.columns;
    config.int_columns = cli.int_columns;
    config.seed = cli.seed;
    config
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(err: &anyhow::Error) -> Value {
    let harness = err.downcast_ref::<HarnessError>();
    let code = harness.map(|e| e.code()).unwrap_or("command_failed");
    let details = match harness {
        Some(HarnessError::Trial { trial, stage, .. }) => json!({
            "trial": trial,
            "stage": stage.as_str(),
        }),
        _ => json!({}),
    };
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": format!("{:#}", err),
            "details": details
        }
    })
}
