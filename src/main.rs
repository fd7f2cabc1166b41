mod cli;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tiled_matmul::device::DeviceRegistry;
use tiled_matmul::harness::{self, RunReport};
use tiled_matmul::verify::Comparison;

use crate::cli::{normalize_legacy_args, Cli};

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<RunReport> {
    let config = cli.into_config();
    config.validate().context("invalid arguments")?;

    let registry = DeviceRegistry::discover(config.threads);
    let device = registry
        .select(config.device, config.quiet)
        .context("device initialization failed")?;

    let report = harness::run(&device, &config).context("matrix multiply failed")?;
    Ok(report)
}

fn main() -> ExitCode {
    let cli = Cli::parse_from(normalize_legacy_args(std::env::args()));
    setup_logging(cli.verbose);

    println!("[Matrix Multiply] - Starting...");

    let report = match run(cli) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("matrix-mul: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    println!(
        "Device [{}]: {}, block {}x{}, started {}",
        report.device_ordinal,
        report.device_name,
        report.block.edge(),
        report.block.edge(),
        report.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("{}", report.throughput);
    println!("Checking computed result for correctness: ");
    if !report.passed() {
        println!("{}", report.comparison);
    }
    println!("{}", verdict(&report.comparison));
    ExitCode::SUCCESS
}

fn verdict(comparison: &Comparison) -> String {
    if comparison.passed() {
        "Result = PASSED".to_string()
    } else {
        format!(
            "Result = FAILED (max abs diff {:.3e}, relative L2 error {:.3e})",
            comparison.max_abs_diff, comparison.l2_relative_error
        )
    }
}

#[cfg(test)]
mod tests {
    use tiled_matmul::verify::{compare, VerifyOptions};

    use super::*;

    #[test]
    fn test_verdict_reports_error_figures_on_failure() {
        let reference = [3.0f32, 4.0];
        let passed = compare(&reference, &reference, 2, 1, &VerifyOptions::default()).unwrap();
        assert_eq!(verdict(&passed), "Result = PASSED");

        let failed = compare(&reference, &[3.0, 4.5], 2, 1, &VerifyOptions::default()).unwrap();
        assert_eq!(
            verdict(&failed),
            "Result = FAILED (max abs diff 5.000e-1, relative L2 error 1.000e-1)"
        );
    }
}
