use clap::{ArgAction, Parser};

use tiled_matmul::config::{ProblemSize, RunConfig, DEFAULT_SEED};
use tiled_matmul::kernels::BlockSize;
use tiled_matmul::verify::{VerifyOptions, DEFAULT_MAX_LISTED, DEFAULT_TOLERANCE};

#[derive(Parser, Debug)]
#[command(
    name = "matrix-mul",
    version = env!("CARGO_PKG_VERSION"),
    about = "Tiled matrix multiplication benchmark, verified against a reference multiplier."
)]
pub struct Cli {
    /// Number of timed launches
    #[arg(value_name = "ITERATIONS")]
    pub iterations: Option<usize>,

    /// Side length of square matrices (must be a multiple of the block size)
    #[arg(value_name = "SIZE")]
    pub size: Option<usize>,

    /// Device index; the fastest device is picked when omitted
    #[arg(short = 'd', long, value_name = "N")]
    pub device: Option<usize>,

    /// Do not log which device was selected
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Multiplier for the default matrix sizes (1..=10)
    #[arg(long, value_name = "M", conflicts_with = "size")]
    pub size_mult: Option<usize>,

    /// Tile edge length (16 or 32); chosen from the device when omitted
    #[arg(long, value_name = "EDGE", value_parser = parse_block_size)]
    pub block_size: Option<BlockSize>,

    /// Seed for the input generator
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Largest accepted absolute difference per element
    #[arg(long, default_value_t = DEFAULT_TOLERANCE)]
    pub tolerance: f32,

    /// Mismatches listed when verification fails
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_LISTED)]
    pub max_listed: usize,

    /// Compute units of the full-width device
    #[arg(short = 't', long, value_name = "N")]
    pub threads: Option<usize>,

    /// Verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn into_config(self) -> RunConfig {
        let mut config = RunConfig {
            device: self.device,
            quiet: self.quiet,
            problem: match self.size {
                Some(n) => ProblemSize::Square(n),
                None => ProblemSize::Scaled(self.size_mult),
            },
            block_size: self.block_size,
            seed: self.seed,
            verify: VerifyOptions {
                tolerance: self.tolerance,
                max_listed: self.max_listed,
            },
            threads: self.threads,
            ..RunConfig::default()
        };
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
        config
    }
}

fn parse_block_size(s: &str) -> Result<BlockSize, String> {
    let edge: usize = s.parse().map_err(|_| format!("`{s}` is not a number"))?;
    BlockSize::from_edge(edge).ok_or_else(|| format!("block size must be 16 or 32, got {edge}"))
}

/// Rewrites `device=N`, `quiet` and `sizemult=N` (with or without a single
/// leading dash) into their long-option form. The program name is kept.
pub fn normalize_legacy_args<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut args = args.into_iter().map(Into::into);
    let mut out: Vec<String> = args.next().into_iter().collect();
    for arg in args {
        let bare = arg
            .strip_prefix('-')
            .filter(|rest| !rest.starts_with('-'))
            .unwrap_or(&arg);
        let rewritten = if bare == "quiet" {
            "--quiet".to_string()
        } else if let Some(value) = bare.strip_prefix("device=") {
            format!("--device={value}")
        } else if let Some(value) = bare.strip_prefix("sizemult=") {
            format!("--size-mult={value}")
        } else {
            arg
        };
        out.push(rewritten);
    }
    out
}
