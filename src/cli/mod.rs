//! Command-line parsing for the PRISM flux fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the fitting/math code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "prism", version, about = "Off-axis ND flux fitter for FD flux prediction")]
pub struct Cli {
    /// Log filter used when `PRISM_LOG` is unset (e.g. `info`, `prism_flux=debug`).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit the ND coefficients for one target and print the flux match.
    Fit(RunArgs),
    /// Scan the regularization strength and report the L-curve corner.
    Scan(RunArgs),
    /// Fit, then propagate every systematic shift and universe set.
    Shifts(RunArgs),
    /// Run fit, scan and shifts on the seeded synthetic library.
    Demo(DemoArgs),
}

/// Options shared by every command.
#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Flux library JSON (defaults to `PRISM_FLUX_LIBRARY`, else the synthetic library).
    #[arg(long, value_name = "JSON")]
    pub library: Option<PathBuf>,

    /// Seed for the synthetic library.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// FD target to fit (defaults to the first declared target).
    #[arg(short = 't', long)]
    pub target: Option<String>,

    /// Regularization strength.
    #[arg(short = 'l', long, default_value_t = 1e-2)]
    pub lambda: f64,

    /// Use the auxiliary spectrum as an extra fit column.
    #[arg(long)]
    pub aux: bool,

    /// Merge every N analysis energy bins at session start.
    #[arg(long, default_value_t = 1)]
    pub energy_rebin: usize,

    /// Merge every N off-axis channels at session start.
    #[arg(long, default_value_t = 1)]
    pub channel_rebin: usize,

    /// Lowest off-axis channel center to use (m).
    #[arg(long, requires = "channel_max")]
    pub channel_min: Option<f64>,

    /// Highest off-axis channel center to use (m).
    #[arg(long, requires = "channel_min")]
    pub channel_max: Option<f64>,

    /// Fit region low bound (GeV).
    #[arg(long, requires = "region_high")]
    pub region_low: Option<f64>,

    /// Fit region high bound (GeV).
    #[arg(long, requires = "region_low")]
    pub region_high: Option<f64>,

    /// Weight of energy bins below the fit region.
    #[arg(long, default_value_t = 0.0)]
    pub weight_below: f64,

    /// Weight of energy bins above the fit region.
    #[arg(long, default_value_t = 0.0)]
    pub weight_above: f64,

    /// Fit the unoscillated FD flux.
    #[arg(long)]
    pub no_oscillation: bool,

    /// sin²θ23 for the vacuum disappearance profile.
    #[arg(long, default_value_t = 0.53)]
    pub sin2_theta23: f64,

    /// Δm²32 (eV²) for the vacuum disappearance profile.
    #[arg(long, default_value_t = 2.46e-3)]
    pub dm2: f64,

    /// Baseline (km) for the vacuum disappearance profile.
    #[arg(long, default_value_t = 1285.0)]
    pub baseline: f64,

    /// Smallest regularization strength of a scan.
    #[arg(long, default_value_t = 1e-5)]
    pub lambda_min: f64,

    /// Largest regularization strength of a scan.
    #[arg(long, default_value_t = 10.0)]
    pub lambda_max: f64,

    /// Number of log-spaced scan points.
    #[arg(long, default_value_t = 25)]
    pub lambda_steps: usize,
}

/// Options for `prism demo`.
#[derive(Debug, Args, Clone)]
pub struct DemoArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Also write the synthetic library to this JSON file.
    #[arg(long, value_name = "JSON")]
    pub write_library: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_defaults() {
        let cli = Cli::parse_from(["prism", "fit"]);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.lambda, 1e-2);
        assert_eq!(args.energy_rebin, 1);
        assert!(args.channel_min.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn channel_bounds_come_in_pairs() {
        assert!(Cli::try_parse_from(["prism", "fit", "--channel-min", "2"]).is_err());
        let cli = Cli::try_parse_from(["prism", "scan", "--channel-min", "2", "--channel-max", "20", "--aux"]).unwrap();
        let Command::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(args.channel_max, Some(20.0));
        assert!(args.aux);
    }

    #[test]
    fn demo_flattens_run_args() {
        let cli = Cli::parse_from(["prism", "demo", "--seed", "7", "--log-level", "debug"]);
        let Command::Demo(demo) = cli.command else {
            panic!("expected demo");
        };
        assert_eq!(demo.run.seed, 7);
        assert_eq!(cli.log_level, "debug");
    }
}
