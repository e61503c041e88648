//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - turns CLI arguments into a `RunConfig`
//! - runs the fit pipeline
//! - prints reports

use crate::cli::{Cli, Command, DemoArgs, RunArgs};
use crate::domain::{RunConfig, SessionConfig};
use crate::error::AppError;
use crate::fit::log_space;
use crate::osc::{OscillationModel, VacuumDisappearance};

pub mod pipeline;

/// Entry point for the `prism` binary (after logging is set up).
pub fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Command::Fit(args) => handle_fit(&args),
        Command::Scan(args) => handle_scan(&args),
        Command::Shifts(args) => handle_shifts(&args),
        Command::Demo(args) => handle_demo(&args),
    }
}

fn handle_fit(args: &RunArgs) -> Result<(), AppError> {
    let config = run_config_from_args(args);
    let run = pipeline::run_fit(&config)?;
    print_fit(&run);
    Ok(())
}

fn handle_scan(args: &RunArgs) -> Result<(), AppError> {
    let config = run_config_from_args(args);
    let run = pipeline::run_fit(&config)?;
    print_scan(&run, &config)
}

fn handle_shifts(args: &RunArgs) -> Result<(), AppError> {
    let config = run_config_from_args(args);
    let run = pipeline::run_fit(&config)?;
    print_shifts(&run)
}

fn handle_demo(args: &DemoArgs) -> Result<(), AppError> {
    let mut config = run_config_from_args(&args.run);
    config.library = None;
    let library = pipeline::load_library(&config)?;
    if let Some(path) = &args.write_library {
        crate::io::write_flux_library(path, &library)?;
        println!("Wrote synthetic flux library to {}\n", path.display());
    }

    let run = pipeline::run_fit_with_library(&config, library)?;
    print_fit(&run);
    print_scan(&run, &config)?;
    print_shifts(&run)
}

fn print_fit(run: &pipeline::RunOutput) {
    println!(
        "{}",
        crate::report::format_fit_summary(&run.fit, run.session.binning(), run.session.region())
    );
}

fn print_scan(run: &pipeline::RunOutput, config: &RunConfig) -> Result<(), AppError> {
    let lambdas = log_space(config.lambda_min, config.lambda_max, config.lambda_steps)?;
    let scan = run
        .session
        .scan(config.target.as_deref(), &lambdas, config.session.use_auxiliary)?;
    println!("{}", crate::report::format_scan_table(&scan));
    Ok(())
}

fn print_shifts(run: &pipeline::RunOutput) -> Result<(), AppError> {
    let snapshot = run.session.snapshot();
    let shifts = snapshot.shift_ratios(&run.fit)?;
    let bands = snapshot.universe_bands(&run.fit)?;
    println!("{}", crate::report::format_shift_table(&shifts, &bands));
    Ok(())
}

pub fn run_config_from_args(args: &RunArgs) -> RunConfig {
    let oscillation = if args.no_oscillation {
        OscillationModel::None
    } else {
        OscillationModel::Vacuum(VacuumDisappearance {
            sin2_theta23: args.sin2_theta23,
            dm2_32: args.dm2,
            baseline_km: args.baseline,
        })
    };
    RunConfig {
        library: pipeline::resolve_library_path(args.library.as_ref()),
        seed: args.seed,
        session: SessionConfig {
            energy_rebin: args.energy_rebin,
            channel_rebin: args.channel_rebin,
            oscillation,
            use_auxiliary: args.aux,
            fit_region: None,
        },
        target: args.target.clone(),
        lambda: args.lambda,
        channel_range: args.channel_min.zip(args.channel_max),
        fit_region: args.region_low.zip(args.region_high),
        out_of_region_weights: (args.weight_below, args.weight_above),
        lambda_min: args.lambda_min,
        lambda_max: args.lambda_max,
        lambda_steps: args.lambda_steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> RunArgs {
        let argv = ["prism", "fit"].iter().chain(extra).copied();
        let Command::Fit(args) = Cli::parse_from(argv).command else {
            panic!("expected fit");
        };
        args
    }

    #[test]
    fn config_maps_oscillation_and_ranges() {
        let c = run_config_from_args(&args(&["--no-oscillation", "--channel-min", "1", "--channel-max", "9"]));
        assert_eq!(c.session.oscillation, OscillationModel::None);
        assert_eq!(c.channel_range, Some((1.0, 9.0)));
        assert_eq!(c.fit_region, None);

        let c = run_config_from_args(&args(&["--dm2", "2.5e-3", "--region-low", "0.5", "--region-high", "4"]));
        let OscillationModel::Vacuum(v) = c.session.oscillation else {
            panic!("expected vacuum oscillation");
        };
        assert_eq!(v.dm2_32, 2.5e-3);
        assert_eq!(c.fit_region, Some((0.5, 4.0)));
    }

    #[test]
    fn synthetic_pipeline_runs_end_to_end() {
        let mut c = run_config_from_args(&args(&["--aux", "--channel-min", "0", "--channel-max", "20"]));
        c.library = None;
        let run = pipeline::run_fit(&c).unwrap();
        assert_eq!(run.session.nominal_design().n_channels(), 21);
        assert!(run.fit.outcome.used_auxiliary);
        assert!(print_shifts(&run).is_ok());
    }
}
