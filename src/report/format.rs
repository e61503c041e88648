//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized (important for future snapshot tests)

use nalgebra::DVector;

use crate::binning::BinningContext;
use crate::fit::{FitRegion, RegularizationScan, TargetFit, relative_difference};
use crate::systematics::{ShiftRatios, UniverseBand};

/// Fit settings, norms, coefficients and the per-bin target/prediction table.
pub fn format_fit_summary(fit: &TargetFit, binning: &BinningContext, region: &FitRegion) -> String {
    let mut out = String::new();
    let outcome = &fit.outcome;
    let (e_lo, e_hi) = binning.energy().span();
    let (c_lo, c_hi) = binning.channels().span();
    let window = binning.window();

    out.push_str("=== prism - ND to FD flux fit ===\n");
    out.push_str(&format!("Target: {} | lambda={:.3e}\n", fit.target, outcome.regularization));
    out.push_str(&format!(
        "Energy: {} bins [{:.2}, {:.2}] GeV\n",
        binning.energy().len(),
        e_lo,
        e_hi
    ));
    out.push_str(&format!(
        "Channels: {} of {} [{:.2}, {:.2}] m (window {}..{})\n",
        binning.channels().len(),
        binning.full_channels().len(),
        c_lo,
        c_hi,
        window.start,
        window.end
    ));
    out.push_str(&format!(
        "Fit region: [{:.2}, {:.2}] GeV | weight below={:.3} above={:.3}\n",
        region.low, region.high, region.below_weight, region.above_weight
    ));
    out.push_str(&format!(
        "Norms: residual={:.6e} penalty={:.6e}\n",
        outcome.residual_norm, outcome.penalty_norm
    ));

    out.push_str("\nCoefficients:\n");
    out.push_str(&header(&["channel", "offaxis_m", "coefficient"], &[8, 10, 14]));
    for (j, (c, x)) in outcome
        .channel_coefficients()
        .iter()
        .zip(binning.channels().centers())
        .enumerate()
    {
        out.push_str(&format!("{:<8} {:>10.2} {:>14.6e}\n", j + window.start, x, c));
    }
    if let Some(aux) = outcome.auxiliary_coefficient() {
        out.push_str(&format!("{:<8} {:>10} {:>14.6e}\n", "aux", "-", aux));
    }

    out.push_str("\nFlux match:\n");
    out.push_str(&header(&["E_GeV", "target", "predicted", "rel_resid"], &[8, 14, 14, 10]));
    let rel = relative_difference(&outcome.predicted, &outcome.target, &fit.unoscillated)
        .unwrap_or_else(|_| DVector::zeros(outcome.target.len()));
    for (i, e) in binning.energy().centers().iter().enumerate() {
        let marker = if region.contains(*e) { "" } else { " (out)" };
        out.push_str(&format!(
            "{:<8.2} {:>14.6e} {:>14.6e} {:>10.4}{marker}\n",
            e, outcome.target[i], outcome.predicted[i], rel[i]
        ));
    }
    out
}

/// One row per scanned strength; the L-curve corner is starred.
pub fn format_scan_table(scan: &RegularizationScan) -> String {
    let mut out = String::new();
    let corner = scan.corner().map(|p| p.index);

    out.push_str(&header(&["", "lambda", "residual", "penalty"], &[1, 12, 14, 14]));
    for p in &scan.points {
        let mark = if Some(p.index) == corner { "*" } else { " " };
        out.push_str(&format!(
            "{mark} {:>12.4e} {:>14.6e} {:>14.6e}\n",
            p.lambda, p.residual_norm, p.penalty_norm
        ));
    }
    for (lambda, err) in &scan.failures {
        out.push_str(&format!("  (failed {lambda:.4e}) {err}\n"));
    }
    if let Some(p) = scan.corner() {
        out.push_str(&format!("\nL-curve corner: lambda={:.4e}\n", p.lambda));
    }
    out
}

/// Largest absolute ratio per shift and the widest band per universe set, in percent.
pub fn format_shift_table(shifts: &[(String, ShiftRatios)], bands: &[(String, UniverseBand)]) -> String {
    let mut out = String::new();

    out.push_str("Systematic shifts (max |ratio|, %):\n");
    out.push_str(&header(&["shift", "nd", "fd", "both"], &[24, 8, 8, 8]));
    for (name, r) in shifts {
        out.push_str(&format!(
            "{:<24} {:>8.3} {:>8.3} {:>8.3}\n",
            truncate(name, 24),
            100.0 * r.nd.amax(),
            100.0 * r.fd.amax(),
            100.0 * r.both.amax()
        ));
    }

    if !bands.is_empty() {
        out.push_str("\nUniverse bands (max half-width, %):\n");
        out.push_str(&header(&["set", "members", "nd", "fd", "both"], &[24, 8, 8, 8, 8]));
        for (name, b) in bands {
            out.push_str(&format!(
                "{:<24} {:>8} {:>8.3} {:>8.3} {:>8.3}\n",
                truncate(name, 24),
                b.members,
                100.0 * b.nd.high.amax().max(b.nd.low.amax()),
                100.0 * b.fd.high.amax().max(b.fd.low.amax()),
                100.0 * b.both.high.amax().max(b.both.low.amax())
            ));
        }
    }
    out
}

fn header(names: &[&str], widths: &[usize]) -> String {
    let mut top = String::new();
    let mut rule = String::new();
    for (i, (name, &w)) in names.iter().zip(widths).enumerate() {
        if i > 0 {
            top.push(' ');
            rule.push(' ');
        }
        if i == 0 {
            top.push_str(&format!("{name:<w$}"));
        } else {
            top.push_str(&format!("{name:>w$}"));
        }
        rule.push_str(&"-".repeat(w));
    }
    format!("{}\n{}\n", top.trim_end(), rule.trim_end())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}
