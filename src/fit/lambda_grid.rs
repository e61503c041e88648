//! Regularization-strength grid generation.

use crate::error::{FluxFitError, FluxResult};

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> FluxResult<Vec<f64>> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > min) {
        return Err(FluxFitError::range(format!(
            "invalid regularization range: min={min}, max={max} (must be finite, >0, and max>min)"
        )));
    }
    if steps < 2 {
        return Err(FluxFitError::input("regularization grid needs at least 2 steps"));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push((ln_min + step * i as f64).exp());
    }
    // Pin the endpoints exactly.
    out[0] = min;
    out[steps - 1] = max;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_space_includes_endpoints() {
        let v = log_space(1e-4, 10.0, 6).unwrap();
        assert_eq!(v.len(), 6);
        assert_eq!(v[0], 1e-4);
        assert_eq!(v[5], 10.0);
        assert!((v[1] / v[0] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_bad_ranges() {
        assert!(log_space(0.0, 1.0, 4).is_err());
        assert!(log_space(1.0, 1.0, 4).is_err());
        assert!(log_space(0.1, 1.0, 1).is_err());
    }
}
