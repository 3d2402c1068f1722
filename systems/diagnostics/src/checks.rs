//! Statistical checks of resampling outcomes against analytic expectations.
//!
//! Counting checks use a five-sigma bound, which fails spuriously about once
//! in two million runs.

use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

use crate::statistics::kahan_sum;

/// Relative tolerance for quantities that are exact up to rounding.
pub const MACHINE_TOLERANCE: f64 = 1e-13;

const SIGMAS: f64 = 5.0;

/// Result of comparing one observed quantity with its expectation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// Short identifier of the check.
    pub name: String,
    /// Measured value.
    pub observed: f64,
    /// Expected value.
    pub expected: f64,
    /// Largest accepted deviation, absolute or relative depending on the check.
    pub tolerance: f64,
    /// Whether the observation lies within tolerance.
    pub passed: bool,
}

impl CheckOutcome {
    fn absolute(name: &str, observed: f64, expected: f64, tolerance: f64) -> Self {
        Self {
            name: name.to_owned(),
            observed,
            expected,
            tolerance,
            passed: (observed - expected).abs() <= tolerance,
        }
    }

    fn relative(name: &str, observed: f64, expected: f64, tolerance: f64) -> Self {
        Self {
            name: name.to_owned(),
            observed,
            expected,
            tolerance,
            passed: (observed - expected).abs() <= tolerance * expected.abs(),
        }
    }
}

/// Compares the surviving count of unit-weight particles after `events` resampling events.
///
/// Every event keeps each particle with probability `1 / target_ratio`.
#[must_use]
pub fn uniform_count_check(
    initial: u64,
    observed: u64,
    target_ratio: f64,
    events: u32,
) -> CheckOutcome {
    let survival = target_ratio.powi(-(events as i32));
    let initial = initial as f64;
    let expected = initial * survival;
    let sigma = (initial * survival * (1.0 - survival)).sqrt();
    CheckOutcome::absolute(
        "uniform_count",
        observed as f64,
        expected,
        SIGMAS * sigma,
    )
}

/// Checks that every weight equals `expected` to machine precision.
///
/// The observed value is the weight furthest from `expected`.
#[must_use]
pub fn uniform_weight_check(weights: &[f64], expected: f64) -> CheckOutcome {
    let worst = weights
        .iter()
        .copied()
        .max_by(|a, b| (a - expected).abs().total_cmp(&(b - expected).abs()));
    match worst {
        Some(observed) => {
            CheckOutcome::relative("uniform_weight", observed, expected, MACHINE_TOLERANCE)
        }
        None => CheckOutcome {
            name: "uniform_weight".to_owned(),
            observed: f64::NAN,
            expected,
            tolerance: MACHINE_TOLERANCE,
            passed: false,
        },
    }
}

/// Checks that the level weight is the initial mean scaled by the target ratio.
#[must_use]
pub fn level_weight_check(level: f64, initial_mean: f64, target_ratio: f64) -> CheckOutcome {
    CheckOutcome::relative(
        "level_weight",
        level,
        initial_mean * target_ratio,
        MACHINE_TOLERANCE,
    )
}

/// Compares the number of leveled particles with the expectation for normal weights.
///
/// Weights are drawn from a normal distribution with the given `mean` and
/// `deviation`, restricted to positive values, and leveled at
/// `mean * target_ratio`. A particle of weight `w <= L` is leveled with
/// probability `w / L`, so each particle is leveled independently with
/// probability `q = E[w; w <= L] / L`. The check fails outright when
/// `deviation` does not describe a normal distribution.
#[must_use]
pub fn gaussian_leveled_count_check(
    initial: u64,
    leveled: u64,
    mean: f64,
    deviation: f64,
    target_ratio: f64,
) -> CheckOutcome {
    let level = mean * target_ratio;
    let Some(q) = leveled_probability(mean, deviation, level) else {
        return CheckOutcome {
            name: "gaussian_leveled_count".to_owned(),
            observed: leveled as f64,
            expected: f64::NAN,
            tolerance: f64::NAN,
            passed: false,
        };
    };
    let initial = initial as f64;
    CheckOutcome::absolute(
        "gaussian_leveled_count",
        leveled as f64,
        initial * q,
        SIGMAS * (initial * q * (1.0 - q)).sqrt(),
    )
}

/// `E[w; 0 < w <= level] / level` for a normal weight conditioned on `w > 0`.
fn leveled_probability(mean: f64, deviation: f64, level: f64) -> Option<f64> {
    let normal = Normal::new(mean, deviation).ok()?;
    let variance = deviation * deviation;
    let partial_mean = mean * (normal.cdf(level) - normal.cdf(0.0))
        + variance * (normal.pdf(0.0) - normal.pdf(level));
    Some(partial_mean / (level * (1.0 - normal.cdf(0.0))))
}

/// Checks that weights above `level` survive unchanged.
///
/// Both samples must be sorted in ascending order. The check passes when the
/// number of weights above `level` is preserved and those weights are
/// bit-identical.
#[must_use]
pub fn tail_invariance_check(initial_sorted: &[f64], final_sorted: &[f64], level: f64) -> CheckOutcome {
    let tail = |sorted: &[f64]| sorted.len() - sorted.partition_point(|&weight| weight <= level);
    let before = tail(initial_sorted);
    let after = tail(final_sorted);

    let identical = before == after
        && initial_sorted[initial_sorted.len() - before..]
            .iter()
            .zip(&final_sorted[final_sorted.len() - after..])
            .all(|(a, b)| a.to_bits() == b.to_bits());

    CheckOutcome {
        name: "tail_invariance".to_owned(),
        observed: after as f64,
        expected: before as f64,
        tolerance: 0.0,
        passed: identical,
    }
}

/// Checks that total weight is conserved within `5 / sqrt(particles)` relative deviation.
#[must_use]
pub fn conservation_check(before: &[f64], after: &[f64], particles: u64) -> CheckOutcome {
    let total_before = kahan_sum(before.iter().copied());
    let total_after = kahan_sum(after.iter().copied());
    let tolerance = SIGMAS / (particles.max(1) as f64).sqrt();
    CheckOutcome::relative("weight_conservation", total_after, total_before, tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{PI, SQRT_2};

    #[test]
    fn uniform_count_bounds_follow_the_binomial_spread() {
        let outcome = uniform_count_check(102_400, 60_592, 1.3, 2);
        assert!(outcome.passed);
        assert_relative_eq!(outcome.expected, 102_400.0 / 1.69, max_relative = 1e-12);
        assert!(outcome.tolerance > 700.0 && outcome.tolerance < 900.0);
        assert!(!uniform_count_check(102_400, 59_000, 1.3, 2).passed);
    }

    #[test]
    fn uniform_weight_reports_the_worst_deviation() {
        let outcome = uniform_weight_check(&[1.69, 1.69, 1.7], 1.69);
        assert_eq!(outcome.observed, 1.7);
        assert!(!outcome.passed);
        assert!(uniform_weight_check(&[1.3 * 1.3; 4], 1.69).passed);
        assert!(!uniform_weight_check(&[], 1.69).passed);
    }

    #[test]
    fn leveled_probability_integrates_to_the_truncated_mean() {
        // Far above the distribution every particle is a candidate.
        let (mean, deviation) = (2.0 * SQRT_2, 1.0 / SQRT_2);
        let q = leveled_probability(mean, deviation, 1.0e3).expect("valid distribution");
        let kept = 1.0 - 0.5 * statrs::function::erf::erfc(4.0 / SQRT_2);
        let truncated_mean = mean + deviation * (-8.0_f64).exp() / (2.0 * PI).sqrt() / kept;
        assert_relative_eq!(q * 1.0e3, truncated_mean, max_relative = 1e-9);
    }

    #[test]
    fn degenerate_deviation_fails_the_leveled_count_check() {
        let outcome = gaussian_leveled_count_check(1_000, 500, 2.0, 0.0, 1.3);
        assert!(!outcome.passed);
        assert!(outcome.expected.is_nan());
        assert!(gaussian_leveled_count_check(1_000, 500, 2.0, -1.0, 1.3).expected.is_nan());
    }

    #[test]
    fn tail_changes_are_detected() {
        let before = [0.5, 1.0, 3.0, 4.0];
        assert!(tail_invariance_check(&before, &[2.0, 3.0, 4.0], 2.0).passed);
        assert!(!tail_invariance_check(&before, &[2.0, 4.0], 2.0).passed);
        assert!(!tail_invariance_check(&before, &[2.0, 3.0, 4.5], 2.0).passed);
    }

    #[test]
    fn conservation_scales_with_the_sample_size() {
        assert!(conservation_check(&[1.0; 100], &[1.2; 90], 100).passed);
        assert!(!conservation_check(&[1.0; 100], &[2.0; 90], 100).passed);
    }
}
