//! Level-weight search over a sorted weight sample.

use pic_resampling_core::{
    Degeneracy, InvalidInput, LevelStrategy, LevelWeight, ResamplingError, TargetRatio,
};

/// Checks that the sample is non-empty and every weight is positive and finite.
pub(crate) fn validate(weights: &[f64]) -> Result<(), ResamplingError> {
    if weights.is_empty() {
        return Err(ResamplingError::InvalidResamplingInput(
            InvalidInput::EmptyWeights,
        ));
    }
    if let Some((index, &weight)) = weights
        .iter()
        .enumerate()
        .find(|(_, weight)| !(weight.is_finite() && **weight > 0.0))
    {
        return Err(ResamplingError::InvalidResamplingInput(
            InvalidInput::NonPositiveWeight { index, weight },
        ));
    }
    Ok(())
}

/// Derives the level weight from weights sorted in ascending order.
///
/// `prefix` receives the running sums of `sorted`; its last entry is the total weight.
pub(crate) fn level_weight(
    sorted: &[f64],
    prefix: &mut Vec<f64>,
    ratio: TargetRatio,
    strategy: LevelStrategy,
) -> Result<LevelWeight, ResamplingError> {
    // Neumaier-compensated running sums keep the mean accurate to a few ulps.
    prefix.clear();
    let mut running = 0.0_f64;
    let mut compensation = 0.0_f64;
    prefix.extend(sorted.iter().map(|&weight| {
        let next = running + weight;
        if running.abs() >= weight.abs() {
            compensation += (running - next) + weight;
        } else {
            compensation += (weight - next) + running;
        }
        running = next;
        running + compensation
    }));

    let total = prefix.last().copied().unwrap_or(0.0);
    if !total.is_finite() {
        return Err(ResamplingError::NumericalDegeneracy(
            Degeneracy::NonFiniteTotalWeight,
        ));
    }

    let closed_form = average_level(total, sorted.len(), ratio);
    let level = match strategy {
        LevelStrategy::AverageWeight => closed_form,
        LevelStrategy::CountTarget => count_target_level(sorted, prefix, ratio)
            .filter(|level| level.is_finite() && *level > 0.0)
            .unwrap_or(closed_form),
    };

    if level.is_finite() && level > 0.0 {
        Ok(LevelWeight::new(level))
    } else {
        Err(ResamplingError::NumericalDegeneracy(
            Degeneracy::NonFiniteLevelWeight(level),
        ))
    }
}

/// Target ratio times the sample mean.
fn average_level(total: f64, count: usize, ratio: TargetRatio) -> f64 {
    let average = total / count as f64;
    average * ratio.get()
}

/// Solves `count(w > L) + sum(w <= L) / L = n / ratio` exactly.
///
/// With `g(k) = (n - 1 - k) + prefix[k] / sorted[k]` the expected output
/// count at `L = sorted[k]`, `g` is non-increasing and `g(0) = n`, so the root
/// lies in the segment starting at the last `k` with `g(k) >= n / ratio`.
/// Returns `None` when rounding places the root outside that segment.
fn count_target_level(sorted: &[f64], prefix: &[f64], ratio: TargetRatio) -> Option<f64> {
    let count = sorted.len();
    let target = count as f64 / ratio.get();
    let expected_at = |k: usize| (count - 1 - k) as f64 + prefix[k] / sorted[k];

    let (mut low, mut high) = (0, count);
    while low < high {
        let mid = low + (high - low) / 2;
        if expected_at(mid) >= target {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    let segment = low.checked_sub(1)?;

    let untouched = (count - 1 - segment) as f64;
    let level = prefix[segment] / (target - untouched);

    let lower = sorted[segment];
    let upper = sorted.get(segment + 1).copied().unwrap_or(f64::INFINITY);
    (level >= lower && level <= upper).then_some(level)
}
