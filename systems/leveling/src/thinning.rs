//! Weight-conserving coin flips over a single cell's weight sample.

use pic_resampling_core::{
    LevelWeight, ResamplePlan, ResampledWeights, ResamplingConfig, ResamplingError, TargetRatio,
};
use rand::Rng;

use crate::level;

/// Reusable buffers for the sort and threshold search.
#[derive(Debug, Default)]
pub struct LevelingScratch {
    order: Vec<u32>,
    sorted: Vec<f64>,
    prefix: Vec<f64>,
}

impl LevelingScratch {
    /// Creates empty scratch buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Resamples one cell with the default level strategy and returns the new weights.
///
/// Untouched weights come first in the output, followed by the leveled survivors.
pub fn resample<R>(
    weights: &[f64],
    target_ratio: f64,
    rng: &mut R,
) -> Result<ResampledWeights, ResamplingError>
where
    R: Rng + ?Sized,
{
    let config = ResamplingConfig::new(TargetRatio::new(target_ratio)?);
    let mut scratch = LevelingScratch::new();
    let plan = plan_with(weights, |index| index as u32, &config, rng, &mut scratch)?;

    // Candidates form the sorted prefix; the untouched tail follows them.
    let candidates = plan.leveled().len() + plan.removed().len();
    let mut output = scratch.sorted[candidates..].to_vec();
    output.resize(plan.output_len(), plan.level_weight().get());
    Ok(ResampledWeights::new(output, plan))
}

/// Computes the selection descriptor for one cell; indices address `weights`.
pub fn plan<R>(
    weights: &[f64],
    config: &ResamplingConfig,
    rng: &mut R,
) -> Result<ResamplePlan, ResamplingError>
where
    R: Rng + ?Sized,
{
    let mut scratch = LevelingScratch::new();
    plan_with(weights, |index| index as u32, config, rng, &mut scratch)
}

/// Computes a plan whose indices are produced by `label`, reusing `scratch`.
///
/// `label` maps a position in `weights` to the index recorded in the plan,
/// which lets callers emit store indices directly.
pub fn plan_with<R, L>(
    weights: &[f64],
    label: L,
    config: &ResamplingConfig,
    rng: &mut R,
    scratch: &mut LevelingScratch,
) -> Result<ResamplePlan, ResamplingError>
where
    R: Rng + ?Sized,
    L: Fn(usize) -> u32,
{
    level::validate(weights)?;

    let LevelingScratch {
        order,
        sorted,
        prefix,
    } = scratch;

    order.clear();
    order.extend(0..weights.len() as u32);
    order.sort_unstable_by(|&a, &b| {
        weights[a as usize]
            .total_cmp(&weights[b as usize])
            .then(a.cmp(&b))
    });
    sorted.clear();
    sorted.extend(order.iter().map(|&index| weights[index as usize]));

    let level = level::level_weight(&sorted[..], prefix, config.target_ratio, config.strategy)?;
    let input_weight = prefix.last().copied().unwrap_or(0.0);

    let candidates = sorted.partition_point(|&weight| level.is_candidate(weight));
    let mut leveled = Vec::new();
    let mut removed = Vec::new();
    for (&index, &weight) in order[..candidates].iter().zip(&sorted[..candidates]) {
        if survives(weight, level, rng) {
            leveled.push(label(index as usize));
        } else {
            removed.push(label(index as usize));
        }
    }

    let untouched: Vec<u32> = order[candidates..]
        .iter()
        .map(|&index| label(index as usize))
        .collect();
    let untouched_weight: f64 = sorted[candidates..].iter().sum();

    Ok(ResamplePlan::new(
        level,
        input_weight,
        untouched_weight,
        untouched,
        leveled,
        removed,
    ))
}

fn survives<R>(weight: f64, level: LevelWeight, rng: &mut R) -> bool
where
    R: Rng + ?Sized,
{
    let draw: f64 = rng.gen();
    draw < weight / level.get()
}
