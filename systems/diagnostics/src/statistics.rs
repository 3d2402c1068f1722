use serde::{Deserialize, Serialize};

/// Summary statistics of a weight sample.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightStatistics {
    /// Number of weights.
    pub count: u64,
    /// Compensated sum of the weights.
    pub sum: f64,
    /// Arithmetic mean.
    pub mean: f64,
    /// Population variance.
    pub variance: f64,
    /// Smallest weight.
    pub min: f64,
    /// Largest weight.
    pub max: f64,
}

impl WeightStatistics {
    /// Computes the statistics of `weights`, or `None` for an empty sample.
    #[must_use]
    pub fn from_weights(weights: &[f64]) -> Option<Self> {
        if weights.is_empty() {
            return None;
        }

        let count = weights.len() as f64;
        let sum = kahan_sum(weights.iter().copied());
        let mean = sum / count;
        let variance = kahan_sum(weights.iter().map(|&weight| (weight - mean).powi(2))) / count;
        let (min, max) = weights
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &weight| {
                (min.min(weight), max.max(weight))
            });

        Some(Self {
            count: weights.len() as u64,
            sum,
            mean,
            variance,
            min,
            max,
        })
    }

    /// Square root of the population variance.
    #[must_use]
    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }
}

/// Kahan-compensated summation.
pub(crate) fn kahan_sum(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0_f64;
    let mut compensation = 0.0_f64;
    for value in values {
        let adjusted = value - compensation;
        let next = sum + adjusted;
        compensation = (next - sum) - adjusted;
        sum = next;
    }
    sum
}
