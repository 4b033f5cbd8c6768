//! Breakpoint threshold selection over adjacent-unit distances.

use crate::config::{BreakpointThreshold, ThresholdType};

impl BreakpointThreshold {
    /// Derive the distance above which adjacent units are split.
    ///
    /// An empty distance list yields `f32::INFINITY` (nothing to split). The
    /// 0th percentile lies below every observed distance, so it marks every
    /// gap as a breakpoint.
    pub fn compute(&self, distances: &[f32]) -> f32 {
        if distances.is_empty() {
            return f32::INFINITY;
        }
        let amount = self.amount;
        match self.threshold_type {
            ThresholdType::Percentile => {
                if amount <= 0.0 {
                    f32::NEG_INFINITY
                } else {
                    percentile(distances, amount) as f32
                }
            }
            ThresholdType::StandardDeviation => {
                let (mean, std) = mean_and_std(distances);
                (mean + amount * std) as f32
            }
            ThresholdType::Interquartile => {
                let (mean, _) = mean_and_std(distances);
                let iqr = percentile(distances, 75.0) - percentile(distances, 25.0);
                (mean + amount * iqr) as f32
            }
            ThresholdType::Absolute => amount as f32,
        }
    }

    /// Indices `i` such that the gap between unit `i` and unit `i + 1` is a breakpoint.
    pub fn breakpoints(&self, distances: &[f32]) -> Vec<usize> {
        let threshold = self.compute(distances);
        distances
            .iter()
            .enumerate()
            .filter(|(_, d)| **d > threshold)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Percentile with linear interpolation between closest ranks.
fn percentile(values: &[f32], pct: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().map(|v| f64::from(*v)).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// Population mean and standard deviation.
fn mean_and_std(values: &[f32]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().map(|v| f64::from(*v)).sum::<f64>() / n;
    let variance = values.iter().map(|v| (f64::from(*v) - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}
