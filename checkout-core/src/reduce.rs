//! Time-window reduction of acquired samples
//!
//! A comparison with `reduce_period == 0` uses one instantaneous sample.
//! Otherwise `min_samples` readings are spread evenly across the window
//! (first at the start, last at the end) and collapsed with a
//! [`ReduceMethod`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{EvaluationError, EvaluationResult};
use crate::value::Value;

/// Divisor for the two-middle-values median
const MEDIAN_EVEN_DIVISOR: f64 = 2.0;

/// How a sample window becomes one scalar
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceMethod {
    /// Last sample, any type
    #[default]
    Single,
    /// Arithmetic mean
    Average,
    /// Middle value; mean of the two middle values for even counts
    Median,
    /// Sum of samples
    Sum,
    /// Smallest sample
    Min,
    /// Largest sample
    Max,
    /// Population standard deviation
    #[serde(alias = "std")]
    StdDev,
}

impl ReduceMethod {
    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Average => "average",
            Self::Median => "median",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::StdDev => "std_dev",
        }
    }
}

/// Number of reads and spacing for one acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplePlan {
    /// Reads to perform, always at least one
    pub count: usize,
    /// Delay between consecutive reads
    pub interval: Duration,
}

/// Upper bound on the reads of one acquisition
pub const MAX_SAMPLES: usize = 10_000;

/// Plan the reads for a window of `period` with `min_samples` reads, clamped to `1..=MAX_SAMPLES`
pub fn sample_plan(period: Duration, min_samples: usize) -> SamplePlan {
    if period.is_zero() {
        return SamplePlan { count: 1, interval: Duration::ZERO };
    }
    let count = min_samples.clamp(1, MAX_SAMPLES);
    let interval = match u32::try_from(count - 1) {
        Ok(0) | Err(_) => Duration::ZERO,
        Ok(gaps) => period / gaps,
    };
    SamplePlan { count, interval }
}

/// Collapse a sample window into one value
pub fn reduce(samples: &[Value], method: ReduceMethod) -> EvaluationResult<Value> {
    let last = samples.last().ok_or(EvaluationError::EmptyWindow)?;
    let values = match method {
        ReduceMethod::Single => return Ok(last.clone()),
        _ => numeric_samples(samples, method)?,
    };
    let reduced = match method {
        ReduceMethod::Single | ReduceMethod::Average => calculate_mean(&values),
        ReduceMethod::Median => calculate_median(values),
        ReduceMethod::Sum => values.iter().sum(),
        ReduceMethod::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        ReduceMethod::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        ReduceMethod::StdDev => calculate_std_dev(&values),
    };
    Ok(Value::Float(reduced))
}

fn numeric_samples(samples: &[Value], method: ReduceMethod) -> EvaluationResult<Vec<f64>> {
    samples
        .iter()
        .map(|v| {
            v.as_f64().ok_or(EvaluationError::NonNumeric {
                context: method.as_str(),
                found: v.type_name(),
            })
        })
        .collect()
}

fn calculate_mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn calculate_median(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / MEDIAN_EVEN_DIVISOR
    } else {
        values[mid]
    }
}

/// Population form: divides by `n`
fn calculate_std_dev(values: &[f64]) -> f64 {
    let mean = calculate_mean(values);
    let variance = values
        .iter()
        .map(|&v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / values.len() as f64;
    variance.sqrt()
}
