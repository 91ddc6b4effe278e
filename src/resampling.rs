use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::FilterError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplingMethod {
    #[default]
    Systematic,
    Multinomial,
    Stratified,
}

impl ResamplingMethod {
    pub const ALL: [ResamplingMethod; 3] = [
        ResamplingMethod::Systematic,
        ResamplingMethod::Multinomial,
        ResamplingMethod::Stratified,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ResamplingMethod::Systematic => "systematic",
            ResamplingMethod::Multinomial => "multinomial",
            ResamplingMethod::Stratified => "stratified",
        }
    }

    /// Draws `weights.len()` ancestor indices with this method.
    pub fn resample<R: Rng + ?Sized>(self, weights: &[f64], rng: &mut R) -> Vec<usize> {
        match self {
            ResamplingMethod::Systematic => systematic(weights, rng),
            ResamplingMethod::Multinomial => multinomial(weights, rng),
            ResamplingMethod::Stratified => stratified(weights, rng),
        }
    }
}

impl fmt::Display for ResamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResamplingMethod {
    type Err = FilterError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "systematic" => Ok(ResamplingMethod::Systematic),
            "multinomial" => Ok(ResamplingMethod::Multinomial),
            "stratified" => Ok(ResamplingMethod::Stratified),
            _ => Err(FilterError::UnknownResamplingMethod(raw.trim().to_string())),
        }
    }
}

/// One uniform offset in [0, 1/N), then N evenly spaced points.
pub fn systematic<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }
    let step = 1.0 / n as f64;
    let u0 = rng.gen_range(0.0..step);
    walk_cdf(weights, (0..n).map(|k| u0 + k as f64 * step))
}

/// One uniform draw inside each of the N equal strata of [0, 1).
pub fn stratified<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }
    let step = 1.0 / n as f64;
    let points: Vec<f64> = (0..n)
        .map(|k| (k as f64 + rng.r#gen::<f64>()) * step)
        .collect();
    walk_cdf(weights, points.into_iter())
}

/// N independent draws through the inverse CDF.
pub fn multinomial<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Vec<usize> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }
    let cdf = cumulative(weights);
    (0..n)
        .map(|_| {
            let u = rng.r#gen::<f64>();
            cdf.partition_point(|c| *c <= u).min(n - 1)
        })
        .collect()
}

/// Maps monotonically increasing points in [0, 1) to indices in one pass.
fn walk_cdf(weights: &[f64], points: impl Iterator<Item = f64>) -> Vec<usize> {
    let n = weights.len();
    let cdf = cumulative(weights);
    let mut out = Vec::with_capacity(n);
    let mut j = 0usize;
    for u in points {
        while j + 1 < n && cdf[j] <= u {
            j += 1;
        }
        out.push(j);
    }
    out
}

/// Normalized cumulative sum, pinned to 1.0 from the last positive weight
/// onwards so rounding never selects a trailing zero-weight particle.
/// Invalid or all-zero weight vectors are treated as uniform.
fn cumulative(weights: &[f64]) -> Vec<f64> {
    let n = weights.len();
    let total: f64 = weights.iter().map(|w| sanitize(*w)).sum();
    if !(total.is_finite() && total > 0.0) {
        return (1..=n).map(|k| k as f64 / n as f64).collect();
    }
    let mut cdf = Vec::with_capacity(n);
    let mut acc = 0.0;
    for w in weights {
        acc += sanitize(*w) / total;
        cdf.push(acc);
    }
    if let Some(last) = weights.iter().rposition(|w| sanitize(*w) > 0.0) {
        cdf[last..].fill(1.0);
    }
    cdf
}

fn sanitize(w: f64) -> f64 {
    if w.is_finite() && w > 0.0 { w } else { 0.0 }
}

/// ESS = 1 / sum(w^2). Returns 0 for empty, all-zero or non-finite weights.
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
    if sum_sq.is_finite() && sum_sq > 0.0 {
        1.0 / sum_sq
    } else {
        0.0
    }
}

/// Rescales `weights` to sum to one. Returns false when the weights were
/// unusable and had to be reset to uniform.
pub fn normalize(weights: &mut [f64]) -> bool {
    if weights.is_empty() {
        return true;
    }
    let total: f64 = weights.iter().map(|w| sanitize(*w)).sum();
    if total.is_finite() && total > 0.0 {
        for w in weights.iter_mut() {
            *w = sanitize(*w) / total;
        }
        true
    } else {
        let u = 1.0 / weights.len() as f64;
        weights.fill(u);
        false
    }
}

/// Shannon entropy (nats) of a normalized weight vector.
pub fn entropy(weights: &[f64]) -> f64 {
    weights
        .iter()
        .filter(|w| w.is_finite() && **w > 0.0)
        .map(|w| -w * w.ln())
        .sum()
}
