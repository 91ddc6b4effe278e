use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::filter::{FilterConfig, FilterResult, ObservationModel, ParticleFilter, TransitionModel};
use crate::resampling::{self, ResamplingMethod};

/// Average ESS below this fraction of N marks a run as degenerate.
pub const DEGENERATE_ESS_RATIO: f64 = 0.1;
/// Resampling nearly every step with a mediocre ESS is also a model mismatch.
pub const HIGH_RESAMPLING_RATE: f64 = 0.9;
pub const LOW_ESS_RATIO: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DegeneracyDiagnostics {
    pub average_ess: f64,
    pub min_ess: f64,
    /// `average_ess / N`.
    pub ess_ratio: f64,
    pub resampling_rate: f64,
    /// Shannon entropy (nats) of the final weights.
    pub weight_entropy: f64,
    /// `ln N`, the entropy of uniform weights.
    pub max_entropy: f64,
    pub is_degenerate: bool,
}

pub fn diagnose_particle_degeneracy(result: &FilterResult) -> DegeneracyDiagnostics {
    let n = result.particle_count.max(1) as f64;
    let weight_entropy = resampling::entropy(&result.final_weights);
    let max_entropy = n.ln();

    if result.is_empty() {
        return DegeneracyDiagnostics {
            average_ess: n,
            min_ess: n,
            ess_ratio: 1.0,
            resampling_rate: 0.0,
            weight_entropy,
            max_entropy,
            is_degenerate: false,
        };
    }

    let steps = result.steps() as f64;
    let average_ess = result.ess_history.iter().sum::<f64>() / steps;
    let min_ess = result
        .ess_history
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min);
    let ess_ratio = average_ess / n;
    let resampling_rate = result.resampling_count() as f64 / steps;

    let is_degenerate = ess_ratio < DEGENERATE_ESS_RATIO
        || (resampling_rate >= HIGH_RESAMPLING_RATE && ess_ratio < LOW_ESS_RATIO);

    DegeneracyDiagnostics {
        average_ess,
        min_ess,
        ess_ratio,
        resampling_rate,
        weight_entropy,
        max_entropy,
        is_degenerate,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResamplingComparison {
    pub method: ResamplingMethod,
    pub log_likelihood: f64,
    pub average_ess: f64,
    pub resampling_rate: f64,
}

/// Runs the same configuration once per resampling method, in parallel, with
/// identical seeds.
pub fn compare_resampling_methods<T, O, V>(
    observations: &[V],
    initial_state: &[f64],
    initial_variance: &[f64],
    config: FilterConfig,
    transition: &T,
    observation: &O,
) -> Result<Vec<ResamplingComparison>>
where
    T: TransitionModel + Clone + Send + Sync,
    O: ObservationModel + Clone + Send + Sync,
    V: AsRef<[f64]> + Sync,
{
    ResamplingMethod::ALL
        .par_iter()
        .map(|method| -> Result<ResamplingComparison> {
            let mut pf = ParticleFilter::new(
                config.with_resampling(*method),
                transition.clone(),
                observation.clone(),
            )?;
            let result = pf.filter(observations, initial_state, initial_variance)?;
            let diag = diagnose_particle_degeneracy(&result);
            Ok(ResamplingComparison {
                method: *method,
                log_likelihood: result.log_likelihood,
                average_ess: diag.average_ess,
                resampling_rate: diag.resampling_rate,
            })
        })
        .collect()
}
