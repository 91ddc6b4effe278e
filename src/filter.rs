//! Bootstrap particle filter over a flat `N x d` particle buffer.
//!
//! The proposal is the transition prior: each step moves every particle
//! through a [`TransitionModel`], reweights by an [`ObservationModel`]
//! likelihood and resamples when the effective sample size drops below
//! `resample_threshold * N`.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FilterError, Result};
use crate::resampling::{self, ResamplingMethod};

/// Smallest per-particle likelihood; keeps a step where every particle fits
/// badly from zeroing the whole weight vector.
pub const LIKELIHOOD_FLOOR: f64 = 1e-300;

pub const DEFAULT_RESAMPLE_THRESHOLD: f64 = 0.5;

pub trait TransitionModel {
    fn state_dim(&self) -> usize;

    fn propagate(&self, particle: &mut [f64], dt: f64, rng: &mut dyn RngCore);
}

pub trait ObservationModel {
    fn observation_dim(&self) -> usize;

    fn likelihood(&self, particle: &[f64], observation: &[f64]) -> f64;
}

pub struct FnTransition<F> {
    dim: usize,
    f: F,
}

impl<F> FnTransition<F>
where
    F: Fn(&mut [f64], f64, &mut dyn RngCore),
{
    pub fn new(dim: usize, f: F) -> Self {
        Self { dim, f }
    }
}

impl<F> TransitionModel for FnTransition<F>
where
    F: Fn(&mut [f64], f64, &mut dyn RngCore),
{
    fn state_dim(&self) -> usize {
        self.dim
    }

    fn propagate(&self, particle: &mut [f64], dt: f64, rng: &mut dyn RngCore) {
        (self.f)(particle, dt, rng)
    }
}

pub struct FnObservation<F> {
    dim: usize,
    f: F,
}

impl<F> FnObservation<F>
where
    F: Fn(&[f64], &[f64]) -> f64,
{
    pub fn new(dim: usize, f: F) -> Self {
        Self { dim, f }
    }
}

impl<F> ObservationModel for FnObservation<F>
where
    F: Fn(&[f64], &[f64]) -> f64,
{
    fn observation_dim(&self) -> usize {
        self.dim
    }

    fn likelihood(&self, particle: &[f64], observation: &[f64]) -> f64 {
        (self.f)(particle, observation)
    }
}

/// Gaussian random walk; noise standard deviation scales with `sqrt(dt)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomWalk {
    pub noise_std: Vec<f64>,
}

impl TransitionModel for RandomWalk {
    fn state_dim(&self) -> usize {
        self.noise_std.len()
    }

    fn propagate(&self, particle: &mut [f64], dt: f64, rng: &mut dyn RngCore) {
        let scale = dt.max(0.0).sqrt();
        for (x, sd) in particle.iter_mut().zip(&self.noise_std) {
            if *sd > 0.0 {
                *x += sd * scale * standard_normal(rng);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GaussianObservation {
    pub dim: usize,
    pub sigma: f64,
}

impl ObservationModel for GaussianObservation {
    fn observation_dim(&self) -> usize {
        self.dim
    }

    fn likelihood(&self, particle: &[f64], observation: &[f64]) -> f64 {
        let sq: f64 = particle
            .iter()
            .zip(observation)
            .map(|(x, z)| (x - z) * (x - z))
            .sum();
        (-0.5 * sq / (self.sigma * self.sigma)).exp()
    }
}

pub(crate) fn standard_normal(rng: &mut dyn RngCore) -> f64 {
    let z: f64 = StandardNormal.sample(rng);
    z
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub particle_count: usize,
    pub state_dim: usize,
    #[serde(default)]
    pub resampling: ResamplingMethod,
    /// Resample when ESS / N falls below this fraction. Zero disables
    /// resampling except for fully degenerate weights.
    pub resample_threshold: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl FilterConfig {
    pub fn new(particle_count: usize, state_dim: usize) -> Self {
        Self {
            particle_count,
            state_dim,
            resampling: ResamplingMethod::Systematic,
            resample_threshold: DEFAULT_RESAMPLE_THRESHOLD,
            seed: None,
        }
    }

    pub fn with_resampling(mut self, method: ResamplingMethod) -> Self {
        self.resampling = method;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.resample_threshold = threshold;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.particle_count == 0 {
            return Err(FilterError::InvalidParticleCount);
        }
        if self.state_dim == 0 {
            return Err(FilterError::InvalidStateDim);
        }
        if !(0.0..=1.0).contains(&self.resample_threshold) {
            return Err(FilterError::InvalidThreshold(self.resample_threshold));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ParticleSet {
    dim: usize,
    states: Vec<f64>,
    weights: Vec<f64>,
}

impl ParticleSet {
    fn new(count: usize, dim: usize) -> Self {
        Self {
            dim,
            states: vec![0.0; count * dim],
            weights: vec![1.0 / count as f64; count],
        }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn particle(&self, i: usize) -> &[f64] {
        &self.states[i * self.dim..(i + 1) * self.dim]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[f64], f64)> {
        self.states.chunks_exact(self.dim).zip(self.weights.iter().copied())
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn reset_uniform(&mut self) {
        let u = 1.0 / self.len() as f64;
        self.weights.fill(u);
    }

    fn gather(&mut self, indices: &[usize]) {
        let d = self.dim;
        let mut next = Vec::with_capacity(self.states.len());
        for &i in indices {
            next.extend_from_slice(&self.states[i * d..(i + 1) * d]);
        }
        self.states = next;
        self.reset_uniform();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEstimate {
    pub mean: Vec<f64>,
    pub variance: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub log_evidence: f64,
    /// ESS after the update, before any resampling.
    pub ess: f64,
    pub resampled: bool,
    pub estimate: StateEstimate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterResult {
    pub state_dim: usize,
    pub particle_count: usize,
    /// `T x d` row-major, as are `variances`.
    pub means: Vec<f64>,
    pub variances: Vec<f64>,
    pub ess_history: Vec<f64>,
    pub resampled: Vec<bool>,
    pub log_likelihood: f64,
    pub final_weights: Vec<f64>,
}

impl FilterResult {
    pub(crate) fn new(state_dim: usize, particle_count: usize) -> Self {
        Self {
            state_dim,
            particle_count,
            means: Vec::new(),
            variances: Vec::new(),
            ess_history: Vec::new(),
            resampled: Vec::new(),
            log_likelihood: 0.0,
            final_weights: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, step: &StepRecord) {
        self.means.extend_from_slice(&step.estimate.mean);
        self.variances.extend_from_slice(&step.estimate.variance);
        self.ess_history.push(step.ess);
        self.resampled.push(step.resampled);
        self.log_likelihood += step.log_evidence;
    }

    pub fn steps(&self) -> usize {
        self.ess_history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ess_history.is_empty()
    }

    pub fn mean(&self, t: usize) -> &[f64] {
        &self.means[t * self.state_dim..(t + 1) * self.state_dim]
    }

    pub fn variance(&self, t: usize) -> &[f64] {
        &self.variances[t * self.state_dim..(t + 1) * self.state_dim]
    }

    pub fn component(&self, j: usize) -> Vec<f64> {
        self.means
            .chunks_exact(self.state_dim)
            .map(|row| row[j])
            .collect()
    }

    pub fn variance_component(&self, j: usize) -> Vec<f64> {
        self.variances
            .chunks_exact(self.state_dim)
            .map(|row| row[j])
            .collect()
    }

    pub fn resampling_count(&self) -> usize {
        self.resampled.iter().filter(|r| **r).count()
    }
}

pub struct ParticleFilter<T, O> {
    config: FilterConfig,
    transition: T,
    observation: O,
    particles: ParticleSet,
    rng: StdRng,
}

impl<T, O> ParticleFilter<T, O>
where
    T: TransitionModel,
    O: ObservationModel,
{
    pub fn new(config: FilterConfig, transition: T, observation: O) -> Result<Self> {
        config.validate()?;
        if transition.state_dim() != config.state_dim {
            return Err(FilterError::DimensionMismatch {
                what: "transition model state",
                expected: config.state_dim,
                found: transition.state_dim(),
            });
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            particles: ParticleSet::new(config.particle_count, config.state_dim),
            config,
            transition,
            observation,
            rng,
        })
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn particles(&self) -> &ParticleSet {
        &self.particles
    }

    pub fn transition(&self) -> &T {
        &self.transition
    }

    pub fn observation(&self) -> &O {
        &self.observation
    }

    pub fn ess(&self) -> f64 {
        resampling::effective_sample_size(&self.particles.weights)
    }

    pub fn initialize_particles(
        &mut self,
        initial_state: &[f64],
        initial_variance: &[f64],
    ) -> Result<()> {
        let d = self.config.state_dim;
        check_len("initial_state", d, initial_state.len())?;
        check_len("initial_variance", d, initial_variance.len())?;
        if let Some(bad) = initial_state.iter().find(|x| !x.is_finite()) {
            return Err(FilterError::InvalidParameter {
                name: "initial_state",
                value: *bad,
            });
        }
        if let Some(bad) = initial_variance
            .iter()
            .find(|v| !(v.is_finite() && **v >= 0.0))
        {
            return Err(FilterError::InvalidParameter {
                name: "initial_variance",
                value: *bad,
            });
        }

        let sds: Vec<f64> = initial_variance.iter().map(|v| v.sqrt()).collect();
        for row in self.particles.states.chunks_exact_mut(d) {
            for ((x, mu), sd) in row.iter_mut().zip(initial_state).zip(&sds) {
                *x = mu + sd * standard_normal(&mut self.rng);
            }
        }
        self.particles.reset_uniform();
        Ok(())
    }

    pub fn predict(&mut self) {
        self.predict_by(1.0);
    }

    pub fn predict_by(&mut self, dt: f64) {
        let d = self.config.state_dim;
        for row in self.particles.states.chunks_exact_mut(d) {
            self.transition.propagate(row, dt, &mut self.rng);
        }
    }

    /// Returns this step's log evidence, `ln sum(w * likelihood)`.
    pub fn update(&mut self, observation: &[f64]) -> Result<f64> {
        check_len(
            "observation",
            self.observation.observation_dim(),
            observation.len(),
        )?;

        let d = self.config.state_dim;
        let mut evidence = 0.0;
        let mut floored = 0usize;
        for (row, w) in self
            .particles
            .states
            .chunks_exact(d)
            .zip(self.particles.weights.iter_mut())
        {
            let raw = self.observation.likelihood(row, observation);
            let lik = if raw.is_nan() {
                LIKELIHOOD_FLOOR
            } else {
                raw.clamp(LIKELIHOOD_FLOOR, f64::MAX)
            };
            if lik <= LIKELIHOOD_FLOOR {
                floored += 1;
            }
            evidence += *w * lik;
            *w *= lik;
        }

        if floored == self.particles.len() {
            warn!(
                particles = floored,
                "every particle likelihood hit the floor"
            );
        }
        if !resampling::normalize(&mut self.particles.weights) {
            warn!("weights collapsed after update; reset to uniform");
        }

        Ok(evidence.max(LIKELIHOOD_FLOOR).ln())
    }

    pub fn resample_if_needed(&mut self) -> bool {
        let n = self.particles.len() as f64;
        let ess = self.ess();
        if ess > 0.0 && ess >= self.config.resample_threshold * n {
            return false;
        }
        let indices = self
            .config
            .resampling
            .resample(&self.particles.weights, &mut self.rng);
        self.particles.gather(&indices);
        debug!(
            method = %self.config.resampling,
            ess,
            particles = self.particles.len(),
            "resampled"
        );
        true
    }

    pub fn get_state_estimate(&self) -> StateEstimate {
        let d = self.config.state_dim;
        let mut mean = vec![0.0; d];
        for (row, w) in self.particles.iter() {
            for (m, x) in mean.iter_mut().zip(row) {
                *m += w * x;
            }
        }
        let mut variance = vec![0.0; d];
        for (row, w) in self.particles.iter() {
            for ((v, x), m) in variance.iter_mut().zip(row).zip(&mean) {
                *v += w * (x - m) * (x - m);
            }
        }
        StateEstimate { mean, variance }
    }

    pub fn quantile(&self, dim: usize, q: f64) -> Result<f64> {
        if dim >= self.config.state_dim {
            return Err(FilterError::DimensionMismatch {
                what: "quantile component",
                expected: self.config.state_dim,
                found: dim,
            });
        }
        if !(0.0..=1.0).contains(&q) {
            return Err(FilterError::InvalidParameter {
                name: "quantile",
                value: q,
            });
        }
        let mut pairs: Vec<(f64, f64)> = self
            .particles
            .iter()
            .map(|(row, w)| (row[dim], w))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut acc = 0.0;
        for (x, w) in &pairs {
            acc += w;
            if acc >= q {
                return Ok(*x);
            }
        }
        Ok(pairs.last().map(|p| p.0).unwrap_or(0.0))
    }

    pub fn step(&mut self, dt: f64, observation: &[f64]) -> Result<StepRecord> {
        check_len(
            "observation",
            self.observation.observation_dim(),
            observation.len(),
        )?;
        self.predict_by(dt);
        let log_evidence = self.update(observation)?;
        let ess = self.ess();
        let resampled = self.resample_if_needed();
        Ok(StepRecord {
            log_evidence,
            ess,
            resampled,
            estimate: self.get_state_estimate(),
        })
    }

    pub fn filter<V: AsRef<[f64]>>(
        &mut self,
        observations: &[V],
        initial_state: &[f64],
        initial_variance: &[f64],
    ) -> Result<FilterResult> {
        let obs_dim = self.observation.observation_dim();
        for obs in observations {
            check_len("observation", obs_dim, obs.as_ref().len())?;
        }
        self.initialize_particles(initial_state, initial_variance)?;

        let steps = observations
            .iter()
            .map(AsRef::<[f64]>::as_ref)
            .map(|obs| (1.0, obs));
        let result = self.run(steps, |_, _| Ok(()))?;

        info!(
            steps = result.steps(),
            log_likelihood = result.log_likelihood,
            resamples = result.resampling_count(),
            "filter run complete"
        );
        Ok(result)
    }

    /// Steps through `(dt, observation)` pairs from the current particle
    /// cloud, calling `on_step(t, self)` after each step.
    pub(crate) fn run<I, V, F>(&mut self, steps: I, mut on_step: F) -> Result<FilterResult>
    where
        I: IntoIterator<Item = (f64, V)>,
        V: AsRef<[f64]>,
        F: FnMut(usize, &Self) -> Result<()>,
    {
        let mut result = FilterResult::new(self.config.state_dim, self.config.particle_count);
        for (t, (dt, obs)) in steps.into_iter().enumerate() {
            let step = self.step(dt, obs.as_ref())?;
            result.record(&step);
            on_step(t, self)?;
        }
        result.final_weights = self.particles.weights.clone();
        Ok(result)
    }
}

fn check_len(what: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(FilterError::DimensionMismatch {
            what,
            expected,
            found,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk_filter(n: usize, seed: u64) -> ParticleFilter<RandomWalk, GaussianObservation> {
        ParticleFilter::new(
            FilterConfig::new(n, 1).with_seed(seed),
            RandomWalk {
                noise_std: vec![0.2],
            },
            GaussianObservation { dim: 1, sigma: 0.5 },
        )
        .unwrap()
    }

    #[test]
    fn rejects_bad_configuration() {
        let t = RandomWalk {
            noise_std: vec![0.1],
        };
        let o = GaussianObservation { dim: 1, sigma: 1.0 };
        let err = ParticleFilter::new(FilterConfig::new(0, 1), t.clone(), o).err();
        assert_eq!(err, Some(FilterError::InvalidParticleCount));

        let err = ParticleFilter::new(FilterConfig::new(10, 0), t.clone(), o).err();
        assert_eq!(err, Some(FilterError::InvalidStateDim));

        let err = ParticleFilter::new(FilterConfig::new(10, 1).with_threshold(1.5), t.clone(), o)
            .err();
        assert_eq!(err, Some(FilterError::InvalidThreshold(1.5)));

        let err = ParticleFilter::new(FilterConfig::new(10, 2), t, o).err();
        assert!(matches!(err, Some(FilterError::DimensionMismatch { .. })));
    }

    #[test]
    fn initialize_checks_shapes() {
        let mut pf = walk_filter(10, 1);
        let err = pf.initialize_particles(&[0.0, 1.0], &[1.0]).unwrap_err();
        assert!(!err.is_configuration());
        assert!(pf.initialize_particles(&[0.0], &[-1.0]).is_err());
        assert!(pf.initialize_particles(&[0.0], &[1.0]).is_ok());
    }

    #[test]
    fn initialize_rejects_non_finite_state() {
        let mut pf = walk_filter(10, 1);
        let err = pf.initialize_particles(&[f64::NAN], &[1.0]).unwrap_err();
        assert!(matches!(
            err,
            FilterError::InvalidParameter {
                name: "initial_state",
                ..
            }
        ));
        assert!(pf.initialize_particles(&[f64::INFINITY], &[1.0]).is_err());
    }

    #[test]
    fn initial_estimate_matches_initial_state() {
        let mut pf = ParticleFilter::new(
            FilterConfig::new(1000, 2).with_seed(11),
            RandomWalk {
                noise_std: vec![0.1, 0.1],
            },
            GaussianObservation { dim: 2, sigma: 1.0 },
        )
        .unwrap();
        pf.initialize_particles(&[3.0, -1.0], &[0.25, 0.25]).unwrap();
        let est = pf.get_state_estimate();
        assert!((est.mean[0] - 3.0).abs() < 0.1);
        assert!((est.mean[1] + 1.0).abs() < 0.1);
        assert!((est.variance[0] - 0.25).abs() < 0.05);
    }

    #[test]
    fn update_keeps_weights_normalized() {
        let mut pf = walk_filter(200, 3);
        pf.initialize_particles(&[0.0], &[1.0]).unwrap();
        for z in [0.5, 1.0, 40.0, -3.0] {
            pf.predict();
            pf.update(&[z]).unwrap();
            let sum: f64 = pf.particles().weights().iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
            assert!(pf.particles().weights().iter().all(|w| *w >= 0.0));
            pf.resample_if_needed();
            let sum: f64 = pf.particles().weights().iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn wrong_observation_length_fails_fast() {
        let mut pf = walk_filter(20, 5);
        pf.initialize_particles(&[0.0], &[1.0]).unwrap();
        let err = pf.update(&[1.0, 2.0]).unwrap_err();
        assert_eq!(
            err,
            FilterError::DimensionMismatch {
                what: "observation",
                expected: 1,
                found: 2,
            }
        );
        let res = pf.filter(&[vec![1.0], vec![1.0, 2.0]], &[0.0], &[1.0]);
        assert!(res.is_err());
    }

    #[test]
    fn empty_sequence_gives_empty_result() {
        let mut pf = walk_filter(50, 8);
        let empty: Vec<Vec<f64>> = Vec::new();
        let result = pf.filter(&empty, &[0.0], &[1.0]).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.log_likelihood, 0.0);
        assert_eq!(result.final_weights.len(), 50);
    }

    #[test]
    fn hopeless_observation_does_not_collapse_weights() {
        let mut pf = ParticleFilter::new(
            FilterConfig::new(100, 1).with_seed(2),
            RandomWalk {
                noise_std: vec![0.0],
            },
            GaussianObservation {
                dim: 1,
                sigma: 1e-3,
            },
        )
        .unwrap();
        pf.initialize_particles(&[0.0], &[0.01]).unwrap();
        let ll = pf.update(&[1e6]).unwrap();
        assert!(ll.is_finite());
        let sum: f64 = pf.particles().weights().iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(pf.ess() > 0.0);
    }

    #[test]
    fn zero_threshold_disables_resampling() {
        let mut pf = ParticleFilter::new(
            FilterConfig::new(100, 1).with_seed(4).with_threshold(0.0),
            RandomWalk {
                noise_std: vec![0.1],
            },
            GaussianObservation { dim: 1, sigma: 0.1 },
        )
        .unwrap();
        let obs: Vec<Vec<f64>> = (0..10).map(|_| vec![1.0]).collect();
        let result = pf.filter(&obs, &[0.0], &[1.0]).unwrap();
        assert_eq!(result.resampling_count(), 0);
    }

    #[test]
    fn quantiles_bracket_the_mean() {
        let mut pf = walk_filter(500, 12);
        pf.initialize_particles(&[2.0], &[1.0]).unwrap();
        let lo = pf.quantile(0, 0.05).unwrap();
        let hi = pf.quantile(0, 0.95).unwrap();
        let mean = pf.get_state_estimate().mean[0];
        assert!(lo < mean && mean < hi);
        assert!(pf.quantile(1, 0.5).is_err());
        assert!(pf.quantile(0, 1.5).is_err());
    }

    #[test]
    fn closures_act_as_models() {
        let t = FnTransition::new(1, |x: &mut [f64], dt: f64, _rng: &mut dyn RngCore| {
            x[0] += dt;
        });
        let o = FnObservation::new(1, |x: &[f64], z: &[f64]| {
            (-0.5 * (x[0] - z[0]).powi(2)).exp()
        });
        let mut pf = ParticleFilter::new(FilterConfig::new(64, 1).with_seed(9), t, o).unwrap();
        pf.initialize_particles(&[0.0], &[0.0]).unwrap();
        pf.predict_by(2.5);
        let est = pf.get_state_estimate();
        assert!((est.mean[0] - 2.5).abs() < 1e-12);
        assert!(est.variance[0].abs() < 1e-12);
    }
}
