use std::env;

use crate::error::Result;
use crate::filter::{DEFAULT_RESAMPLE_THRESHOLD, FilterConfig};
use crate::resampling::ResamplingMethod;

const DEFAULT_PARTICLES: usize = 1000;
const MAX_PARTICLES: usize = 1_000_000;

/// Filter settings shared by the command-line tools, read from `PF_*`
/// environment variables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSettings {
    pub particles: usize,
    pub resampling: ResamplingMethod,
    pub resample_threshold: f64,
    pub seed: Option<u64>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            particles: DEFAULT_PARTICLES,
            resampling: ResamplingMethod::Systematic,
            resample_threshold: DEFAULT_RESAMPLE_THRESHOLD,
            seed: None,
        }
    }
}

impl FilterSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Numeric values that fail to parse fall back to defaults; an unknown
    /// resampling method name is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key).and_then(|val| {
                let val = val.trim().to_string();
                if val.is_empty() { None } else { Some(val) }
            })
        };

        let particles = get("PF_PARTICLES")
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(DEFAULT_PARTICLES)
            .clamp(1, MAX_PARTICLES);
        let resampling = match get("PF_RESAMPLING") {
            Some(name) => name.parse::<ResamplingMethod>()?,
            None => ResamplingMethod::Systematic,
        };
        let resample_threshold = get("PF_RESAMPLE_THRESHOLD")
            .and_then(|val| val.parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .unwrap_or(DEFAULT_RESAMPLE_THRESHOLD)
            .clamp(0.0, 1.0);
        let seed = get("PF_SEED").and_then(|val| val.parse::<u64>().ok());

        Ok(Self {
            particles,
            resampling,
            resample_threshold,
            seed,
        })
    }

    pub fn to_config(&self, state_dim: usize) -> Result<FilterConfig> {
        let mut config = FilterConfig::new(self.particles, state_dim)
            .with_resampling(self.resampling)
            .with_threshold(self.resample_threshold);
        config.seed = self.seed;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FilterError;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let s = FilterSettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(s, FilterSettings::default());
    }

    #[test]
    fn parses_and_clamps() {
        let s = FilterSettings::from_lookup(lookup(&[
            ("PF_PARTICLES", "500"),
            ("PF_RESAMPLING", "stratified"),
            ("PF_RESAMPLE_THRESHOLD", "3.0"),
            ("PF_SEED", "42"),
        ]))
        .unwrap();
        assert_eq!(s.particles, 500);
        assert_eq!(s.resampling, ResamplingMethod::Stratified);
        assert_eq!(s.resample_threshold, 1.0);
        assert_eq!(s.seed, Some(42));

        let config = s.to_config(2).unwrap();
        assert_eq!(config.state_dim, 2);
        assert_eq!(config.seed, Some(42));
    }

    #[test]
    fn unknown_method_is_an_error() {
        let err = FilterSettings::from_lookup(lookup(&[("PF_RESAMPLING", "residual")])).unwrap_err();
        assert_eq!(
            err,
            FilterError::UnknownResamplingMethod("residual".to_string())
        );
    }
}
