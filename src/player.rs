use std::collections::{BTreeMap, HashMap};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

use crate::error::{FilterError, Result};
use crate::filter::{
    FilterConfig, FilterResult, ObservationModel, ParticleFilter, TransitionModel,
    standard_normal,
};

pub const SKILL: usize = 0;
pub const FORM: usize = 1;

// Keeps exp(log_rate) finite for wild particles.
const MAX_ABS_LOG_RATE: f64 = 30.0;
const DEFAULT_INITIAL_VARIANCE: [f64; 2] = [0.25, 0.05];
const PRIOR_GAMES: usize = 5;

/// A covariate folded additively into the log scoring rate:
/// `coefficient * (value - center)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Covariate {
    pub column: String,
    pub coefficient: f64,
    #[serde(default)]
    pub center: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerFilterParams {
    pub skill_drift: f64,
    pub skill_volatility: f64,
    pub form_persistence: f64,
    pub form_volatility: f64,
    #[serde(default)]
    pub covariates: Vec<Covariate>,
}

impl Default for PlayerFilterParams {
    fn default() -> Self {
        Self {
            skill_drift: 0.0,
            skill_volatility: 0.02,
            form_persistence: 0.7,
            form_volatility: 0.15,
            covariates: Vec::new(),
        }
    }
}

impl PlayerFilterParams {
    pub fn validate(&self) -> Result<()> {
        if !self.skill_drift.is_finite() {
            return Err(FilterError::InvalidParameter {
                name: "skill_drift",
                value: self.skill_drift,
            });
        }
        for (name, value) in [
            ("skill_volatility", self.skill_volatility),
            ("form_volatility", self.form_volatility),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(FilterError::InvalidParameter { name, value });
            }
        }
        if !(self.form_persistence > 0.0 && self.form_persistence < 1.0) {
            return Err(FilterError::InvalidParameter {
                name: "form_persistence",
                value: self.form_persistence,
            });
        }
        for cov in &self.covariates {
            if !(cov.coefficient.is_finite() && cov.center.is_finite()) {
                return Err(FilterError::InvalidParameter {
                    name: "covariate",
                    value: cov.coefficient,
                });
            }
        }
        Ok(())
    }
}

/// Observations are `[count, log_offset]`.
#[derive(Debug, Clone)]
pub struct PlayerModel {
    params: PlayerFilterParams,
}

impl PlayerModel {
    pub fn new(params: PlayerFilterParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &PlayerFilterParams {
        &self.params
    }
}

impl TransitionModel for PlayerModel {
    fn state_dim(&self) -> usize {
        2
    }

    fn propagate(&self, particle: &mut [f64], dt: f64, rng: &mut dyn RngCore) {
        let p = &self.params;
        let dt = dt.max(0.0);
        let root_dt = dt.sqrt();
        particle[SKILL] += p.skill_drift * dt + p.skill_volatility * root_dt * standard_normal(rng);
        particle[FORM] = p.form_persistence.powf(dt) * particle[FORM]
            + p.form_volatility * root_dt * standard_normal(rng);
    }
}

impl ObservationModel for PlayerModel {
    fn observation_dim(&self) -> usize {
        2
    }

    fn likelihood(&self, particle: &[f64], observation: &[f64]) -> f64 {
        let log_rate = (particle[SKILL] + particle[FORM] + observation[1])
            .clamp(-MAX_ABS_LOG_RATE, MAX_ABS_LOG_RATE);
        poisson_log_pmf(observation[0], log_rate).exp()
    }
}

pub fn poisson_log_pmf(k: f64, log_rate: f64) -> f64 {
    k * log_rate - log_rate.exp() - ln_gamma(k + 1.0)
}

/// Column-oriented per-game table, one entry per game in time order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGameTable")]
pub struct GameTable {
    columns: BTreeMap<String, Vec<f64>>,
    rows: usize,
}

#[derive(Deserialize)]
struct RawGameTable {
    columns: BTreeMap<String, Vec<f64>>,
    rows: usize,
}

impl TryFrom<RawGameTable> for GameTable {
    type Error = FilterError;

    fn try_from(raw: RawGameTable) -> Result<Self> {
        if let Some(values) = raw.columns.values().find(|v| v.len() != raw.rows) {
            return Err(FilterError::DimensionMismatch {
                what: "table column",
                expected: raw.rows,
                found: values.len(),
            });
        }
        Ok(Self {
            columns: raw.columns,
            rows: raw.rows,
        })
    }
}

impl GameTable {
    /// Cells missing from a row become NaN.
    pub fn from_records(records: &[HashMap<String, f64>]) -> Self {
        let mut columns: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for record in records {
            for key in record.keys() {
                columns.entry(key.clone()).or_default();
            }
        }
        for (name, values) in columns.iter_mut() {
            values.extend(
                records
                    .iter()
                    .map(|r| r.get(name).copied().unwrap_or(f64::NAN)),
            );
        }
        Self {
            columns,
            rows: records.len(),
        }
    }

    pub fn from_column(name: &str, values: Vec<f64>) -> Self {
        let rows = values.len();
        let mut columns = BTreeMap::new();
        columns.insert(name.to_string(), values);
        Self { columns, rows }
    }

    pub fn with_column(mut self, name: &str, values: Vec<f64>) -> Result<Self> {
        if values.len() != self.rows {
            return Err(FilterError::DimensionMismatch {
                what: "table column",
                expected: self.rows,
                found: values.len(),
            });
        }
        self.columns.insert(name.to_string(), values);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.columns
            .get(name)
            .map(|v| v.as_slice())
            .ok_or_else(|| FilterError::MissingColumn(name.to_string()))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerPerformanceResult {
    pub target_col: String,
    pub games: usize,
    pub skill_trajectory: Vec<f64>,
    pub form_states: Vec<f64>,
    pub skill_variance: Vec<f64>,
    pub form_variance: Vec<f64>,
    /// Posterior 5% and 95% skill quantiles per game.
    pub skill_band: Vec<(f64, f64)>,
    /// `exp(skill + form)` per game, ignoring covariates.
    pub expected_rate: Vec<f64>,
    pub filter: FilterResult,
}

impl PlayerPerformanceResult {
    pub fn mean_skill(&self) -> Option<f64> {
        if self.skill_trajectory.is_empty() {
            return None;
        }
        Some(self.skill_trajectory.iter().sum::<f64>() / self.skill_trajectory.len() as f64)
    }

    pub fn latest_form(&self) -> Option<f64> {
        self.form_states.last().copied()
    }
}

pub struct PlayerPerformanceParticleFilter {
    inner: ParticleFilter<PlayerModel, PlayerModel>,
    initial_state: Option<[f64; 2]>,
    initial_variance: [f64; 2],
}

impl PlayerPerformanceParticleFilter {
    pub fn new(params: PlayerFilterParams, config: FilterConfig) -> Result<Self> {
        let model = PlayerModel::new(params)?;
        let inner = ParticleFilter::new(config, model.clone(), model)?;
        Ok(Self {
            inner,
            initial_state: None,
            initial_variance: DEFAULT_INITIAL_VARIANCE,
        })
    }

    pub fn with_initial_state(mut self, skill: f64, form: f64) -> Self {
        self.initial_state = Some([skill, form]);
        self
    }

    pub fn with_initial_variance(mut self, skill: f64, form: f64) -> Self {
        self.initial_variance = [skill, form];
        self
    }

    pub fn params(&self) -> &PlayerFilterParams {
        self.inner.observation().params()
    }

    pub fn filter(&self) -> &ParticleFilter<PlayerModel, PlayerModel> {
        &self.inner
    }

    pub fn filter_player_season(
        &mut self,
        data: &GameTable,
        target_col: &str,
    ) -> Result<PlayerPerformanceResult> {
        let observations = self.observations(data, target_col)?;
        let (initial_state, initial_variance) = self.prior(&observations);
        self.inner
            .initialize_particles(&initial_state, &initial_variance)?;

        let mut skill_band = Vec::with_capacity(observations.len());
        let base = self
            .inner
            .run(observations.iter().map(|obs| (1.0, obs)), |_, pf| {
                skill_band.push((pf.quantile(SKILL, 0.05)?, pf.quantile(SKILL, 0.95)?));
                Ok(())
            })?;

        let skill_trajectory = base.component(SKILL);
        let form_states = base.component(FORM);
        let expected_rate = skill_trajectory
            .iter()
            .zip(&form_states)
            .map(|(s, f)| (s + f).exp())
            .collect();

        tracing::info!(
            target_col,
            games = base.steps(),
            log_likelihood = base.log_likelihood,
            "player season filtered"
        );

        Ok(PlayerPerformanceResult {
            target_col: target_col.to_string(),
            games: base.steps(),
            skill_variance: base.variance_component(SKILL),
            form_variance: base.variance_component(FORM),
            skill_trajectory,
            form_states,
            skill_band,
            expected_rate,
            filter: base,
        })
    }

    pub fn observations(&self, data: &GameTable, target_col: &str) -> Result<Vec<[f64; 2]>> {
        let target = data.column(target_col)?;
        if target.len() != data.len() {
            return Err(FilterError::DimensionMismatch {
                what: "target column",
                expected: data.len(),
                found: target.len(),
            });
        }
        if let Some(bad) = target.iter().find(|k| !(k.is_finite() && **k >= 0.0)) {
            return Err(FilterError::InvalidParameter {
                name: "target",
                value: *bad,
            });
        }
        let mut offsets = vec![0.0; data.len()];
        for cov in &self.params().covariates {
            let values = data.column(&cov.column)?;
            for (o, v) in offsets.iter_mut().zip(values) {
                // Missing cells contribute nothing.
                if v.is_finite() {
                    *o += cov.coefficient * (v - cov.center);
                }
            }
        }
        Ok(target
            .iter()
            .zip(offsets)
            .map(|(count, offset)| [*count, offset])
            .collect())
    }

    pub fn prior(&self, observations: &[[f64; 2]]) -> ([f64; 2], [f64; 2]) {
        let state = self
            .initial_state
            .unwrap_or_else(|| [opening_log_rate(observations), 0.0]);
        (state, self.initial_variance)
    }
}

fn opening_log_rate(observations: &[[f64; 2]]) -> f64 {
    let head = &observations[..observations.len().min(PRIOR_GAMES)];
    if head.is_empty() {
        return 0.0;
    }
    let mean = head.iter().map(|obs| obs[0]).sum::<f64>() / head.len() as f64;
    (mean + 0.5).ln()
}
