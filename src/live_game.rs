use rand::RngCore;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

use crate::error::{FilterError, Result};
use crate::filter::{
    FilterConfig, FilterResult, ObservationModel, ParticleFilter, TransitionModel,
    standard_normal,
};

const DEFAULT_INITIAL_VARIANCE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GameFilterParams {
    pub home_strength: f64,
    pub away_strength: f64,
    /// Differential noise per square-root minute of play.
    pub noise_per_minute: f64,
    pub observation_noise: f64,
    pub game_minutes: f64,
}

impl GameFilterParams {
    pub fn new(home_strength: f64, away_strength: f64) -> Self {
        Self {
            home_strength,
            away_strength,
            ..Self::default()
        }
    }

    /// Expected change in the differential per minute of play.
    pub fn drift_per_minute(&self) -> f64 {
        (self.home_strength - self.away_strength) / self.game_minutes
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("home_strength", self.home_strength),
            ("away_strength", self.away_strength),
        ] {
            if !value.is_finite() {
                return Err(FilterError::InvalidParameter { name, value });
            }
        }
        if !(self.noise_per_minute.is_finite() && self.noise_per_minute >= 0.0) {
            return Err(FilterError::InvalidParameter {
                name: "noise_per_minute",
                value: self.noise_per_minute,
            });
        }
        for (name, value) in [
            ("observation_noise", self.observation_noise),
            ("game_minutes", self.game_minutes),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(FilterError::InvalidParameter { name, value });
            }
        }
        Ok(())
    }
}

impl Default for GameFilterParams {
    fn default() -> Self {
        Self {
            home_strength: 0.0,
            away_strength: 0.0,
            noise_per_minute: 1.5,
            observation_noise: 1.0,
            game_minutes: 48.0,
        }
    }
}

/// Score differential random walk with strength drift and a Gaussian
/// observation of the scoreboard differential.
#[derive(Debug, Clone)]
pub struct GameModel {
    params: GameFilterParams,
    observation: Normal,
    unit: Normal,
}

impl GameModel {
    pub fn new(params: GameFilterParams) -> Result<Self> {
        params.validate()?;
        let observation =
            Normal::new(0.0, params.observation_noise).map_err(|_| FilterError::InvalidParameter {
                name: "observation_noise",
                value: params.observation_noise,
            })?;
        let unit = Normal::new(0.0, 1.0).map_err(|_| FilterError::InvalidParameter {
            name: "unit_normal",
            value: 1.0,
        })?;
        Ok(Self {
            params,
            observation,
            unit,
        })
    }

    pub fn params(&self) -> &GameFilterParams {
        &self.params
    }

    /// Probability that a differential currently at `diff` finishes
    /// positive after `remaining` minutes.
    pub fn finish_positive(&self, diff: f64, remaining: f64) -> f64 {
        let remaining = remaining.max(0.0);
        let end = diff + self.params.drift_per_minute() * remaining;
        let spread = self.params.noise_per_minute * remaining.sqrt();
        if spread > 0.0 {
            self.unit.cdf(end / spread)
        } else if end > 0.0 {
            1.0
        } else if end == 0.0 {
            0.5
        } else {
            0.0
        }
    }
}

impl TransitionModel for GameModel {
    fn state_dim(&self) -> usize {
        1
    }

    fn propagate(&self, particle: &mut [f64], dt: f64, rng: &mut dyn RngCore) {
        let dt = dt.max(0.0);
        particle[0] += self.params.drift_per_minute() * dt
            + self.params.noise_per_minute * dt.sqrt() * standard_normal(rng);
    }
}

impl ObservationModel for GameModel {
    fn observation_dim(&self) -> usize {
        1
    }

    fn likelihood(&self, particle: &[f64], observation: &[f64]) -> f64 {
        self.observation.pdf(observation[0] - particle[0])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreUpdate {
    /// Elapsed game time in minutes.
    pub minute: f64,
    pub home_score: u32,
    pub away_score: u32,
}

impl ScoreUpdate {
    pub fn new(minute: f64, home_score: u32, away_score: u32) -> Self {
        Self {
            minute,
            home_score,
            away_score,
        }
    }

    pub fn differential(&self) -> f64 {
        self.home_score as f64 - self.away_score as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Home,
    Away,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateResult {
    pub time_points: Vec<f64>,
    /// Home win probability after each update.
    pub win_probabilities: Vec<f64>,
    pub observed_differentials: Vec<f64>,
    pub expected_differentials: Vec<f64>,
    pub pregame_win_prob: f64,
    pub final_win_prob: f64,
    pub underdog: Side,
    /// Probability that the pregame underdog wins.
    pub upset_probability: f64,
    pub filter: FilterResult,
}

pub struct LiveGameProbabilityFilter {
    inner: ParticleFilter<GameModel, GameModel>,
    initial_variance: f64,
}

impl LiveGameProbabilityFilter {
    pub fn new(params: GameFilterParams, config: FilterConfig) -> Result<Self> {
        let model = GameModel::new(params)?;
        let inner = ParticleFilter::new(config, model.clone(), model)?;
        Ok(Self {
            inner,
            initial_variance: DEFAULT_INITIAL_VARIANCE,
        })
    }

    pub fn with_initial_variance(mut self, variance: f64) -> Self {
        self.initial_variance = variance;
        self
    }

    pub fn params(&self) -> &GameFilterParams {
        self.inner.transition().params()
    }

    pub fn filter(&self) -> &ParticleFilter<GameModel, GameModel> {
        &self.inner
    }

    /// Home win probability at `minute`, projecting each particle to the
    /// final whistle: the remaining drift shifts it and the remaining noise
    /// spreads it, so each particle contributes `P(final diff > 0)`. With no
    /// time left this is the weighted fraction of positive particles.
    pub fn win_probability(&self, minute: f64) -> f64 {
        home_win_probability(&self.inner, minute)
    }

    pub fn track_game(
        &mut self,
        score_updates: &[ScoreUpdate],
        initial_diff: f64,
    ) -> Result<GameStateResult> {
        let mut previous = 0.0;
        for update in score_updates {
            if !(update.minute.is_finite() && update.minute >= previous) {
                return Err(FilterError::NonMonotonicTime {
                    previous,
                    next: update.minute,
                });
            }
            previous = update.minute;
        }

        self.inner
            .initialize_particles(&[initial_diff], &[self.initial_variance])?;
        let pregame_win_prob = self.win_probability(0.0);

        let time_points: Vec<f64> = score_updates.iter().map(|u| u.minute).collect();
        let observed_differentials: Vec<f64> =
            score_updates.iter().map(ScoreUpdate::differential).collect();
        let elapsed = std::iter::once(0.0)
            .chain(time_points.iter().copied())
            .zip(&time_points)
            .map(|(last, minute)| minute - last);

        let mut win_probabilities = Vec::with_capacity(score_updates.len());
        let base = self.inner.run(
            elapsed.zip(&observed_differentials).map(|(dt, diff)| (dt, [*diff])),
            |t, pf| {
                win_probabilities.push(home_win_probability(pf, time_points[t]));
                Ok(())
            },
        )?;

        let final_win_prob = win_probabilities
            .last()
            .copied()
            .unwrap_or(pregame_win_prob);
        let underdog = if pregame_win_prob < 0.5 {
            Side::Home
        } else {
            Side::Away
        };
        let upset_probability = match underdog {
            Side::Home => final_win_prob,
            Side::Away => 1.0 - final_win_prob,
        };

        tracing::info!(
            updates = base.steps(),
            pregame_win_prob,
            final_win_prob,
            "game tracked"
        );

        Ok(GameStateResult {
            time_points,
            win_probabilities,
            observed_differentials,
            expected_differentials: base.component(0),
            pregame_win_prob,
            final_win_prob,
            underdog,
            upset_probability,
            filter: base,
        })
    }
}

/// Weighted mean over particles of the chance each finishes positive from
/// `minute`; see [`GameModel::finish_positive`].
fn home_win_probability(pf: &ParticleFilter<GameModel, GameModel>, minute: f64) -> f64 {
    let model = pf.transition();
    let remaining = model.params().game_minutes - minute;
    let p: f64 = pf
        .particles()
        .iter()
        .map(|(row, w)| w * model.finish_positive(row[0], remaining))
        .sum();
    p.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game_filter(home: f64, away: f64) -> LiveGameProbabilityFilter {
        LiveGameProbabilityFilter::new(
            GameFilterParams::new(home, away),
            FilterConfig::new(1000, 1).with_seed(21),
        )
        .unwrap()
    }

    #[test]
    fn stronger_home_side_is_pregame_favourite() {
        let mut pf = game_filter(6.0, 2.0);
        let result = pf.track_game(&[], 0.0).unwrap();
        assert!(result.pregame_win_prob > 0.5);
        assert_eq!(result.underdog, Side::Away);
        assert_eq!(result.final_win_prob, result.pregame_win_prob);
        assert!((result.upset_probability - (1.0 - result.pregame_win_prob)).abs() < 1e-12);
    }

    #[test]
    fn out_of_order_updates_are_rejected() {
        let mut pf = game_filter(5.0, 3.0);
        let updates = [ScoreUpdate::new(10.0, 10, 8), ScoreUpdate::new(5.0, 12, 8)];
        let err = pf.track_game(&updates, 0.0).unwrap_err();
        assert_eq!(
            err,
            FilterError::NonMonotonicTime {
                previous: 10.0,
                next: 5.0
            }
        );
    }

    #[test]
    fn final_whistle_reads_the_scoreboard() {
        let mut pf = game_filter(3.0, 5.0);
        let updates = [
            ScoreUpdate::new(24.0, 50, 52),
            ScoreUpdate::new(48.0, 101, 95),
        ];
        let result = pf.track_game(&updates, 0.0).unwrap();
        assert!(result.final_win_prob > 0.99);
        assert_eq!(result.underdog, Side::Home);
        assert!(result.upset_probability > 0.99);
    }

    #[test]
    fn non_finite_initial_diff_is_rejected() {
        let mut pf = game_filter(5.0, 3.0);
        let err = pf
            .track_game(&[ScoreUpdate::new(3.0, 3, 2)], f64::NAN)
            .unwrap_err();
        assert!(matches!(
            err,
            FilterError::InvalidParameter {
                name: "initial_state",
                ..
            }
        ));
    }

    #[test]
    fn rejects_non_positive_observation_noise() {
        let params = GameFilterParams {
            observation_noise: 0.0,
            ..GameFilterParams::new(1.0, 1.0)
        };
        assert!(GameModel::new(params).is_err());
    }
}
