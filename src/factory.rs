use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{FilterError, Result};
use crate::filter::FilterConfig;
use crate::live_game::{GameFilterParams, LiveGameProbabilityFilter};
use crate::player::{
    GameTable, PlayerFilterParams, PlayerPerformanceParticleFilter, PlayerPerformanceResult,
};

const MIN_FORM_VOLATILITY: f64 = 0.02;
const MAX_FORM_VOLATILITY: f64 = 0.50;
const MIN_NOISE_PER_MINUTE: f64 = 0.2;
const MAX_NOISE_PER_MINUTE: f64 = 5.0;

// Log-scale variance is roughly Poisson noise (1 / mean) plus form variance.
pub fn create_player_filter(
    history: &[f64],
    config: FilterConfig,
) -> Result<PlayerPerformanceParticleFilter> {
    if let Some(bad) = history.iter().find(|x| !(x.is_finite() && **x >= 0.0)) {
        return Err(FilterError::InvalidParameter {
            name: "history",
            value: *bad,
        });
    }
    let defaults = PlayerFilterParams::default();
    if history.len() < 2 {
        return PlayerPerformanceParticleFilter::new(defaults, config);
    }

    let mean_count = mean(history);
    let logs: Vec<f64> = history.iter().map(|x| (x + 0.5).ln()).collect();
    let log_mean = mean(&logs);
    let log_var = sample_variance(&logs);
    let excess = (log_var - 1.0 / (mean_count + 0.5)).max(0.0);

    let phi = defaults.form_persistence;
    let form_volatility =
        (excess * (1.0 - phi * phi)).sqrt().clamp(MIN_FORM_VOLATILITY, MAX_FORM_VOLATILITY);
    let params = PlayerFilterParams {
        skill_volatility: 0.1 * form_volatility,
        form_volatility,
        ..defaults
    };

    tracing::debug!(
        games = history.len(),
        log_mean,
        form_volatility,
        "inferred player filter parameters"
    );

    Ok(PlayerPerformanceParticleFilter::new(params, config)?
        .with_initial_state(log_mean, 0.0)
        .with_initial_variance(log_var.clamp(0.05, 1.0), excess.clamp(0.01, 0.25)))
}

pub fn create_game_filter(
    home_strength: f64,
    away_strength: f64,
    historical_margins: &[f64],
    config: FilterConfig,
) -> Result<LiveGameProbabilityFilter> {
    let mut params = GameFilterParams::new(home_strength, away_strength);
    let margins: Vec<f64> = historical_margins
        .iter()
        .copied()
        .filter(|m| m.is_finite())
        .collect();
    if margins.len() >= 2 {
        let sd = sample_variance(&margins).sqrt();
        params.noise_per_minute =
            (sd / params.game_minutes.sqrt()).clamp(MIN_NOISE_PER_MINUTE, MAX_NOISE_PER_MINUTE);
    }
    LiveGameProbabilityFilter::new(params, config)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSeason {
    pub player: String,
    pub games: GameTable,
}

#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub player: String,
    pub result: Result<PlayerPerformanceResult>,
}

/// Each player runs with seed `base + index`.
pub fn filter_players_batch(
    seasons: &[PlayerSeason],
    target_col: &str,
    config: FilterConfig,
) -> Vec<BatchEntry> {
    seasons
        .par_iter()
        .enumerate()
        .map(|(idx, season)| {
            let mut cfg = config;
            cfg.seed = config.seed.map(|s| s.wrapping_add(idx as u64));
            let result = season.games.column(target_col).and_then(|history| {
                let mut pf = create_player_filter(history, cfg)?;
                pf.filter_player_season(&season.games, target_col)
            });
            if let Err(err) = &result {
                tracing::warn!(player = %season.player, %err, "player season failed");
            }
            BatchEntry {
                player: season.player.clone(),
                result,
            }
        })
        .collect()
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn sample_variance(xs: &[f64]) -> f64 {
    let m = mean(xs);
    xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (xs.len() as f64 - 1.0)
}
