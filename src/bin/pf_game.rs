use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use sports_smc::diagnostics;
use sports_smc::factory;
use sports_smc::live_game::ScoreUpdate;
use sports_smc::logging;
use sports_smc::settings::FilterSettings;

#[derive(Debug, serde::Deserialize)]
struct GameCase {
    #[serde(default)]
    home: Option<String>,
    #[serde(default)]
    away: Option<String>,
    home_strength: f64,
    away_strength: f64,
    #[serde(default)]
    initial_diff: f64,
    #[serde(default)]
    historical_margins: Vec<f64>,
    updates: Vec<ScoreUpdate>,
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    logging::init_logging();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("tests/fixtures/game_case.json"));
    let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let case: GameCase = serde_json::from_str(&raw).context("parse game case")?;

    let settings = FilterSettings::from_env().context("filter settings")?;
    let mut pf = factory::create_game_filter(
        case.home_strength,
        case.away_strength,
        &case.historical_margins,
        settings.to_config(1)?,
    )?;
    let game = pf.track_game(&case.updates, case.initial_diff)?;
    let diag = diagnostics::diagnose_particle_degeneracy(&game.filter);

    let home = case.home.unwrap_or_else(|| "HOME".to_string());
    let away = case.away.unwrap_or_else(|| "AWAY".to_string());
    println!("{home} vs {away}");
    println!("Pregame {home} win: {:.1}%", game.pregame_win_prob * 100.0);
    for (i, minute) in game.time_points.iter().enumerate() {
        println!(
            "{:>6.1}'  diff {:>+4.0}  est {:>+6.2}  {home} win {:>5.1}%",
            minute,
            game.observed_differentials[i],
            game.expected_differentials[i],
            game.win_probabilities[i] * 100.0
        );
    }
    println!("Final {home} win: {:.1}%", game.final_win_prob * 100.0);
    println!("Underdog: {:?}  upset: {:.1}%", game.underdog, game.upset_probability * 100.0);
    println!("Avg ESS: {:.1}  degenerate: {}", diag.average_ess, diag.is_degenerate);

    Ok(())
}
