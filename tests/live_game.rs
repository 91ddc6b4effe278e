use std::fs;
use std::path::PathBuf;

use sports_smc::factory::create_game_filter;
use sports_smc::filter::FilterConfig;
use sports_smc::live_game::{GameFilterParams, LiveGameProbabilityFilter, ScoreUpdate, Side};

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

fn growing_lead() -> Vec<ScoreUpdate> {
    (1..=15u32)
        .map(|i| ScoreUpdate::new(3.0 * i as f64, 3 * i, 2 * i))
        .collect()
}

#[test]
fn growing_home_lead_raises_win_probability() {
    let mut pf = LiveGameProbabilityFilter::new(
        GameFilterParams::new(5.0, 3.0),
        FilterConfig::new(2000, 1).with_seed(31),
    )
    .unwrap();
    let result = pf.track_game(&growing_lead(), 0.0).unwrap();

    assert_eq!(result.time_points.len(), 15);
    assert_eq!(result.win_probabilities.len(), 15);
    assert_eq!(result.observed_differentials[14], 15.0);
    assert!(result.pregame_win_prob > 0.5);
    assert!(result.final_win_prob > 0.5);
    assert_eq!(result.underdog, Side::Away);
    assert!(result.upset_probability < 0.5);

    for t in 1..result.win_probabilities.len() {
        assert!(
            result.win_probabilities[t] + 1e-6 >= result.win_probabilities[t - 1],
            "win probability dropped at {}: {} -> {}",
            result.time_points[t],
            result.win_probabilities[t - 1],
            result.win_probabilities[t]
        );
    }
    assert!(
        result
            .win_probabilities
            .iter()
            .all(|p| (0.0..=1.0).contains(p))
    );
    assert!((result.expected_differentials[14] - 15.0).abs() < 2.0);
}

#[test]
fn fixture_game_tracks_every_update() {
    let raw = read_fixture("game_case.json");
    let case: serde_json::Value = serde_json::from_str(&raw).expect("fixture should parse");
    let updates: Vec<ScoreUpdate> =
        serde_json::from_value(case["updates"].clone()).expect("updates should parse");
    let margins: Vec<f64> =
        serde_json::from_value(case["historical_margins"].clone()).expect("margins should parse");
    let home = case["home_strength"].as_f64().unwrap();
    let away = case["away_strength"].as_f64().unwrap();

    let mut pf = create_game_filter(home, away, &margins, FilterConfig::new(1000, 1).with_seed(8))
        .unwrap();
    let result = pf.track_game(&updates, 0.0).unwrap();
    assert_eq!(result.time_points.len(), updates.len());
    assert_eq!(result.filter.steps(), updates.len());
    assert!(result.final_win_prob.is_finite());
    assert!(result.filter.log_likelihood.is_finite());
}

#[test]
fn equal_timestamps_are_accepted() {
    let mut pf = LiveGameProbabilityFilter::new(
        GameFilterParams::new(4.0, 4.0),
        FilterConfig::new(500, 1).with_seed(3),
    )
    .unwrap();
    let updates = [
        ScoreUpdate::new(10.0, 20, 18),
        ScoreUpdate::new(10.0, 20, 21),
    ];
    let result = pf.track_game(&updates, 0.0).unwrap();
    assert_eq!(result.time_points, vec![10.0, 10.0]);
}

#[test]
fn even_matchup_sits_near_a_coin_flip() {
    let mut pf = LiveGameProbabilityFilter::new(
        GameFilterParams::new(4.0, 4.0),
        FilterConfig::new(2000, 1).with_seed(12),
    )
    .unwrap();
    let result = pf.track_game(&[], 0.0).unwrap();
    assert!((result.pregame_win_prob - 0.5).abs() < 0.05);
}
