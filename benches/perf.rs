use std::collections::HashMap;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::hint::black_box;

use sports_smc::filter::{FilterConfig, GaussianObservation, ParticleFilter, RandomWalk};
use sports_smc::live_game::{GameFilterParams, LiveGameProbabilityFilter, ScoreUpdate};
use sports_smc::player::{GameTable, PlayerFilterParams, PlayerPerformanceParticleFilter};
use sports_smc::resampling::{self, ResamplingMethod};

fn skewed_weights(n: usize) -> Vec<f64> {
    let mut w: Vec<f64> = (0..n).map(|i| ((i % 97) as f64 * 0.1).exp()).collect();
    resampling::normalize(&mut w);
    w
}

fn bench_resampling(c: &mut Criterion) {
    let weights = skewed_weights(10_000);
    let mut group = c.benchmark_group("resample_10k");
    for method in ResamplingMethod::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(method), &method, |b, m| {
            let mut rng = StdRng::seed_from_u64(1);
            b.iter(|| {
                let idx = m.resample(black_box(&weights), &mut rng);
                black_box(idx.len());
            })
        });
    }
    group.finish();
}

fn bench_random_walk_filter(c: &mut Criterion) {
    let obs: Vec<Vec<f64>> = (0..100).map(|t| vec![(t as f64 * 0.1).sin()]).collect();
    c.bench_function("random_walk_filter_1k_x100", |b| {
        b.iter(|| {
            let mut pf = ParticleFilter::new(
                FilterConfig::new(1000, 1).with_seed(3),
                RandomWalk {
                    noise_std: vec![0.2],
                },
                GaussianObservation { dim: 1, sigma: 0.5 },
            )
            .unwrap();
            let result = pf.filter(black_box(&obs), &[0.0], &[1.0]).unwrap();
            black_box(result.log_likelihood);
        })
    });
}

fn bench_player_season(c: &mut Criterion) {
    let games: Vec<HashMap<String, f64>> = serde_json::from_str::<serde_json::Value>(PLAYER_JSON)
        .ok()
        .and_then(|v| serde_json::from_value(v["games"].clone()).ok())
        .expect("valid fixture json");
    let table = GameTable::from_records(&games);
    c.bench_function("player_season_1k", |b| {
        b.iter(|| {
            let mut pf = PlayerPerformanceParticleFilter::new(
                PlayerFilterParams::default(),
                FilterConfig::new(1000, 2).with_seed(5),
            )
            .unwrap();
            let result = pf.filter_player_season(black_box(&table), "points").unwrap();
            black_box(result.mean_skill());
        })
    });
}

fn bench_live_game(c: &mut Criterion) {
    let updates: Vec<ScoreUpdate> = (1..=16u32)
        .map(|i| ScoreUpdate::new(3.0 * i as f64, 6 * i, 5 * i + i % 3))
        .collect();
    c.bench_function("live_game_1k", |b| {
        b.iter(|| {
            let mut pf = LiveGameProbabilityFilter::new(
                GameFilterParams::new(5.0, 3.0),
                FilterConfig::new(1000, 1).with_seed(7),
            )
            .unwrap();
            let result = pf.track_game(black_box(&updates), 0.0).unwrap();
            black_box(result.final_win_prob);
        })
    });
}

criterion_group!(
    perf,
    bench_resampling,
    bench_random_walk_filter,
    bench_player_season,
    bench_live_game
);
criterion_main!(perf);

static PLAYER_JSON: &str = include_str!("../tests/fixtures/player_season.json");
