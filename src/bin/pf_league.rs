use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use sports_smc::diagnostics::{self, DegeneracyDiagnostics};
use sports_smc::factory::{self, PlayerSeason};
use sports_smc::logging;
use sports_smc::player::GameTable;
use sports_smc::settings::FilterSettings;

const DEFAULT_SEED: u64 = 2024;

#[derive(Debug, Deserialize)]
struct LeagueFile {
    #[serde(default = "default_target")]
    target: String,
    players: Vec<PlayerRecords>,
}

#[derive(Debug, Deserialize)]
struct PlayerRecords {
    player: String,
    games: Vec<HashMap<String, f64>>,
}

#[derive(Debug, Serialize)]
struct LeagueReport {
    generated_at: String,
    target: String,
    players: Vec<PlayerRow>,
    failed: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PlayerRow {
    player: String,
    games: usize,
    final_skill: f64,
    final_form: f64,
    mean_skill: f64,
    log_likelihood: f64,
    diagnostics: DegeneracyDiagnostics,
}

fn default_target() -> String {
    "points".to_string()
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    logging::init_logging();

    let path = std::env::args()
        .nth(1)
        .filter(|arg| !arg.starts_with("--"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("tests/fixtures/league.json"));
    let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let file: LeagueFile = serde_json::from_str(&raw).context("parse league file")?;
    if file.players.is_empty() {
        return Err(anyhow!("no players in {}", path.display()));
    }

    let settings = FilterSettings::from_env().context("filter settings")?;
    let mut config = settings.to_config(2)?;
    config.seed = Some(config.seed.unwrap_or(DEFAULT_SEED));

    let seasons: Vec<PlayerSeason> = file
        .players
        .iter()
        .map(|p| PlayerSeason {
            player: p.player.clone(),
            games: GameTable::from_records(&p.games),
        })
        .collect();

    let entries = factory::filter_players_batch(&seasons, &file.target, config);

    let mut players = Vec::new();
    let mut failed = Vec::new();
    for entry in entries {
        match entry.result {
            Ok(season) => players.push(PlayerRow {
                player: entry.player,
                games: season.games,
                final_skill: season.skill_trajectory.last().copied().unwrap_or(f64::NAN),
                final_form: season.latest_form().unwrap_or(0.0),
                mean_skill: season.mean_skill().unwrap_or(f64::NAN),
                log_likelihood: season.filter.log_likelihood,
                diagnostics: diagnostics::diagnose_particle_degeneracy(&season.filter),
            }),
            Err(err) => failed.push(format!("{}: {err}", entry.player)),
        }
    }
    players.sort_by(|a, b| b.final_skill.total_cmp(&a.final_skill));

    let report = LeagueReport {
        generated_at: chrono::Utc::now().to_rfc3339(),
        target: file.target,
        players,
        failed,
    };
    let json = serde_json::to_string_pretty(&report).context("serialize league report")?;

    match parse_out_arg() {
        Some(out) => {
            let tmp = out.with_extension("json.tmp");
            fs::write(&tmp, json).context("write league report")?;
            fs::rename(&tmp, &out).context("swap league report")?;
            println!("Wrote {} players to {}", report.players.len(), out.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn parse_out_arg() -> Option<PathBuf> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == "--out" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
