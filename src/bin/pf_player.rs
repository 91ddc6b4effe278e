use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use sports_smc::diagnostics::{self, DegeneracyDiagnostics, ResamplingComparison};
use sports_smc::factory;
use sports_smc::logging;
use sports_smc::player::{GameTable, PlayerFilterParams, PlayerPerformanceParticleFilter};
use sports_smc::settings::FilterSettings;
use sports_smc::PlayerPerformanceResult;

#[derive(Debug, Deserialize)]
struct SeasonFile {
    #[serde(default)]
    player: Option<String>,
    #[serde(default = "default_target")]
    target: String,
    #[serde(default)]
    params: Option<PlayerFilterParams>,
    games: Vec<HashMap<String, f64>>,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    player: &'a str,
    season: &'a PlayerPerformanceResult,
    diagnostics: DegeneracyDiagnostics,
    #[serde(skip_serializing_if = "Option::is_none")]
    comparison: Option<Vec<ResamplingComparison>>,
}

fn default_target() -> String {
    "points".to_string()
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    logging::init_logging();

    let path = parse_path_arg()
        .unwrap_or_else(|| PathBuf::from("tests/fixtures/player_season.json"));
    let raw = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let file: SeasonFile = serde_json::from_str(&raw).context("parse season file")?;

    let settings = FilterSettings::from_env().context("filter settings")?;
    let config = settings.to_config(2)?;
    let target = parse_str_arg("--target").unwrap_or(file.target);
    let player = file.player.unwrap_or_else(|| "player".to_string());
    let table = GameTable::from_records(&file.games);

    let mut pf = match file.params {
        Some(params) => PlayerPerformanceParticleFilter::new(params, config)?,
        None => factory::create_player_filter(table.column(&target)?, config)?,
    };
    let season = pf.filter_player_season(&table, &target)?;
    let diag = diagnostics::diagnose_particle_degeneracy(&season.filter);

    let comparison = if has_flag("--compare") {
        let observations = pf.observations(&table, &target)?;
        let (initial_state, initial_variance) = pf.prior(&observations);
        let model = pf.filter().transition();
        Some(diagnostics::compare_resampling_methods(
            &observations,
            &initial_state,
            &initial_variance,
            config,
            model,
            model,
        )?)
    } else {
        None
    };

    if has_flag("--json") {
        let report = Report {
            player: &player,
            season: &season,
            diagnostics: diag,
            comparison,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{player}: {} games of {target}", season.games);
    println!("{:>4} {:>8} {:>8} {:>8} {:>16}", "game", "skill", "form", "rate", "skill 90%");
    for g in 0..season.games {
        let (lo, hi) = season.skill_band[g];
        println!(
            "{:>4} {:>8.3} {:>8.3} {:>8.2} {:>7.3}..{:<7.3}",
            g + 1,
            season.skill_trajectory[g],
            season.form_states[g],
            season.expected_rate[g],
            lo,
            hi
        );
    }
    println!("Log-likelihood: {:.3}", season.filter.log_likelihood);
    println!(
        "ESS avg/min: {:.1}/{:.1}  resampling rate: {:.2}  degenerate: {}",
        diag.average_ess, diag.min_ess, diag.resampling_rate, diag.is_degenerate
    );
    if let Some(rows) = comparison {
        for row in rows {
            println!(
                "{:<12} loglik {:>10.3}  avg ESS {:>8.1}",
                row.method.name(),
                row.log_likelihood,
                row.average_ess
            );
        }
    }

    Ok(())
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn parse_path_arg() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--target" {
            args.next();
            continue;
        }
        if !arg.starts_with("--") {
            return Some(PathBuf::from(arg));
        }
    }
    None
}

fn parse_str_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
        if let Some(val) = arg.strip_prefix(&format!("{flag}=")) {
            return Some(val.to_string());
        }
    }
    None
}
