use std::env;

use tracing::Level;

pub const LOG_ENV: &str = "SPORTS_SMC_LOG";

/// Installs a stderr fmt subscriber at the level named by `SPORTS_SMC_LOG`
/// (default `info`). Safe to call more than once.
pub fn init_logging() {
    let level = env::var(LOG_ENV)
        .ok()
        .and_then(|val| val.trim().parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
