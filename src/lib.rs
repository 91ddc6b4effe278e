pub mod diagnostics;
pub mod error;
pub mod factory;
pub mod filter;
pub mod live_game;
pub mod logging;
pub mod player;
pub mod resampling;
pub mod settings;

pub use diagnostics::{
    DegeneracyDiagnostics, ResamplingComparison, compare_resampling_methods,
    diagnose_particle_degeneracy,
};
pub use error::FilterError;
pub use factory::{create_game_filter, create_player_filter, filter_players_batch};
pub use filter::{
    FilterConfig, FilterResult, ObservationModel, ParticleFilter, StateEstimate, TransitionModel,
};
pub use live_game::{GameFilterParams, GameStateResult, LiveGameProbabilityFilter, ScoreUpdate};
pub use player::{
    GameTable, PlayerFilterParams, PlayerPerformanceParticleFilter, PlayerPerformanceResult,
};
pub use resampling::ResamplingMethod;
