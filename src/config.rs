//! Server configuration, loaded from CLI flags / environment
//! variables / built-in defaults, in that precedence order.

use std::path::PathBuf;

use clap::Parser;

use crate::error::ConfigError;

/// Default winning number used when neither a flag nor
/// `SERVER_WINNING_NUMBER` is supplied. Mirrors the kind of fixed test
/// value the original source configured via its own environment.
const DEFAULT_WINNING_NUMBER: i64 = 7574;

/// Centralized lottery-bet collection and drawing server.
#[derive(Parser, Debug, Clone)]
#[command(name = "lotto-server")]
#[command(about = "Centralized lottery-bet collection and drawing server")]
#[command(version)]
pub struct Config {
    /// TCP port to listen on.
    #[arg(long, env = "SERVER_PORT", default_value = "12345")]
    pub port: u16,

    /// Listen backlog passed to the OS when binding the socket.
    #[arg(long, env = "SERVER_LISTEN_BACKLOG", default_value = "128")]
    pub listen_backlog: u32,

    /// Log level understood by `env_logger` (error, warn, info, debug, trace).
    #[arg(long, env = "LOGGING_LEVEL", default_value = "INFO")]
    pub log_level: String,

    /// Number of agencies (N) that must finish before the draw happens.
    #[arg(long, env = "SERVER_AGENCIES", default_value = "5")]
    pub agencies: u32,

    /// The winning number: a bet's `number` field wins iff it equals this.
    #[arg(long, env = "SERVER_WINNING_NUMBER", default_value_t = DEFAULT_WINNING_NUMBER)]
    pub winning_number: i64,

    /// Path to the CSV file backing the bet store.
    #[arg(long, env = "SERVER_BETS_FILE", default_value = "bets.csv")]
    pub bets_file: PathBuf,
}

impl Config {
    /// Parses configuration from `argv`/environment, then validates it.
    ///
    /// Separated from `clap::Parser::parse` so that the invariant
    /// checks below (not expressible as a `clap` constraint) run
    /// uniformly regardless of whether a value came from a flag, an
    /// environment variable, or the default.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::parse();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.agencies == 0 {
            return Err(ConfigError::ZeroAgencies(self.agencies));
        }
        Ok(())
    }
}
