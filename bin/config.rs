//! Configuration for the standby simulator binary.
//!
//! Supports loading configuration from TOML files, environment variables,
//! or CLI arguments.

use std::{path::Path, time::Duration};

use clap::Parser;
use serde::{Deserialize, Serialize};
use standby::ElectionConfig;

/// CLI arguments for the standby simulator.
#[derive(Debug, Parser)]
#[command(name = "standby")]
#[command(about = "Simulated sequential-node leader election cluster")]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, env = "STANDBY_CONFIG")]
    pub config: Option<String>,

    /// Persistent node under which candidates register.
    #[arg(long, env = "STANDBY_ELECTION_PATH")]
    pub election_path: Option<String>,

    /// Number of simulated candidate processes.
    #[arg(long, env = "STANDBY_CANDIDATES")]
    pub candidates: Option<usize>,

    /// Fraction of the session timeout a leader may stay disconnected.
    #[arg(long, env = "STANDBY_THRESHOLD")]
    pub threshold: Option<f64>,

    /// Session timeout in milliseconds.
    #[arg(long, env = "STANDBY_SESSION_TIMEOUT_MS")]
    pub session_timeout_ms: Option<u64>,

    /// Interval between leader faults in milliseconds.
    #[arg(long, env = "STANDBY_CHAOS_INTERVAL_MS")]
    pub chaos_interval_ms: Option<u64>,

    /// How long an injected disconnect lasts in milliseconds.
    #[arg(long, env = "STANDBY_DISCONNECT_MS")]
    pub disconnect_ms: Option<u64>,

    /// How many times a process rejoins after losing the election.
    #[arg(long, env = "STANDBY_MAX_REJOINS")]
    pub max_rejoins: Option<u32>,

    /// Stop the simulation after this many milliseconds.
    #[arg(long, env = "STANDBY_RUN_FOR_MS")]
    pub run_for_ms: Option<u64>,
}

/// Configuration for the standby simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Persistent node under which candidates register.
    pub election_path: String,

    /// Number of simulated candidate processes.
    pub candidates: usize,

    /// Fraction of the session timeout a leader may stay disconnected.
    pub threshold: f64,

    /// Session timeout in milliseconds.
    pub session_timeout_ms: u64,

    /// Interval between leader faults in milliseconds.
    pub chaos_interval_ms: u64,

    /// How long an injected disconnect lasts in milliseconds.
    pub disconnect_ms: u64,

    /// How many times a process rejoins after losing the election.
    pub max_rejoins: u32,

    /// Stop the simulation after this many milliseconds.
    pub run_for_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            election_path: "/election".to_string(),
            candidates: 3,
            threshold: 0.7,
            session_timeout_ms: 3000,
            chaos_interval_ms: 5000,
            disconnect_ms: 1000,
            max_rejoins: 3,
            run_for_ms: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Load configuration from CLI arguments, optionally overriding with a config file.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Self::from_cli(Cli::parse())?;
        config.validate()?;
        Ok(config)
    }

    fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        // Start with config file if provided
        let mut config =
            if let Some(ref path) = cli.config { Self::from_file(path)? } else { Self::default() };

        // CLI args override config file values
        if let Some(election_path) = cli.election_path {
            config.election_path = election_path;
        }
        if let Some(candidates) = cli.candidates {
            config.candidates = candidates;
        }
        if let Some(threshold) = cli.threshold {
            config.threshold = threshold;
        }
        if let Some(session_timeout_ms) = cli.session_timeout_ms {
            config.session_timeout_ms = session_timeout_ms;
        }
        if let Some(chaos_interval_ms) = cli.chaos_interval_ms {
            config.chaos_interval_ms = chaos_interval_ms;
        }
        if let Some(disconnect_ms) = cli.disconnect_ms {
            config.disconnect_ms = disconnect_ms;
        }
        if let Some(max_rejoins) = cli.max_rejoins {
            config.max_rejoins = max_rejoins;
        }
        if cli.run_for_ms.is_some() {
            config.run_for_ms = cli.run_for_ms;
        }

        Ok(config)
    }

    /// Checks values the simulation cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.candidates == 0 {
            return Err(ConfigError::Invalid("candidates must be at least 1".to_string()));
        }
        if self.chaos_interval_ms == 0 {
            return Err(ConfigError::Invalid("chaos_interval_ms must be positive".to_string()));
        }
        self.election()
            .grace_period(self.session_timeout())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    /// Election settings shared by every simulated process.
    pub fn election(&self) -> ElectionConfig {
        ElectionConfig::new(self.election_path.clone(), self.threshold)
    }

    /// Session timeout of every simulated session.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse configuration file.
    #[error("failed to parse config: {0}")]
    Parse(toml::de::Error),

    /// A configuration value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.election_path, "/election");
        assert_eq!(config.candidates, 3);
        assert_eq!(config.session_timeout(), Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serde() {
        let config = Config {
            election_path: "/services/billing".to_string(),
            candidates: 5,
            threshold: 1.5,
            session_timeout_ms: 4000,
            chaos_interval_ms: 2000,
            disconnect_ms: 500,
            max_rejoins: 1,
            run_for_ms: Some(30_000),
        };

        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: Config = toml::from_str("candidates = 7\n").unwrap();
        assert_eq!(parsed.candidates, 7);
        assert_eq!(parsed.election_path, "/election");
    }

    #[test]
    fn test_cli_overrides_defaults() {
        let cli = Cli::parse_from(["standby", "--candidates", "4", "--threshold", "1.2"]);
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.candidates, 4);
        assert_eq!(config.threshold, 1.2);
        assert_eq!(config.session_timeout_ms, 3000);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let config = Config { threshold: 0.0, ..Config::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
