//! Command line arguments and the resolved server configuration

use clap::Parser;
use shared::{GameSettings, DEFAULT_ANSWER_TIME, DEFAULT_COUNTDOWN_TIME, DEFAULT_ROUNDS_COUNT};
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Two truths and a lie session server", long_about = None)]
pub struct Args {
    /// Host address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Default seconds per round while guessing
    #[arg(long, default_value_t = DEFAULT_ANSWER_TIME)]
    pub answer_time: u32,

    /// Default number of statement sets per participant
    #[arg(long, default_value_t = DEFAULT_ROUNDS_COUNT)]
    pub rounds_count: u8,

    /// Default seconds to write statements after the game starts
    #[arg(long, default_value_t = DEFAULT_COUNTDOWN_TIME)]
    pub countdown_time: u32,

    /// Minutes a session may live without any connected participant
    #[arg(long, default_value_t = 30)]
    pub idle_timeout: u64,

    /// Endpoint that validates external session codes
    #[arg(long)]
    pub validation_url: Option<String>,

    /// Endpoint that receives end-of-game journals
    #[arg(long)]
    pub log_sink_url: Option<String>,

    /// Maximum number of concurrent sessions
    #[arg(long, default_value_t = 500)]
    pub max_sessions: usize,

    /// Maximum number of concurrent connections
    #[arg(long, default_value_t = 5000)]
    pub max_connections: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub defaults: GameSettings,
    pub idle_timeout: Duration,
    /// How often idle sessions are looked for
    pub reap_interval: Duration,
    pub validation_url: Option<String>,
    pub log_sink_url: Option<String>,
    pub max_sessions: usize,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            defaults: GameSettings::default(),
            idle_timeout: Duration::from_secs(30 * 60),
            reap_interval: Duration::from_secs(60),
            validation_url: None,
            log_sink_url: None,
            max_sessions: 500,
            max_connections: 5000,
        }
    }
}

impl ServerConfig {
    /// Resolves the arguments, rejecting default settings outside their bounds.
    pub fn from_args(args: &Args) -> Result<Self, String> {
        let defaults = GameSettings {
            answer_time: args.answer_time,
            rounds_count: args.rounds_count,
            countdown_time: args.countdown_time,
        };
        defaults.validate()?;

        Ok(Self {
            bind_addr: format!("{}:{}", args.host, args.port),
            defaults,
            idle_timeout: Duration::from_secs(args.idle_timeout * 60),
            validation_url: args.validation_url.clone(),
            log_sink_url: args.log_sink_url.clone(),
            max_sessions: args.max_sessions,
            max_connections: args.max_connections,
            ..Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["server"]).unwrap();
        let config = ServerConfig::from_args(&args).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.defaults, GameSettings::default());
        assert_eq!(config.idle_timeout, Duration::from_secs(1800));
        assert!(config.validation_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "server",
            "--host",
            "0.0.0.0",
            "-p",
            "9000",
            "--answer-time",
            "45",
            "--rounds-count",
            "3",
            "--validation-url",
            "http://localhost:7000/validate",
        ])
        .unwrap();
        let config = ServerConfig::from_args(&args).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.defaults.answer_time, 45);
        assert_eq!(config.defaults.rounds_count, 3);
        assert_eq!(
            config.validation_url.as_deref(),
            Some("http://localhost:7000/validate")
        );
    }

    #[test]
    fn test_out_of_range_defaults_rejected() {
        let args = Args::try_parse_from(["server", "--rounds-count", "9"]).unwrap();
        assert!(ServerConfig::from_args(&args).is_err());
    }
}
