use clap::Parser;
use std::time::Duration;

use crate::codec::DEFAULT_MAX_FRAME_SIZE;

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 15;
pub const DEFAULT_SHUTDOWN_TOLERANCE_SECS: u64 = 15;

/// Server settings. Every option can also be given through its environment variable.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(version, about)]
pub struct Config {
    /// The address to bind to
    #[arg(long, env = "RESPKV_BIND", default_value = DEFAULT_BIND)]
    pub bind: String,

    /// The port to listen on
    #[arg(short, long, env = "RESPKV_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Maximum number of clients served at the same time
    #[arg(long, env = "RESPKV_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Seconds a connection may stay idle before it is closed, 0 disables the limit
    #[arg(long = "keep-alive", env = "RESPKV_KEEP_ALIVE", default_value_t = DEFAULT_KEEP_ALIVE_SECS)]
    pub keep_alive_secs: u64,

    /// Maximum size in bytes of a single request frame
    #[arg(long, env = "RESPKV_MAX_FRAME_SIZE", default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,

    /// Seconds given to open connections to finish once shutdown starts
    #[arg(
        long = "shutdown-tolerance",
        env = "RESPKV_SHUTDOWN_TOLERANCE",
        default_value_t = DEFAULT_SHUTDOWN_TOLERANCE_SECS
    )]
    pub shutdown_tolerance_secs: u64,
}

impl Config {
    pub fn keep_alive(&self) -> Option<Duration> {
        (self.keep_alive_secs > 0).then(|| Duration::from_secs(self.keep_alive_secs))
    }

    pub fn shutdown_tolerance(&self) -> Duration {
        Duration::from_secs(self.shutdown_tolerance_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            shutdown_tolerance_secs: DEFAULT_SHUTDOWN_TOLERANCE_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_command_line_defaults() {
        let config = Config::try_parse_from(["respkv"]).unwrap();

        assert_eq!(config.port, 8000);
        assert_eq!(config.keep_alive(), Some(Duration::from_secs(15)));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn command_line_flags() {
        let config = Config::try_parse_from([
            "respkv",
            "--bind",
            "0.0.0.0",
            "-p",
            "6380",
            "--keep-alive",
            "0",
            "--max-frame-size",
            "10240",
            "--shutdown-tolerance",
            "5",
        ])
        .unwrap();

        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 6380);
        assert_eq!(config.keep_alive(), None);
        assert_eq!(config.max_frame_size, 10240);
        assert_eq!(config.shutdown_tolerance(), Duration::from_secs(5));
    }
}
