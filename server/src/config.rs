//! Process configuration consumed by the server core

use std::path::PathBuf;
use std::time::Duration;

/// A map name plus tile coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub map: String,
    pub x: u16,
    pub y: u16,
}

impl Location {
    pub fn new(map: impl Into<String>, x: u16, y: u16) -> Self {
        Self {
            map: map.into(),
            x,
            y,
        }
    }
}

/// Everything the server needs to know at startup
///
/// `main` fills this from command line arguments; tests use [`Default`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the acceptor binds to, `host:port`
    pub address: String,
    /// Size of the session slot pool
    pub max_connections: usize,
    /// World updates per second
    pub tick_rate: u32,
    /// Where new characters appear
    pub start: Location,
    /// Where dead players reappear
    pub respawn: Location,
    /// Share of experience a dying player loses
    pub death_exp_penalty_percent: u32,
    /// Share of the victim's experience a player killer receives
    pub kill_exp_percent: u32,
    /// JSON content file; the built-in catalog is used when absent
    pub content_path: Option<PathBuf>,
    /// Directory for account, character and ban files; in-memory when absent
    pub data_dir: Option<PathBuf>,
    /// Directory served through asset download requests
    pub assets_dir: Option<PathBuf>,
    /// Accounts whose new characters start with administrator access
    pub administrators: Vec<String>,
    /// Seed for the simulation's random number generators
    pub seed: Option<u64>,
}

impl ServerConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn is_administrator(&self, account: &str) -> bool {
        self.administrators
            .iter()
            .any(|name| name.eq_ignore_ascii_case(account))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7001".to_string(),
            max_connections: 64,
            tick_rate: 20,
            start: Location::new("Town", 5, 5),
            respawn: Location::new("Town", 5, 5),
            death_exp_penalty_percent: 10,
            kill_exp_percent: 10,
            content_path: None,
            data_dir: None,
            assets_dir: None,
            administrators: Vec::new(),
            seed: None,
        }
    }
}
