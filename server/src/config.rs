//! Runtime settings of a backend server.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address the UDP socket binds to
    pub bind_addr: String,
    /// Relay to register with. Without one, cross-server portals are inert
    pub relay_addr: Option<String>,
    /// Name this backend registers under and that external positions refer to
    pub server_name: String,
    pub tick_duration: Duration,
    pub portals_file: PathBuf,
    /// Worlds hosted by this backend; the first is where new players spawn
    pub worlds: Vec<String>,
    /// Players within this distance of a portal activate it
    pub activation_distance: f64,
    /// Players within this distance who see through portals view-activate it
    pub view_distance: f64,
    pub max_players: usize,
    /// Log destination selection queries for players this backend never saw
    pub warn_on_missing_selection: bool,
    pub player_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Ticks a player is ignored by portals after going through one
    pub portal_cooldown_ticks: u32,
}

impl ServerConfig {
    /// Tick length for a rate in ticks per second. Zero is treated as one.
    pub fn tick_duration_for(tick_rate: u32) -> Duration {
        Duration::from_secs_f64(1.0 / tick_rate.max(1) as f64)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:25600".to_string(),
            relay_addr: None,
            server_name: "default".to_string(),
            tick_duration: Self::tick_duration_for(20),
            portals_file: PathBuf::from("portals.json"),
            worlds: vec!["world".to_string(), "world_nether".to_string()],
            activation_distance: 16.0,
            view_distance: 8.0,
            max_players: 64,
            warn_on_missing_selection: true,
            player_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(2),
            portal_cooldown_ticks: 20,
        }
    }
}
