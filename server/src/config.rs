//! Runtime configuration for the arena server.
//!
//! `main.rs` builds these from command line arguments; the defaults carry
//! the reference tuning.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct MatchmakingConfig {
    /// Period between scheduler passes
    pub scan_interval: Duration,
    /// Entries waiting longer than this are evicted with a timeout status
    pub wait_timeout: Duration,
    /// Ranked tolerance growth, in rating points per whole second waited
    pub tolerance_per_second: u32,
    /// Upper bound of the ranked tolerance
    pub max_tolerance: u32,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_millis(2000),
            wait_timeout: Duration::from_millis(60_000),
            tolerance_per_second: 10,
            max_tolerance: 200,
        }
    }
}

impl MatchmakingConfig {
    /// Rating tolerance for an entry that has waited `waited`.
    pub fn tolerance(&self, waited: Duration) -> u32 {
        let seconds = u32::try_from(waited.as_secs()).unwrap_or(u32::MAX);
        seconds
            .saturating_mul(self.tolerance_per_second)
            .min(self.max_tolerance)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_connections: usize,
    pub matchmaking: MatchmakingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            max_connections: 64,
            matchmaking: MatchmakingConfig::default(),
        }
    }
}
