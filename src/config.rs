use clap::Args;
use std::net::SocketAddr;
use std::time::Duration;

use crate::feed::FeedConfig;

#[derive(Debug, Clone, Args)]
pub struct Config {
    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:data/isle.db")]
    pub database_url: String,

    /// Address the HTTP server binds to
    #[arg(long, env = "ISLE_BIND", default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    /// Mark session cookies `Secure` (enable behind TLS)
    #[arg(long, env = "ISLE_SECURE_COOKIES")]
    pub secure_cookies: bool,

    /// Buffered changes per realtime topic before slow subscribers lag
    #[arg(long, env = "ISLE_FEED_CAPACITY", default_value_t = 256)]
    pub feed_capacity: usize,

    /// First delay before a closed feed subscription reconnects
    #[arg(long, env = "ISLE_RECONNECT_BASE_MS", default_value_t = 100)]
    pub reconnect_base_ms: u64,

    /// Upper bound for the reconnect delay
    #[arg(long, env = "ISLE_RECONNECT_MAX_MS", default_value_t = 5000)]
    pub reconnect_max_ms: u64,
}

impl Config {
    pub fn feed(&self) -> FeedConfig {
        FeedConfig {
            capacity: self.feed_capacity.max(1),
            reconnect_base: Duration::from_millis(self.reconnect_base_ms),
            reconnect_max: Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_base_ms)),
        }
    }
}
