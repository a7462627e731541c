use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_PING_SECS: u64 = 30;

#[derive(Parser, Debug, Clone)]
#[command(name = "zoomish-relay")]
#[command(about = "Rendezvous relay for peer-to-peer call signaling")]
pub struct RelayConfig {
    /// Listen address for the websocket endpoint
    #[arg(long, env = "ZOOMISH_BIND", default_value = "127.0.0.1:5000")]
    pub bind: SocketAddr,

    /// Require an HS256 token signed with this secret on connect
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Keep-alive ping interval in seconds
    #[arg(long, env = "ZOOMISH_PING_SECS", default_value_t = DEFAULT_PING_SECS)]
    pub ping_secs: u64,
}

impl RelayConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_secs.max(1))
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "zoomish-call")]
#[command(about = "Headless call client with synthetic media")]
pub struct CallConfig {
    /// Relay websocket url
    #[arg(long, env = "ZOOMISH_RELAY", default_value = "ws://127.0.0.1:5000/socket")]
    pub relay: String,

    /// Name shown to the callee
    #[arg(long, default_value = "")]
    pub name: String,

    /// Admission token for relays that require one
    #[arg(long, env = "ZOOMISH_TOKEN")]
    pub token: Option<String>,

    /// Client id to call once connected
    #[arg(long, conflicts_with = "auto_answer")]
    pub call: Option<String>,

    /// Answer the first incoming call
    #[arg(long, default_value_t = false)]
    pub auto_answer: bool,
}

/// Installs the fmt subscriber, filtered by `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "zoomish=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_defaults() {
        let config = RelayConfig::parse_from(["zoomish-relay", "--ping-secs", "0"]);
        assert_eq!(config.ping_interval(), Duration::from_secs(1));
        assert!(config.bind.ip().is_loopback());
    }

    #[test]
    fn call_and_auto_answer_are_exclusive() {
        let parsed = CallConfig::try_parse_from(["zoomish-call", "--call", "bob", "--auto-answer"]);
        assert!(parsed.is_err());
    }
}
