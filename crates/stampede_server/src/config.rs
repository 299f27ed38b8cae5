// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Command-line and environment configuration.

use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use stampede::CacheKey;

/// Server configuration. Every flag can also be set through its environment variable.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stampede-server",
    version,
    about = "Serves one hot key through a naive and a request-coalescing cache read path"
)]
pub struct Config {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Redis address (`host:port` or `redis://` URL). An in-process cache is used when unset.
    #[arg(long, env = "REDIS_ADDR", value_name = "ADDR")]
    pub redis_addr: Option<String>,

    /// How long a cached value stays valid, in milliseconds.
    #[arg(
        long,
        env = "CACHE_TTL_MS",
        value_name = "MILLIS",
        default_value_t = 5_000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub cache_ttl_ms: u64,

    /// Simulated backend latency, in milliseconds.
    #[arg(long, env = "BACKEND_LATENCY_MS", value_name = "MILLIS", default_value_t = 200)]
    pub backend_latency_ms: u64,

    /// The hot key both read paths serve.
    #[arg(long, env = "CACHE_KEY", default_value = "product:popular", value_parser = parse_key)]
    pub cache_key: CacheKey,

    /// Log filter directives, in `tracing_subscriber::EnvFilter` syntax.
    #[arg(long, env = "RUST_LOG", value_name = "FILTER", default_value = "info")]
    pub log_filter: String,
}

impl Config {
    /// Returns the TTL applied to cached values.
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Returns the simulated backend latency.
    #[must_use]
    pub fn backend_latency(&self) -> Duration {
        Duration::from_millis(self.backend_latency_ms)
    }

    /// Returns the address to bind, on all interfaces.
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}

fn parse_key(value: &str) -> Result<CacheKey, stampede::InvalidKey> {
    CacheKey::new(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["stampede-server"]).unwrap();

        assert_eq!(config.cache_ttl(), Duration::from_secs(5));
        assert_eq!(config.backend_latency(), Duration::from_millis(200));
        assert_eq!(config.cache_key.as_str(), "product:popular");
        assert_eq!(config.listen_addr().port(), config.port);
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "stampede-server",
            "--port",
            "9090",
            "--redis-addr",
            "localhost:6379",
            "--cache-ttl-ms",
            "250",
            "--backend-latency-ms",
            "0",
            "--cache-key",
            "product:other",
        ])
        .unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.redis_addr.as_deref(), Some("localhost:6379"));
        assert_eq!(config.cache_ttl(), Duration::from_millis(250));
        assert_eq!(config.backend_latency(), Duration::ZERO);
        assert_eq!(config.cache_key.as_str(), "product:other");
    }

    #[test]
    fn zero_ttl_is_rejected() {
        Config::try_parse_from(["stampede-server", "--cache-ttl-ms", "0"]).unwrap_err();
    }

    #[test]
    fn empty_key_is_rejected() {
        let error = Config::try_parse_from(["stampede-server", "--cache-key", ""]).unwrap_err();
        assert!(error.to_string().contains("cache key must not be empty"), "{error}");
    }

    #[test]
    fn command_definition_is_consistent() {
        use clap::CommandFactory;
        Config::command().debug_assert();
    }
}
