use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::services::decision_engine::DecisionEngineConfig;

/// Runtime configuration of the decision engine and its background tasks
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Phase supervision
    pub phase_timeout_seconds: u64, // Wall-clock budget of one phase attempt
    pub phase_max_retries: u32,     // Re-invocations after the first attempt
    pub retry_initial_backoff_milliseconds: u64,
    pub retry_max_backoff_milliseconds: u64,

    // Near-limit scanning
    pub near_limit_scan_enabled: bool,
    pub near_limit_scan_interval_seconds: u64,
    pub near_limit_lookback_hours: i64, // Tickers analyzed within this window are skipped

    // Sizing
    pub round_to_default_increment: bool,

    // HTTP
    pub server_addr: SocketAddr,
    pub requests_per_minute: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            phase_timeout_seconds: 180,
            phase_max_retries: 3,
            retry_initial_backoff_milliseconds: 500,
            retry_max_backoff_milliseconds: 10_000,

            near_limit_scan_enabled: true,
            near_limit_scan_interval_seconds: 1800,
            near_limit_lookback_hours: 3,

            round_to_default_increment: true,

            server_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            requests_per_minute: 100,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> EngineConfig {
        let mut config = EngineConfig::default();

        override_from_env("PHASE_TIMEOUT_SECONDS", &mut config.phase_timeout_seconds, |v| {
            (5..=3600).contains(v)
        });
        override_from_env("PHASE_MAX_RETRIES", &mut config.phase_max_retries, |v| *v <= 10);
        override_from_env(
            "RETRY_INITIAL_BACKOFF_MILLISECONDS",
            &mut config.retry_initial_backoff_milliseconds,
            |v| (10..=60_000).contains(v),
        );
        override_from_env(
            "RETRY_MAX_BACKOFF_MILLISECONDS",
            &mut config.retry_max_backoff_milliseconds,
            |v| (10..=300_000).contains(v),
        );
        if config.retry_max_backoff_milliseconds < config.retry_initial_backoff_milliseconds {
            tracing::warn!(
                "RETRY_MAX_BACKOFF_MILLISECONDS ({}) below initial backoff ({}), raising it",
                config.retry_max_backoff_milliseconds,
                config.retry_initial_backoff_milliseconds
            );
            config.retry_max_backoff_milliseconds = config.retry_initial_backoff_milliseconds;
        }

        if let Ok(enabled) = std::env::var("NEAR_LIMIT_SCAN_ENABLED") {
            config.near_limit_scan_enabled = parse_flag(&enabled);
        }
        override_from_env(
            "NEAR_LIMIT_SCAN_INTERVAL_SECONDS",
            &mut config.near_limit_scan_interval_seconds,
            |v| (60..=86_400).contains(v),
        );
        override_from_env(
            "NEAR_LIMIT_LOOKBACK_HOURS",
            &mut config.near_limit_lookback_hours,
            |v| (0..=168).contains(v),
        );

        if let Ok(round) = std::env::var("ROUND_TO_DEFAULT_INCREMENT") {
            config.round_to_default_increment = parse_flag(&round);
        }

        override_from_env("SERVER_ADDR", &mut config.server_addr, |_| true);
        override_from_env("REQUESTS_PER_MINUTE", &mut config.requests_per_minute, |v| *v > 0);

        config
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_seconds)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.near_limit_scan_interval_seconds)
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(self.near_limit_lookback_hours)
    }

    pub fn decision_engine(&self) -> DecisionEngineConfig {
        DecisionEngineConfig {
            round_to_default_increment: self.round_to_default_increment,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

/// Replace `target` with the parsed value of `key` when present and accepted
fn override_from_env<T, F>(key: &str, target: &mut T, accept: F)
where
    T: FromStr + Display,
    T::Err: Display,
    F: Fn(&T) -> bool,
{
    let Ok(raw) = std::env::var(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if accept(&value) => *target = value,
        Ok(value) => {
            tracing::warn!(
                "Invalid {} value: {} (out of range), using default: {}",
                key,
                value,
                target
            );
        }
        Err(e) => {
            tracing::warn!(
                "Failed to parse {} '{}': {}, using default: {}",
                key,
                raw,
                e,
                target
            );
        }
    }
}
