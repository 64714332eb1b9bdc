use crate::domain::services::snapshot_builder::{
    DEFAULT_INITIAL_INVESTMENT_CENTS, DEFAULT_RECENT_NEWS_LIMIT,
};
use std::fmt::Display;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration for the simulator
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    pub tick_interval_seconds: u64,
    pub default_max_change_cents: i64, // Used when seeding instruments
    pub initial_investment_cents: i64, // Reference for the return percentage
    pub recent_news_limit: usize,
    pub hub_channel_capacity: usize,
    pub hub_push_timeout_ms: u64,
    pub price_rng_seed: Option<u64>, // None = OS entropy
    pub bind_address: SocketAddr,
    pub seed_demo_data: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            tick_interval_seconds: 15,
            default_max_change_cents: 2,
            initial_investment_cents: DEFAULT_INITIAL_INVESTMENT_CENTS,
            recent_news_limit: DEFAULT_RECENT_NEWS_LIMIT,
            hub_channel_capacity: 64,
            hub_push_timeout_ms: 5_000,
            price_rng_seed: None,
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            seed_demo_data: false,
        }
    }
}

/// Parses `name` and keeps `current` when the value is missing, malformed or
/// outside `range`.
fn parse_in_range<T>(raw: Option<String>, name: &str, range: RangeInclusive<T>, current: T) -> T
where
    T: FromStr + PartialOrd + Display + Copy,
    T::Err: Display,
{
    let Some(raw) = raw else {
        return current;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if range.contains(&value) => value,
        Ok(value) => {
            tracing::warn!(
                "Invalid {} value: {} (must be between {} and {}), using default: {}",
                name,
                value,
                range.start(),
                range.end(),
                current
            );
            current
        }
        Err(e) => {
            tracing::warn!(
                "Failed to parse {} '{}': {}, using default: {}",
                name,
                raw,
                e,
                current
            );
            current
        }
    }
}

fn parse_flag(raw: Option<String>, current: bool) -> bool {
    match raw {
        Some(value) => value.to_lowercase() == "true" || value == "1",
        None => current,
    }
}

impl SimulatorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> SimulatorConfig {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> SimulatorConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = SimulatorConfig::default();

        config.tick_interval_seconds = parse_in_range(
            lookup("TICK_INTERVAL_SECONDS"),
            "TICK_INTERVAL_SECONDS",
            1..=3600,
            config.tick_interval_seconds,
        );

        config.default_max_change_cents = parse_in_range(
            lookup("DEFAULT_MAX_CHANGE_CENTS"),
            "DEFAULT_MAX_CHANGE_CENTS",
            0..=100_000,
            config.default_max_change_cents,
        );

        config.initial_investment_cents = parse_in_range(
            lookup("INITIAL_INVESTMENT_CENTS"),
            "INITIAL_INVESTMENT_CENTS",
            1..=i64::MAX,
            config.initial_investment_cents,
        );

        config.recent_news_limit = parse_in_range(
            lookup("RECENT_NEWS_LIMIT"),
            "RECENT_NEWS_LIMIT",
            1..=100,
            config.recent_news_limit,
        );

        config.hub_channel_capacity = parse_in_range(
            lookup("HUB_CHANNEL_CAPACITY"),
            "HUB_CHANNEL_CAPACITY",
            1..=10_000,
            config.hub_channel_capacity,
        );

        config.hub_push_timeout_ms = parse_in_range(
            lookup("HUB_PUSH_TIMEOUT_MS"),
            "HUB_PUSH_TIMEOUT_MS",
            100..=60_000,
            config.hub_push_timeout_ms,
        );

        if let Some(seed) = lookup("PRICE_RNG_SEED") {
            match seed.trim().parse::<u64>() {
                Ok(value) => config.price_rng_seed = Some(value),
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse PRICE_RNG_SEED '{}': {}, seeding from OS entropy",
                        seed,
                        e
                    );
                }
            }
        }

        if let Some(addr) = lookup("BIND_ADDRESS") {
            match addr.trim().parse::<SocketAddr>() {
                Ok(value) => config.bind_address = value,
                Err(e) => {
                    tracing::warn!(
                        "Invalid BIND_ADDRESS '{}': {}, using default: {}",
                        addr,
                        e,
                        config.bind_address
                    );
                }
            }
        }

        config.seed_demo_data = parse_flag(lookup("SEED_DEMO_DATA"), config.seed_demo_data);

        config
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }

    pub fn hub_push_timeout(&self) -> Duration {
        Duration::from_millis(self.hub_push_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> SimulatorConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SimulatorConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = SimulatorConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_secs(15));
        assert_eq!(config.default_max_change_cents, 2);
        assert_eq!(config.initial_investment_cents, 10_000_000);
        assert_eq!(config.recent_news_limit, 10);
        assert_eq!(config.hub_push_timeout(), Duration::from_secs(5));
        assert_eq!(config.price_rng_seed, None);
        assert!(!config.seed_demo_data);
    }

    #[test]
    fn test_valid_overrides() {
        let config = config_from(&[
            ("TICK_INTERVAL_SECONDS", "5"),
            ("DEFAULT_MAX_CHANGE_CENTS", "10"),
            ("RECENT_NEWS_LIMIT", "25"),
            ("PRICE_RNG_SEED", "42"),
            ("BIND_ADDRESS", "0.0.0.0:9000"),
            ("SEED_DEMO_DATA", "true"),
        ]);
        assert_eq!(config.tick_interval_seconds, 5);
        assert_eq!(config.default_max_change_cents, 10);
        assert_eq!(config.recent_news_limit, 25);
        assert_eq!(config.price_rng_seed, Some(42));
        assert_eq!(config.bind_address.port(), 9000);
        assert!(config.seed_demo_data);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_from(&[
            ("TICK_INTERVAL_SECONDS", "0"),
            ("HUB_PUSH_TIMEOUT_MS", "abc"),
            ("HUB_CHANNEL_CAPACITY", "1000000"),
            ("INITIAL_INVESTMENT_CENTS", "-5"),
            ("PRICE_RNG_SEED", "not-a-seed"),
            ("BIND_ADDRESS", "nowhere"),
        ]);
        assert_eq!(config, SimulatorConfig::default());
    }
}
