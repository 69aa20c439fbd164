//! Environment-variable configuration for the engine process.
//!
//! Every knob has a default so a bare `arena-engine` runs against local
//! Kafka/Redis/Scylla. Parse failures are startup errors; the process
//! exits non-zero rather than running half-configured.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};

/// Runtime configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP listen port.
    pub http_port: u16,
    /// Minimum emitted log level (feeds the default tracing filter).
    pub log_level: String,

    /// Kafka bootstrap endpoints, comma separated.
    pub kafka_brokers: String,
    /// Consumer group id for the action subscription.
    pub kafka_consumer_group_id: String,
    /// Topic carrying game actions.
    pub kafka_topic: String,
    /// Lower bound for consumer fetch batches.
    pub kafka_fetch_min_bytes: u32,
    /// Upper bound for consumer fetch batches.
    pub kafka_fetch_max_bytes: u32,
    /// Consumer poll linger.
    pub kafka_fetch_max_wait: Duration,

    /// Number of in-memory queues and workers. Actions are routed by
    /// `leaderboard_id mod worker_count`; when `max_leaderboards` is not a
    /// multiple of this value the per-worker load is uneven.
    pub worker_count: usize,
    /// Per-queue capacity; a full queue blocks the dispatcher and, through
    /// it, log consumption.
    pub queue_buffer_size: usize,

    /// Scylla bootstrap host.
    pub scylla_url: String,
    /// Per-host connection pool size.
    pub scylla_num_conns: usize,
    /// Replication class for the `leaderboard` keyspace DDL.
    pub scylla_replication_class: String,
    /// Replication factor for the `leaderboard` keyspace DDL.
    pub scylla_replication_factor: u32,

    /// Redis connection target.
    pub redis_url: String,

    /// Sign-up assigns a leaderboard uniformly from `[1, max_leaderboards]`.
    pub max_leaderboards: i32,

    /// Optional path overriding the embedded game rules.
    pub game_config_path: Option<String>,
    /// Interval for the periodic metrics log line; `0` disables it.
    pub stats_interval: Option<Duration>,
    /// Grace window between closing inputs and closing outputs.
    pub shutdown_grace: Duration,
}

impl AppConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            http_port: env_parse("HTTP_PORT", 3000)?,
            log_level: env_string("LOG_LEVEL", "info"),
            kafka_brokers: env_string("KAFKA_BROKERS", "localhost:9092"),
            kafka_consumer_group_id: env_string("KAFKA_CONSUMER_GROUP_ID", "consumer-group-id"),
            kafka_topic: env_string("KAFKA_TOPIC", "game-actions"),
            kafka_fetch_min_bytes: env_parse("KAFKA_FETCH_MIN_BYTES", 1024)?,
            kafka_fetch_max_bytes: env_parse("KAFKA_FETCH_MAX_BYTES", 10_485_760)?,
            kafka_fetch_max_wait: Duration::from_millis(env_parse("KAFKA_FETCH_MAX_WAIT_MS", 100)?),
            worker_count: env_parse("WORKER_COUNT", 5)?,
            queue_buffer_size: env_parse("QUEUE_BUFFER_SIZE", 1000)?,
            scylla_url: env_string("SCYLLA_URL", "127.0.0.1:9042"),
            scylla_num_conns: env_parse("SCYLLA_NUM_CONNS", 10)?,
            scylla_replication_class: env_string("SCYLLA_REPLICATION_CLASS", "SimpleStrategy"),
            scylla_replication_factor: env_parse("SCYLLA_REPLICATION_FACTOR", 1)?,
            redis_url: env_string("REDIS_URL", "127.0.0.1:6379"),
            max_leaderboards: env_parse("MAX_LEADERBOARDS", 5)?,
            game_config_path: std::env::var("GAME_CONFIG_PATH").ok().filter(|p| !p.is_empty()),
            stats_interval: match env_parse::<u64>("STATS_INTERVAL_MS", 0)? {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            shutdown_grace: Duration::from_millis(env_parse("SHUTDOWN_GRACE_MS", 10_000)?),
        };

        if config.worker_count == 0 {
            bail!("WORKER_COUNT must be at least 1");
        }
        if config.queue_buffer_size == 0 {
            bail!("QUEUE_BUFFER_SIZE must be at least 1");
        }
        if config.max_leaderboards < 1 {
            bail!("MAX_LEADERBOARDS must be at least 1");
        }

        Ok(config)
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("invalid value for {name}: {err}")),
        _ => Ok(default),
    }
    .with_context(|| format!("load {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_env() {
        // Avoid touching process env: defaults come back for unset names.
        let port: u16 = env_parse("ARENA_TEST_UNSET_PORT", 3000).unwrap();
        assert_eq!(port, 3000);
        assert_eq!(env_string("ARENA_TEST_UNSET_STR", "info"), "info");
    }
}
