//! Binary entrypoint for the leaderboard engine.
//!
//! Startup logic stays thin: load configuration, install logging, and
//! delegate to `arena_engine::run`.

use anyhow::Result;
use arena_engine::config::AppConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;

    // RUST_LOG wins when set; otherwise LOG_LEVEL drives our crates and
    // the noisy client libraries stay at warn.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "arena_engine={level},librdkafka=warn,rdkafka=warn,scylla=warn,warn",
                level = config.log_level
            ))
        }))
        .init();

    arena_engine::run(config).await
}
