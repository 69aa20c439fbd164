//! Leaderboard engine runtime wiring.
//!
//! A single engine process hosts:
//! - an HTTP server for sign-up, action ingress, and leaderboard reads,
//! - a Kafka consumer feeding N in-order worker queues sharded by
//!   leaderboard,
//! - redis-backed score and XP stores and a Scylla-backed profile store.
//!
//! This module is the composition root: it builds the stores, services,
//! pipeline, and HTTP router explicitly, and hands the lifecycle
//! controller the hooks for two-phase shutdown.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

pub mod actions;
pub mod config;
pub mod entities;
pub mod error;
pub mod http;
pub mod metrics;
pub mod pipeline;
pub mod producer;
pub mod profile_store;
pub mod query;
pub mod resp;
pub mod rules;
pub mod score_store;
pub mod shutdown;
pub mod xp_store;

use actions::ActionService;
use config::AppConfig;
use http::{build_router, AppState};
use metrics::EngineMetrics;
use pipeline::{build_consumer, run_consumer, start_workers};
use producer::{ActionLog, KafkaActionLog};
use profile_store::{ProfileStore, ScyllaProfileStore};
use query::LeaderboardService;
use resp::RespClient;
use rules::GameRules;
use score_store::{RedisScoreBoard, ScoreBoard};
use shutdown::Lifecycle;
use xp_store::{RedisXpCounter, XpCounter};

/// Start every subsystem and run until Ctrl-C.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    run_with_shutdown(config, tokio::signal::ctrl_c()).await
}

/// Start every subsystem and run until `shutdown` resolves, then execute
/// the two-phase drain.
pub async fn run_with_shutdown<F>(config: AppConfig, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = Result<(), std::io::Error>> + Send,
{
    let rules = Arc::new(
        GameRules::load(config.game_config_path.as_deref().map(Path::new))
            .context("load game rules")?,
    );
    let metrics = EngineMetrics::new();

    // Output stores first; an unreachable store is a startup failure.
    let redis = Arc::new(
        RespClient::connect(&config.redis_url)
            .await
            .context("connect score store")?,
    );
    let scores: Arc<dyn ScoreBoard> = Arc::new(RedisScoreBoard::new(redis.clone()));
    let xp: Arc<dyn XpCounter> = Arc::new(RedisXpCounter::new(redis.clone()));
    let profiles: Arc<dyn ProfileStore> = Arc::new(
        ScyllaProfileStore::connect(&config)
            .await
            .context("connect profile store")?,
    );
    let log: Arc<dyn ActionLog> =
        Arc::new(KafkaActionLog::new(&config).context("create action producer")?);

    let service = Arc::new(ActionService::new(
        rules.clone(),
        log.clone(),
        scores.clone(),
        xp.clone(),
        profiles.clone(),
        metrics.clone(),
    ));
    let leaderboards = Arc::new(LeaderboardService::new(
        scores.clone(),
        profiles.clone(),
        xp.clone(),
    ));

    // Pipeline: N workers behind bounded queues, fed by the log consumer.
    let (dispatcher, pool) = start_workers(
        config.worker_count,
        config.queue_buffer_size,
        service.clone(),
        metrics.clone(),
    );
    let consumer = build_consumer(&config).context("build log consumer")?;
    let pipeline_token = CancellationToken::new();
    let consumer_task = tokio::spawn(run_consumer(
        consumer,
        dispatcher,
        pipeline_token.clone(),
    ));

    if let Some(interval) = config.stats_interval {
        let _ = metrics::spawn_stats_logger(metrics.clone(), interval, pipeline_token.clone());
    }

    // HTTP server with graceful accept-loop shutdown.
    let state = AppState {
        actions: service,
        leaderboards,
        profiles: profiles.clone(),
        scores: scores.clone(),
        max_leaderboards: config.max_leaderboards,
    };
    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind http listener on {addr}"))?;
    let http_token = CancellationToken::new();
    let server_task = tokio::spawn({
        let http_token = http_token.clone();
        async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { http_token.cancelled().await })
                .await;
            if let Err(err) = result {
                tracing::error!(error = %err, "http server failed");
            }
        }
    });

    let mut lifecycle = Lifecycle::new(config.shutdown_grace);
    lifecycle.on_input_close("http listener", async move {
        http_token.cancel();
        if let Err(err) = server_task.await {
            tracing::error!(error = %err, "http server task join failed");
        }
    });
    lifecycle.on_input_close("action pipeline", async move {
        pipeline_token.cancel();
        if let Err(err) = consumer_task.await {
            tracing::error!(error = %err, "consumer task join failed");
        }
        // The consumer owned the dispatcher, so the queues are closed now;
        // wait for the workers to drain them.
        pool.join().await;
    });
    lifecycle.on_output_close("action producer", {
        let log = log.clone();
        async move { log.close() }
    });
    lifecycle.on_output_close("score store connection", {
        let redis = redis.clone();
        async move { redis.close().await }
    });
    lifecycle.on_output_close("profile store session", {
        let profiles = profiles.clone();
        async move {
            // The CQL session closes on drop; release our handle here so
            // outputs are torn down in phase order.
            drop(profiles);
        }
    });

    tracing::info!(
        port = config.http_port,
        workers = config.worker_count,
        topic = %config.kafka_topic,
        "engine started"
    );

    shutdown.await?;
    tracing::info!("received shutdown signal");
    lifecycle.shutdown().await;
    Ok(())
}
