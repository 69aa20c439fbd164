//! Workload generator for exercising the leaderboard engine over HTTP.
//!
//! Signs up a fleet of users with generated nicknames, then posts actions
//! chosen from the score map at a fixed rate until the duration elapses.
//! Useful for watching promotions and leaderboard movement under load.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::{info, warn};

/// CLI entry point wrapper.
#[derive(Parser, Debug)]
#[command(name = "arena-workload")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

/// Top-level CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    Run(RunArgs),
}

/// CLI options for running the workload.
#[derive(Parser, Debug, Clone)]
struct RunArgs {
    /// Engine base URL.
    #[arg(long, env = "ARENA_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    /// Number of users to sign up and rotate through.
    #[arg(long, default_value_t = 50)]
    users: usize,

    /// Delay between consecutive action posts.
    #[arg(long, default_value = "100ms")]
    rate: humantime::Duration,

    /// Total runtime for the workload.
    #[arg(long, default_value = "30s")]
    duration: humantime::Duration,

    /// Optional game rules file; defaults to the engine's action keys.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Random seed (0 picks a random seed).
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

/// Shape of the engine's game_config.json; only the action keys matter
/// here.
#[derive(Debug, Deserialize)]
struct GameConfigFile {
    actions_score_map: HashMap<String, i64>,
}

#[derive(Debug, serde::Serialize)]
struct SignUpRequest<'a> {
    nickname: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignUpResponse {
    id: String,
}

#[derive(Debug, serde::Serialize)]
struct ActionRequest<'a> {
    user_id: &'a str,
    action: &'a str,
    timestamp: f64,
}

const ADJECTIVES: &[&str] = &[
    "Happy", "Clever", "Bright", "Swift", "Brave", "Calm", "Jolly", "Lively", "Noble", "Quick",
    "Sunny", "Witty", "Bold", "Eager", "Merry",
];

const NOUNS: &[&str] = &[
    "Falcon", "Otter", "Tiger", "Badger", "Raven", "Dolphin", "Panda", "Lynx", "Heron", "Wolf",
    "Fox", "Moose", "Puffin", "Gecko", "Orca",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arena_workload=info".into()),
        )
        .init();

    let args = Args::parse();
    match args.cmd {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let actions = load_actions(args.config.as_deref())?;
    anyhow::ensure!(!actions.is_empty(), "no actions configured");
    anyhow::ensure!(args.users > 0, "--users must be at least 1");

    let seed = if args.seed == 0 {
        rand::thread_rng().gen()
    } else {
        args.seed
    };
    let mut rng = SmallRng::seed_from_u64(seed);
    info!(seed, users = args.users, actions = actions.len(), "starting workload");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(100)
        .build()
        .context("build http client")?;

    let users = sign_up_users(&client, &args.base_url, args.users, &mut rng).await?;
    info!(signed_up = users.len(), "sign-up complete");

    let sent = Arc::new(AtomicU64::new(0));
    let failed = Arc::new(AtomicU64::new(0));

    let summary = tokio::spawn({
        let sent = sent.clone();
        let failed = failed.clone();
        async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                info!(
                    sent = sent.load(Ordering::Relaxed),
                    failed = failed.load(Ordering::Relaxed),
                    "workload progress"
                );
            }
        }
    });

    let deadline = Instant::now() + *args.duration;
    let mut ticker = tokio::time::interval(*args.rate);
    while Instant::now() < deadline {
        ticker.tick().await;
        let user = users.choose(&mut rng).expect("users is non-empty");
        let action = actions.choose(&mut rng).expect("actions is non-empty");
        match post_action(&client, &args.base_url, user, action).await {
            Ok(()) => {
                sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, user_id = %user, action = %action, "action post failed");
            }
        }
    }

    summary.abort();
    info!(
        sent = sent.load(Ordering::Relaxed),
        failed = failed.load(Ordering::Relaxed),
        "workload finished"
    );
    Ok(())
}

fn load_actions(path: Option<&std::path::Path>) -> anyhow::Result<Vec<String>> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read game config from {}", path.display()))?;
            let config: GameConfigFile =
                serde_json::from_str(&raw).context("parse game config json")?;
            let mut actions: Vec<String> = config.actions_score_map.into_keys().collect();
            actions.sort();
            Ok(actions)
        }
        // Keep in sync with the engine's embedded game_config.json.
        None => Ok(vec![
            "assist".to_string(),
            "goal".to_string(),
            "hat-trick".to_string(),
            "save".to_string(),
        ]),
    }
}

async fn sign_up_users(
    client: &reqwest::Client,
    base_url: &str,
    count: usize,
    rng: &mut SmallRng,
) -> anyhow::Result<Vec<String>> {
    let mut users = Vec::with_capacity(count);
    for _ in 0..count {
        let nickname = format!(
            "{}{}{}",
            ADJECTIVES.choose(rng).expect("adjectives"),
            NOUNS.choose(rng).expect("nouns"),
            rng.gen_range(1..1000)
        );
        let response = client
            .post(format!("{base_url}/api/v1/users/sign-up"))
            .json(&SignUpRequest { nickname: &nickname })
            .send()
            .await
            .context("sign-up request failed")?;
        anyhow::ensure!(
            response.status().is_success(),
            "sign-up returned {}",
            response.status()
        );
        let profile: SignUpResponse = response.json().await.context("decode sign-up response")?;
        users.push(profile.id);
    }
    Ok(users)
}

async fn post_action(
    client: &reqwest::Client,
    base_url: &str,
    user_id: &str,
    action: &str,
) -> anyhow::Result<()> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    let response = client
        .post(format!("{base_url}/api/v1/users/actions"))
        .json(&ActionRequest {
            user_id,
            action,
            timestamp,
        })
        .send()
        .await
        .context("action request failed")?;
    anyhow::ensure!(
        response.status().is_success(),
        "action post returned {}",
        response.status()
    );
    Ok(())
}
