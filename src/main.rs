mod api;
mod cache;
mod config;
mod message;
mod repository;
mod scheduler;
mod service;
mod sms;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;

use crate::cache::{Cache, RedisCache};
use crate::message::Message;
use crate::repository::{PgRepository, Repository};
use crate::scheduler::Scheduler;
use crate::service::MessageService;
use crate::sms::{SmsClient, WebhookClient};

#[derive(Parser)]
#[command(name = "kurye", version, about = "Queued SMS dispatch service")]
struct Cli {
    #[arg(short, long, default_value = "~/.kurye/config.toml")]
    config: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server and background scheduler
    Run,
    /// Create ~/.kurye/ with a default config
    Init,
    /// Insert sample pending messages for local testing
    Seed {
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
    /// Query a running instance
    Status {
        /// API server URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&cli.config).await?,
        Commands::Init => {
            config::init_config_dir().await?;
            tracing::info!("Initialized ~/.kurye/");
        }
        Commands::Seed { count } => seed(&cli.config, count).await?,
        Commands::Status { url } => status(&url).await?,
    }
    Ok(())
}

async fn run(config_path: &str) -> Result<()> {
    let cfg = config::load(config_path)?;

    let cache = RedisCache::connect(&cfg.redis.url).await?;
    cache.ping().await.context("Redis is not reachable")?;

    let repo = PgRepository::connect(&cfg.db.url).await?;
    repo.migrate().await?;

    let sms_client = WebhookClient::new(&cfg.provider.url, &cfg.provider.auth_key)?;
    sms_client
        .health()
        .await
        .context("SMS provider health check failed")?;

    let service = Arc::new(MessageService::new(
        Arc::new(repo),
        Arc::new(sms_client),
        Arc::new(cache),
        cfg.worker.batch_size,
        cfg.worker.max_workers,
        cfg.worker.per_message_timeout(),
    ));

    let scheduler = Scheduler::spawn(
        service.clone(),
        cfg.scheduler.interval(),
        cfg.scheduler.batch_timeout(),
    );
    scheduler.start().await?;

    let state = api::AppState {
        service,
        scheduler: scheduler.clone(),
        name: cfg.app.name.clone(),
    };
    let listener = tokio::net::TcpListener::bind(&cfg.api.bind).await?;
    tracing::info!("{} listening on {}", cfg.app.name, cfg.api.bind);

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
        })
        .await?;

    // waits for an in-flight batch to finish before returning
    tracing::info!("Shutdown signal received, stopping scheduler");
    if let Err(e) = scheduler.stop().await {
        tracing::warn!(error = %e, "scheduler did not stop cleanly");
    }
    Ok(())
}

async fn seed(config_path: &str, count: usize) -> Result<()> {
    let cfg = config::load(config_path)?;
    let repo = PgRepository::connect(&cfg.db.url).await?;
    repo.migrate().await?;

    for i in 0..count {
        let msg = Message::new(
            &format!("+90555{i:07}"),
            &format!("kurye test message #{i}"),
        )?;
        repo.save(&msg).await?;
    }
    tracing::info!("Seeded {count} pending messages");
    Ok(())
}

async fn status(url: &str) -> Result<()> {
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("{url}/health"))
        .send()
        .await?
        .json()
        .await
        .context("Failed to query /health")?;
    let sched: serde_json::Value = client
        .get(format!("{url}/scheduler"))
        .send()
        .await?
        .json()
        .await
        .context("Failed to query /scheduler")?;

    println!(
        "{} v{}: scheduler running = {}",
        health["name"].as_str().unwrap_or("?"),
        health["version"].as_str().unwrap_or("?"),
        sched["running"].as_bool().unwrap_or(false)
    );
    Ok(())
}
