//! `jobqueued`: runs the job queue against the configured SurrealDB endpoint
//! until Ctrl-C.

mod handlers;
mod settings;

use std::sync::Arc;

use actors::{JobHandlerRegistry, JobOptions, Priority, QueueManager};
use db::repositories::JobRepository;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use crate::settings::Settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::load()?;
    tracing::info!("Initializing job queue system...");

    let store = Arc::new(JobRepository::connect(&settings.database).await?);
    let registry = Arc::new(JobHandlerRegistry::new());
    handlers::register_demo_handlers(&registry);

    let manager = QueueManager::new(store, registry, settings.queue)?;

    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::debug!("{}", event.description());
        }
    });

    manager.start().await?;
    if settings.seed_demo_jobs {
        seed_demo_jobs(&manager).await?;
    }
    tracing::info!("Job queue system running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    let report = manager.stop().await?;
    if !report.is_clean() {
        tracing::warn!(
            stranded = ?report.stranded,
            "Jobs were still running at shutdown; durable ones are requeued on next start"
        );
    }

    let stats = manager.get_stats().await?;
    tracing::info!(
        pending = stats.pending,
        completed = stats.completed,
        failed = stats.failed,
        "Job queue system stopped"
    );
    Ok(())
}

async fn seed_demo_jobs(manager: &QueueManager<JobRepository>) -> Result<(), actors::QueueError> {
    manager
        .add("echo", json!({ "message": "hello" }), JobOptions::new())
        .await?;
    manager
        .add(
            "sleep",
            json!({ "seconds": 2 }),
            JobOptions::new().priority(Priority::HIGH),
        )
        .await?;
    manager
        .add("fail", json!({ "fail": true }), JobOptions::new().max_attempts(2))
        .await?;
    manager
        .add("echo", json!({ "message": "fast" }), JobOptions::new().fast())
        .await?;
    tracing::info!("Seeded demo jobs");
    Ok(())
}
