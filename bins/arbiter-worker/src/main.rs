mod config;
mod error;
mod evaluator;
mod executor;
mod interface;
mod problem;
mod protocol;
mod queue;
mod reporter;
mod sandbox;
mod settings;
mod workspace;


use anyhow::Context;
use clap::Parser;
use config::LanguageRegistry;
use executor::Executor;
use interface::{RedisInterface, SubmissionSource};
use queue::{Controller, SubmissionRunner};
use sandbox::Sandbox;
use settings::WorkerConfig;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    let config = WorkerConfig::parse();
    let options = config.engine_options();
    let engine_id = format!("engine-{}", Uuid::new_v4());

    info!(
        engine_id = %engine_id,
        problems_root = %options.problems_root.display(),
        executing_limit = config.executing_limit(),
        "Arbiter worker booting..."
    );

    if options.sandbox.check {
        Sandbox::new(options.sandbox.clone())
            .preflight()
            .await
            .context("sandbox preflight failed")?;
    } else {
        warn!("Sandbox preflight disabled");
    }

    // The registry is re-read per submission; at boot it is only reported
    match LanguageRegistry::load_from_dir(&options.problems_root).await {
        Ok(registry) => info!("Supported languages: {:?}", registry.list_languages()),
        Err(e) => warn!(error = %e, "Language registry not loadable yet"),
    }

    let redis = RedisInterface::connect(&config.redis_url, engine_id.as_str()).await?;
    info!(owner = redis.owner(), "Connected to Redis: {}", config.redis_url);

    let executor = Executor::new(options, Arc::new(redis.clone()));
    let controller = Controller::new(executor, config.executing_limit());

    // Setup graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        warn!("Received shutdown signal, no longer accepting submissions");
    };

    tokio::select! {
        _ = source_loop(redis, &controller) => {},
        _ = shutdown => {},
    }

    info!(
        in_flight = controller.in_flight().await,
        queued = controller.queued().await,
        "Draining submissions"
    );
    controller.drain().await;

    info!("Worker shutdown complete");
    Ok(())
}

#[instrument(skip_all)]
async fn source_loop<S, R>(mut source: S, controller: &Controller<R>)
where
    S: SubmissionSource,
    R: SubmissionRunner,
{
    loop {
        // BLPOP with a short timeout so shutdown is noticed
        match source.next_submission().await {
            Ok(Some(request)) => {
                info!(
                    submission_id = %request.id,
                    problem = %request.problem,
                    language = %request.language,
                    source_size = request.source_code.len(),
                    "Received submission"
                );
                controller.submit(request).await;
            }
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "Submission source error");
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        }
    }
}
