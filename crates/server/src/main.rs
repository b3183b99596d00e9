//! subcast server entry point.

use std::sync::Arc;
use std::time::Duration;

use fred::clients::Client as RedisClient;
use fred::interfaces::ClientLike;
use fred::types::config::Config as RedisClientConfig;
use subcast_common::{Config, Metrics, RedisConfig, get_metrics};
use subcast_queue::{
    BroadcastIntake, BroadcastPlanner, FeatureFlags, HttpMessageSender, JobQueue,
    ProcessorRegistry, RedisFlags, RedisJobMirror, SEND_BATCH_JOB, SendBatchProcessor,
    StaticFlags,
};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the metrics summary is logged.
const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

/// Connect the shared Redis client.
async fn connect_redis(config: &RedisConfig) -> Result<Arc<RedisClient>, fred::error::Error> {
    let client = RedisClient::new(RedisClientConfig::from_url(&config.url)?, None, None, None);
    client.connect();
    client.wait_for_connect().await?;
    Ok(Arc::new(client))
}

/// Log queue and pipeline counters until aborted.
async fn log_metrics(queue: JobQueue, metrics: Arc<Metrics>) {
    let mut interval = tokio::time::interval(METRICS_LOG_INTERVAL);
    interval.tick().await;

    loop {
        interval.tick().await;
        let stats = queue.stats();
        let snapshot = metrics.snapshot();
        info!(
            pending = stats.pending,
            completed = stats.completed,
            failed = stats.failed,
            recipients_delivered = snapshot.recipients_delivered,
            recipients_failed = snapshot.recipients_failed,
            send_retries = snapshot.send_retries,
            "Queue status"
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e.into());
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "subcast=info".into()),
        )
        .init();

    info!("Starting subcast...");

    // Load configuration
    let config = Config::load()?;
    let metrics = Arc::clone(get_metrics());
    let static_flags = StaticFlags::new(config.flags.clone());

    // Redis is optional: without it jobs are not mirrored and flags are static
    let redis = match &config.redis {
        Some(redis_config) => {
            info!("Connecting to Redis...");
            let client = connect_redis(redis_config).await?;
            info!("Connected to Redis");
            Some((client, redis_config))
        }
        None => {
            warn!("Redis not configured; job mirror and broadcast intake disabled");
            None
        }
    };

    let mut builder = JobQueue::builder(&config.queue).metrics(Arc::clone(&metrics));
    let flags: Arc<dyn FeatureFlags> = match &redis {
        Some((client, redis_config)) => {
            let mut mirror = RedisJobMirror::new(Arc::clone(client), redis_config.prefix.clone());
            if let Some(ttl) = redis_config.job_ttl_secs {
                mirror = mirror.with_ttl(Duration::from_secs(ttl));
            }
            builder = builder.persistence(Arc::new(mirror));

            Arc::new(
                RedisFlags::new(Arc::clone(client), redis_config.prefix.clone())
                    .with_fallback(static_flags),
            )
        }
        None => Arc::new(static_flags),
    };
    let queue = builder.build();

    // Register processors and start the worker
    let sender = HttpMessageSender::from_config(&config.messaging)?.with_metrics(Arc::clone(&metrics));
    info!(endpoint = %sender.transport().endpoint(), "Messaging API configured");

    let registry = ProcessorRegistry::new().register(
        SEND_BATCH_JOB,
        Arc::new(
            SendBatchProcessor::new(Arc::new(sender), config.broadcast.rate_per_second)
                .with_metrics(Arc::clone(&metrics)),
        ),
    );
    queue.start(registry);

    let planner = BroadcastPlanner::new(queue.clone(), flags).with_metrics(Arc::clone(&metrics));

    // Subscribe to broadcast requests
    let intake = match &redis {
        Some((_, redis_config)) if redis_config.intake => {
            let intake = BroadcastIntake::connect(
                &redis_config.url,
                &redis_config.prefix,
                planner,
                config.broadcast.clone(),
            )
            .await?;
            intake.start().await?;
            Some(intake)
        }
        _ => None,
    };

    let reporter = tokio::spawn(log_metrics(queue.clone(), Arc::clone(&metrics)));
    info!("subcast started");

    shutdown_signal().await;

    if let Some(intake) = &intake {
        intake.shutdown().await;
    }
    reporter.abort();
    queue.stop().await;

    if let Some((client, _)) = &redis {
        if let Err(e) = client.quit().await {
            warn!(error = %e, "Failed to close Redis connection");
        }
    }

    info!(
        metrics = %serde_json::to_string(&metrics.snapshot()).unwrap_or_default(),
        "subcast shutdown complete"
    );
    Ok(())
}
