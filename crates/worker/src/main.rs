use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trackq_db::PgJobStore;
use trackq_docker::DockerRuntime;
use trackq_events::{EmailConfig, EmailDelivery, EventBus, NotificationRouter};
use trackq_runner::Runner;
use trackq_worker::{LogFormat, Monitor, Scheduler, WorkerConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = WorkerConfig::from_env()?;

    // --- Tracing ---
    let json = config.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "trackq_worker=debug,trackq_runner=debug,trackq_docker=info,trackq_events=info"
                    .into()
            }),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    tracing::info!(
        image = %config.runner.image,
        name_prefix = %config.runner.name_prefix,
        interval_secs = config.monitor_interval.as_secs(),
        poll_attempts = config.monitor.poll.attempts,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = trackq_db::create_pool(&config.database_url).await?;
    tracing::info!("Database connection pool created");

    trackq_db::health_check(&pool).await?;
    tracing::info!("Database health check passed");

    trackq_db::run_migrations(&pool).await?;
    tracing::info!("Database migrations applied");

    // --- Container runtime ---
    let runtime = DockerRuntime::connect()?;
    let runner = Runner::new(Arc::new(runtime), config.runner.clone());
    tracing::info!("Docker client connected");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let email = match EmailConfig::from_env() {
        Some(email_config) => Some(EmailDelivery::new(email_config)?),
        None => {
            tracing::info!("SMTP_HOST not set, notifications are logged only");
            None
        }
    };
    let router_handle = tokio::spawn(NotificationRouter::new(email).run(event_bus.subscribe()));

    // --- Monitor ---
    let monitor = Monitor::new(
        Arc::new(PgJobStore::new(pool.clone())),
        runner,
        Arc::clone(&event_bus),
        config.monitor.clone(),
    );
    let scheduler = Scheduler::new(monitor, pool.clone(), config.monitor_interval);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        signal_cancel.cancel();
    });

    scheduler.run(cancel).await;

    // --- Post-shutdown cleanup ---
    // Dropping the scheduler releases the monitor's handle on the bus, which
    // closes the channel and lets the router drain and exit.
    drop(scheduler);
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), router_handle).await;
    tracing::info!("Notification router stopped");

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
