use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use socialops::analytics::{AnalyticsService, StatsWorker};
use socialops::auth::TokenVerifier;
use socialops::bus::{EventBus, SqlLogBus};
use socialops::comments::{CommentService, Summarizer};
use socialops::config::Config;
use socialops::db::Database;
use socialops::gateway::Gateway;
use socialops::grpc::{self, CommentsGrpc, UploadGrpc};
use socialops::posts::{PostExecutor, PostService, Scheduler};
use socialops::storage::{object_store_from_config, UploadStore};
use socialops::telegram::{BotApiClient, TelegramApi, TelegramListener, TgCommentActions, TgPublisher, TgStats};
use socialops::vk::{VkClientFactory, VkCommentActions, VkConnector, VkFleet, VkIngest, VkPublisher, VkStats};
use socialops::web::{self, AppState};

/// Event log retention.
const BUS_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);
const BUS_PRUNE_INTERVAL: Duration = Duration::from_secs(3600);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting socialops");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let db = Database::new(&config.database_path)
        .await
        .context("Failed to initialize database")?;
    info!("Database initialized");

    let objects = object_store_from_config(&config).context("Failed to initialize object store")?;
    let uploads = UploadStore::new(db.clone(), objects);

    let sql_bus = Arc::new(SqlLogBus::new(
        db.pool().clone(),
        config.bus_replication(),
        config.bus_poll_interval,
    ));
    let bus: Arc<dyn EventBus> = sql_bus.clone();

    let summarizer = match config.summarize_url.as_deref() {
        Some(url) => Some(Summarizer::new(url).context("Failed to build summarizer client")?),
        None => {
            info!("Summarizer disabled");
            None
        }
    };

    let connector: Arc<dyn VkConnector> = Arc::new(
        VkClientFactory::new(&config.vk_api_url, &config.vk_api_version)
            .context("Failed to build VK client")?,
    );

    let mut comments = CommentService::new(db.clone(), Arc::clone(&bus), summarizer)
        .with_platform(Arc::new(VkCommentActions::new(db.clone(), uploads.clone(), Arc::clone(&connector))));
    let mut executor = PostExecutor::new(db.clone())
        .with_publisher(Arc::new(VkPublisher::new(db.clone(), uploads.clone(), Arc::clone(&connector))));
    let mut analytics = AnalyticsService::new(db.clone())
        .with_platform(Arc::new(VkStats::new(db.clone(), Arc::clone(&connector))));

    let telegram: Option<Arc<dyn TelegramApi>> = match config.telegram_bot_token.as_deref() {
        Some(token) => Some(Arc::new(
            BotApiClient::new(&config.telegram_api_url, token).context("Failed to build Telegram client")?,
        )),
        None => {
            warn!("TELEGRAM_BOT_TOKEN is not set, Telegram is disabled");
            None
        }
    };

    if let Some(api) = &telegram {
        comments = comments.with_platform(Arc::new(TgCommentActions::new(
            Arc::clone(api),
            db.clone(),
            uploads.clone(),
        )));
        executor = executor.with_publisher(Arc::new(TgPublisher::new(Arc::clone(api), db.clone(), uploads.clone())));
        analytics = analytics.with_platform(Arc::new(TgStats::new(db.clone())));
    }

    let shutdown = CancellationToken::new();
    let mut tasks = JoinSet::new();

    if let Some(api) = telegram {
        let listener = TelegramListener::new(
            api,
            db.clone(),
            uploads.clone(),
            Arc::clone(&bus),
            config.telegram_bot_debug,
        );
        let cancel = shutdown.clone();
        tasks.spawn(async move { listener.run(cancel).await });
    }

    let fleet = VkFleet::new(
        db.clone(),
        Arc::clone(&connector),
        VkIngest::new(db.clone(), uploads.clone(), Arc::clone(&bus)),
    );
    let (cancel, interval) = (shutdown.clone(), config.vk_discovery_interval);
    tasks.spawn(async move { fleet.run(interval, cancel).await });

    let worker = StatsWorker::new(db.clone(), analytics.clone(), config.stats_worker_id.clone());
    let (cancel, interval) = (shutdown.clone(), config.stats_worker_interval);
    tasks.spawn(async move { worker.run(interval, cancel).await });

    let scheduler = Scheduler::new(db.clone(), executor.clone());
    let (cancel, interval) = (shutdown.clone(), config.scheduler_interval);
    tasks.spawn(async move { scheduler.run(interval, cancel).await });

    let cancel = shutdown.clone();
    tasks.spawn(async move { prune_loop(&sql_bus, cancel).await });

    let verifier = TokenVerifier::new(&config.jwt_secret);
    let gateway = Gateway::new(comments.clone(), config.subscriber_buffer, shutdown.clone());

    let comments_addr = grpc_addr(&config.grpc_host, config.comments_grpc_port)?;
    let svc = CommentsGrpc::new(gateway.clone(), verifier.clone());
    let cancel = shutdown.clone();
    tasks.spawn(async move {
        if let Err(e) = grpc::serve_comments(comments_addr, svc, cancel).await {
            error!("Comments gRPC server error: {e:#}");
        }
    });

    let upload_addr = grpc_addr(&config.grpc_host, config.upload_grpc_port)?;
    let svc = UploadGrpc::new(uploads.clone());
    let cancel = shutdown.clone();
    tasks.spawn(async move {
        if let Err(e) = grpc::serve_upload(upload_addr, svc, cancel).await {
            error!("Upload gRPC server error: {e:#}");
        }
    });

    let state = AppState {
        comments,
        posts: PostService::new(db.clone(), executor.clone()),
        analytics,
        gateway,
        verifier,
    };
    let (host, port, cancel) = (config.web_host.clone(), config.web_port, shutdown.clone());
    tasks.spawn(async move {
        if let Err(e) = web::serve(&host, port, state, cancel).await {
            error!("Web server error: {e:#}");
        }
    });

    shutdown_signal().await;

    info!("Shutting down...");
    shutdown.cancel();

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Tasks did not stop in time, aborting");
        tasks.abort_all();
    }
    executor.drain(SHUTDOWN_GRACE).await;
    db.close().await;

    info!("Shutdown complete");

    Ok(())
}

fn grpc_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Invalid gRPC address {host}:{port}"))
}

async fn prune_loop(bus: &SqlLogBus, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(BUS_PRUNE_INTERVAL);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match bus.prune(BUS_RETENTION).await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "Pruned event log"),
                    Err(e) => error!("Event log prune error: {e:#}"),
                }
            }
        }
    }
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,socialops=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
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
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
