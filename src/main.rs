use clap::Parser;
use knowbase::auth::AuthConfig;
use knowbase::catalog::Catalog;
use knowbase::config::{self, Config};
use knowbase::crawl;
use knowbase::embeddings::{EmbeddingGateway, HashingEmbeddingProvider};
use knowbase::jobs::{JobContext, JobQueue};
use knowbase::kv::KvStore;
use knowbase::metrics::MetricsCollector;
use knowbase::persistence::SnapshotManager;
use knowbase::reranker::Reranker;
use knowbase::retriever::HybridRetriever;
use knowbase::vector_store::VectorStore;
use knowbase::{api, cache};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "knowbase")]
#[command(about = "Multi-tenant knowledge retrieval service")]
struct Args {
    /// Server port
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Data directory for uploads, temp files and snapshots
    #[arg(short, long, default_value = "./data")]
    data_dir: String,

    /// Snapshot interval in seconds
    #[arg(short, long, default_value = "60")]
    snapshot_interval: u64,

    /// Maximum upload size in megabytes
    #[arg(long, default_value = "50")]
    max_file_mb: u64,

    /// Reranker strategy
    #[arg(long, default_value = "simple")]
    reranker: config::RerankerKind,

    /// Disable background job processing (synchronous ingestion only)
    #[arg(long, default_value = "false")]
    disable_bg_jobs: bool,

    /// Disable periodic snapshots and the shutdown save
    #[arg(long, default_value = "false")]
    disable_snapshots: bool,

    /// Disable the background scrape-source sync scheduler
    #[arg(long, default_value = "false")]
    disable_sync_scheduler: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("knowbase starting up");

    let config = Arc::new(Config {
        host: args.host.clone(),
        port: args.port,
        data_dir: args.data_dir.clone(),
        max_file_mb: args.max_file_mb,
        reranker: args.reranker,
        snapshot_interval_secs: args.snapshot_interval,
        disable_bg_jobs: args.disable_bg_jobs,
        disable_snapshots: args.disable_snapshots,
        disable_sync_scheduler: args.disable_sync_scheduler,
        ..Config::default()
    });

    let data_dir = PathBuf::from(&config.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        error!(error = %e, "failed to create data directory");
        std::process::exit(1);
    }

    let catalog = Catalog::new();
    let kv = KvStore::new();
    let vector_store = VectorStore::new(kv.clone());
    let cache = cache::SemanticCache::new(kv.clone());

    let snapshot_mgr = Arc::new(SnapshotManager::new(catalog.clone(), kv.clone(), &data_dir));
    if !config.disable_snapshots {
        match snapshot_mgr.load() {
            Ok(true) => info!("restored catalog and kv store from snapshot"),
            Ok(false) => info!("no existing snapshot found, starting fresh"),
            Err(e) => warn!(error = %e, "failed to load snapshot, starting fresh"),
        }
    }

    let provider = Arc::new(HashingEmbeddingProvider::new());
    let embedding_gateway = Arc::new(EmbeddingGateway::new(provider));
    let reranker = Reranker::from_kind(config.reranker, None);

    let retriever = Arc::new(HybridRetriever::new(
        catalog.clone(),
        vector_store.clone(),
        cache.clone(),
        embedding_gateway.clone(),
        reranker,
        config.features,
    ));

    let job_ctx = JobContext {
        catalog: catalog.clone(),
        kv: kv.clone(),
        vector_store: vector_store.clone(),
        gateway: embedding_gateway.clone(),
        data_dir: data_dir.clone(),
    };
    let job_queue = Arc::new(JobQueue::new(job_ctx.clone(), config.disable_bg_jobs));

    let crawl_client = Arc::new(crawl::CrawlClient::new(None).unwrap_or_else(|e| {
        error!(error = %e, "failed to build crawl http client");
        std::process::exit(1);
    }));

    let metrics = Arc::new(MetricsCollector::new());
    let auth_config = Arc::new(AuthConfig::new());

    let state = api::AppState {
        catalog: catalog.clone(),
        kv: kv.clone(),
        vector_store: vector_store.clone(),
        cache: cache.clone(),
        retriever,
        job_queue: job_queue.clone(),
        job_ctx: job_ctx.clone(),
        crawl_client: crawl_client.clone(),
        embedding_gateway: embedding_gateway.clone(),
        metrics,
        config: config.clone(),
    };

    if !config.disable_snapshots {
        snapshot_mgr.clone().start_periodic(Duration::from_secs(config.snapshot_interval_secs));
    }

    if !config.disable_sync_scheduler {
        let catalog = catalog.clone();
        let job_ctx = job_ctx.clone();
        let job_queue = job_queue.clone();
        let crawl_client = crawl_client.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(config::SYNC_SCAN_INTERVAL_MINS * 60));
            loop {
                ticker.tick().await;
                let results = crawl::run_sync_cycle(&catalog, &job_ctx, &job_queue, &crawl_client).await;
                for (source_id, outcome) in results {
                    info!(source_id, new = outcome.new, changed = outcome.changed, removed = outcome.removed, "sync cycle");
                }
            }
        });
    }

    let app = api::routes(state, auth_config);

    let addr = SocketAddr::new(config.host.parse().unwrap_or_else(|_| "0.0.0.0".parse().unwrap()), config.port);
    info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|e| {
        error!(error = %e, "failed to bind listener");
        std::process::exit(1);
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap_or_else(|e| error!(error = %e, "server error"));

    if !config.disable_snapshots {
        match snapshot_mgr.save() {
            Ok(()) => info!("final snapshot saved"),
            Err(e) => error!(error = %e, "final snapshot save failed"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl_c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
