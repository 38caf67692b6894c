use liquidscope::config::{CacheBackend, Config};
use liquidscope::datasource::{EtherscanIndexer, JsonRpcClient};
use liquidscope::{api, init_db, ChainIndexer, ChainRpc, FileRecordStore, RecordStore, Service, SqliteRecordStore};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

async fn open_store(config: &Config) -> Result<Arc<dyn RecordStore>, String> {
    match config.cache_backend {
        CacheBackend::File => FileRecordStore::open(&config.cache_dir)
            .await
            .map(|store| Arc::new(store) as Arc<dyn RecordStore>)
            .map_err(|e| e.to_string()),
        CacheBackend::Sqlite => {
            let db_path = Path::new(&config.cache_dir).join("cache.db");
            init_db(&db_path.to_string_lossy())
                .await
                .map(|pool| Arc::new(SqliteRecordStore::new(pool)) as Arc<dyn RecordStore>)
                .map_err(|e| e.to_string())
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let store = match open_store(&config).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Failed to open cache store: {}", e);
            std::process::exit(1);
        }
    };

    let limiter = Arc::new(config.rate_limiter());
    let rpc: Arc<dyn ChainRpc> = Arc::new(JsonRpcClient::new(
        config.rpc_url.clone(),
        config.position_manager,
        config.factory,
        Arc::clone(&limiter),
    ));
    let indexer: Arc<dyn ChainIndexer> = Arc::new(EtherscanIndexer::new(
        config.indexer_api_url.clone(),
        config.indexer_api_key.clone(),
        limiter,
    ));
    let service = Arc::new(Service::from_config(&config, rpc, indexer, store));

    if let Some(period) = config.sweep_interval {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                service.sweep().await;
            }
        });
    }

    let app = api::create_router(api::AppState::new(service));

    // Bind to address
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
