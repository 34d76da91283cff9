use std::sync::Arc;

use dotenvy::dotenv;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use elfsim::analysis::{CoderecBridge, MinHash};
use elfsim::catalog::Catalog;
use elfsim::config::Config;
use elfsim::service::FileAnalysisService;
use elfsim::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "elfsim=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .max(2);
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build_global()
        .ok();

    // MinHash parameters are fixed for the process lifetime; every signature
    // computed after this point uses them
    let engine = MinHash::init(
        config.minhash_signature_len,
        config.minhash_dict_size,
        config.minhash_seed,
    );
    tracing::info!(
        "minhash engine: L={}, D={}",
        engine.signature_len(),
        engine.dict_size()
    );

    let catalog = Catalog::connect(&config.database_url).await?;
    catalog.ensure_schema().await?;

    let bridge = Arc::new(CoderecBridge::new(
        config.coderec_enabled,
        config.coderec_location.clone(),
    ));
    if !bridge.is_enabled() {
        tracing::info!("code-region classifier disabled, region lists will be empty");
    }

    let service = FileAnalysisService::new(
        catalog,
        bridge,
        config.weights()?,
        config.thresholds(),
        config.request_deadline(),
    );

    let state = AppState { config: config.clone(), service: Arc::new(service) };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!("server starting on port {}", config.port);
    axum::serve(listener, app).await?;

    Ok(())
}
