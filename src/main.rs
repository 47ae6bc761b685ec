// src/main.rs
use env_logger::Builder;
use log::{error, info};
use std::sync::Arc;
use trading_panel::api::{self, AppState};
use trading_panel::auth::TokenService;
use trading_panel::chart::AlphaVantage;
use trading_panel::config::{Config, StorageBackend};
use trading_panel::db::{MemoryStore, ProfileStore, ScyllaStore, UserStore};
use trading_panel::error::ApiError;
use trading_panel::identity::IdentityService;
use trading_panel::stocks::StockService;

async fn build_state(config: &Config) -> Result<AppState, ApiError> {
    let (profiles, users): (Arc<dyn ProfileStore>, Arc<dyn UserStore>) = match config.storage {
        StorageBackend::Scylla => {
            let store = Arc::new(
                ScyllaStore::connect(
                    &config.scylla_node,
                    &config.scylla_keyspace,
                    config.store_timeout,
                )
                .await?,
            );
            (store.clone() as Arc<dyn ProfileStore>, store as Arc<dyn UserStore>)
        }
        StorageBackend::Memory => {
            info!("Using in-memory storage; data is lost on restart.");
            let store = Arc::new(MemoryStore::new());
            (store.clone() as Arc<dyn ProfileStore>, store as Arc<dyn UserStore>)
        }
    };

    let tokens = Arc::new(TokenService::new(&config.jwt_secret, config.token_ttl_secs));
    let charts = AlphaVantage::new(
        &config.alpha_vantage_url,
        &config.alpha_vantage_key,
        config.upstream_timeout,
    )?;

    Ok(AppState {
        stocks: StockService::new(profiles),
        identity: IdentityService::new(users, tokens, config.bcrypt_cost),
        charts: Arc::new(charts),
    })
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    Builder::new()
        .filter_level(config.log_level)
        .format_timestamp_secs()
        .parse_default_env()
        .init();

    info!("Starting the trading panel API...");
    let state = match build_state(&config).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize: {}", e);
            std::process::exit(1);
        }
    };

    let routes = api::routes(state);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    };
    let (addr, server) = match warp::serve(routes).try_bind_with_graceful_shutdown(config.bind, shutdown) {
        Ok(bound) => bound,
        Err(e) => {
            error!("Failed to bind {}: {}", config.bind, e);
            std::process::exit(1);
        }
    };

    info!("Server running on http://{}", addr);
    server.await;
    info!("Server stopped");
}
