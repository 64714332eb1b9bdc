use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tradesim::application::actors::price_ticker::{spawn_price_ticker, PriceTicker, TickerMessage};
use tradesim::application::actors::snapshot_sources::{
    DashboardHub, DashboardSource, MarketHub, MarketSource,
};
use tradesim::application::handlers::{router, AppState};
use tradesim::application::services::trading_service::TradingService;
use tradesim::config::SimulatorConfig;
use tradesim::domain::repositories::trading_store::TradingStore;
use tradesim::domain::services::execution_engine::ExecutionEngine;
use tradesim::domain::services::price_book::PriceBook;
use tradesim::domain::services::price_generator::PriceGenerator;
use tradesim::domain::services::snapshot_builder::SnapshotBuilder;
use tradesim::domain::value_objects::money::Cents;
use tradesim::persistence::repository::SqliteTradingStore;
use tradesim::persistence::{init_database, seed_demo_data, DatabaseConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tradesim=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SimulatorConfig::from_env();
    info!("Starting trading simulator: {:?}", config);

    let db_config = DatabaseConfig::from_env();
    let pool = init_database(&db_config).await?;
    if config.seed_demo_data {
        seed_demo_data(
            &pool,
            config.initial_investment_cents,
            config.default_max_change_cents,
        )
        .await?;
        info!("Demo data seeded");
    }

    let store: Arc<dyn TradingStore> = Arc::new(SqliteTradingStore::new(pool.clone()));
    let instruments = store.get_all_instruments().await?;
    if instruments.is_empty() {
        warn!("No instruments in the database; set SEED_DEMO_DATA=true to load a demo universe");
    }
    let prices = PriceBook::from_instruments(&instruments);
    info!("Loaded {} instruments into the price book", prices.len());

    let engine = Arc::new(ExecutionEngine::new(store.clone(), prices.clone()));
    let snapshots = SnapshotBuilder::new(store.clone(), prices.clone())
        .with_initial_investment(Cents::new(config.initial_investment_cents))
        .with_recent_news_limit(config.recent_news_limit);

    let dashboard_hub: DashboardHub = DashboardHub::spawn(
        "dashboard",
        DashboardSource::new(snapshots.clone()),
        config.hub_channel_capacity,
        config.hub_push_timeout(),
    );
    let market_hub: MarketHub = MarketHub::spawn(
        "market",
        MarketSource::new(snapshots.clone()),
        config.hub_channel_capacity,
        config.hub_push_timeout(),
    );

    let ticker = PriceTicker::new(
        prices.clone(),
        PriceGenerator::new(config.price_rng_seed),
        store.clone(),
        config.tick_interval(),
    )
    .with_trigger(dashboard_hub.trigger())
    .with_trigger(market_hub.trigger());
    let (ticker_tx, ticker_handle) = spawn_price_ticker(ticker);

    let service = TradingService::new(engine, snapshots, store.clone())
        .with_dashboard_trigger(dashboard_hub.trigger());

    let app = router(AppState {
        service,
        dashboard_hub: dashboard_hub.clone(),
        market_hub: market_hub.clone(),
    });

    info!("Listening on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    let server = axum::serve(listener, app);

    let shutdown_signal = async move {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal"),
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("Received SIGTERM signal");
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    };

    info!("Server started successfully. Press Ctrl+C to stop.");
    server.with_graceful_shutdown(shutdown_signal).await?;

    info!("Server shutting down gracefully...");

    if ticker_tx.send(TickerMessage::Shutdown).await.is_err() {
        warn!("Price ticker already stopped");
    }
    if let Err(e) = ticker_handle.await {
        error!("Price ticker task failed: {}", e);
    }
    dashboard_hub.shutdown().await;
    market_hub.shutdown().await;
    pool.close().await;

    info!("Shutdown complete");
    Ok(())
}
