mod api;
mod ws;

use alloy::primitives::Address;
use anyhow::Context;
use configuration::Settings;
use order_service::OrderService;
use settlement::{ChainClient, SettlementWorker};
use snapshot_cache::OrderbookCache;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use storage::{OrderStore, TradeStore};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = Settings::load().context("failed to load settings")?;

    // Database
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&settings.database_url)
        .await
        .context("failed to connect to database")?;

    // Best-effort schema migration, as on every start.
    match tokio::fs::read_to_string("migrations/001_init.sql").await {
        Ok(sql) => {
            if let Err(e) = sqlx::raw_sql(&sql).execute(&pool).await {
                warn!(error = %e, "migration may have already been applied");
            }
        }
        Err(e) => warn!(error = %e, "could not read migration file"),
    }

    // Cache
    let cache = OrderbookCache::connect(&settings.redis_url)
        .await
        .context("failed to connect to redis")?;

    let contract: Address = if settings.contract_address.is_empty() {
        Address::ZERO
    } else {
        settings
            .contract_address
            .parse()
            .context("invalid CONTRACT_ADDRESS")?
    };

    // Settlement pipeline: bounded queue so a slow chain node backpressures
    // submissions instead of accumulating jobs.
    let (settle_tx, settle_rx) = mpsc::channel(100);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_handle = if settings.chain_configured() {
        let client = ChainClient::connect(
            &settings.rpc_url,
            &settings.private_key,
            settings.chain_id,
            contract,
        )
        .await
        .context("failed to create chain client")?;
        info!(signer = %client.address, chain_id = settings.chain_id, "settlement worker starting");
        tokio::spawn(SettlementWorker::new(client).run(settle_rx, shutdown_rx))
    } else {
        warn!("blockchain not configured, settlement disabled");
        tokio::spawn(settlement::run_stub(settle_rx))
    };

    // Stores and the coordinator
    let orders = OrderStore::new(pool.clone());
    let trades = TradeStore::new(pool);
    let service = Arc::new(OrderService::new(
        orders,
        trades,
        cache.clone(),
        settings.chain_id,
        contract,
        settle_tx,
    ));

    // Rebuild the in-memory books from persisted open orders.
    for pair in settings.pair_list() {
        if let Err(e) = service.load_open_orders(&pair).await {
            warn!(pair = %pair, error = %e, "failed to load open orders");
        }
    }

    let routes = api::routes(service.clone(), cache);
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server_port));
    info!(%addr, "listening");

    let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async {
        let _ = tokio::signal::ctrl_c().await;
    });
    server.await;

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    drop(service);
    let _ = worker_handle.await;

    Ok(())
}
