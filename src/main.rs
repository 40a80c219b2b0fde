//! Storefront Fulfillment - checkout pricing and order lifecycle service

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_fulfillment::api::{self, AppState};
use storefront_fulfillment::config::Config;
use storefront_fulfillment::domain::repository::{CouponStore, EventPublisher, OrderStore, ShippingTable};
use storefront_fulfillment::infrastructure::{
    EventLog, InMemoryCouponStore, InMemoryOrderStore, NatsPublisher, PgCouponStore, PgOrderStore, PgShippingTable,
    StaticShippingTable,
};
use storefront_fulfillment::pricing::{CouponValidator, PricingEngine};
use storefront_fulfillment::resilience::StoreGuard;
use storefront_fulfillment::{Authorizer, OrderLifecycleManager};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    let config = Config::from_env()?;

    let (orders, coupons, shipping) = match &config.database_url {
        Some(url) => {
            let db = PgPoolOptions::new().max_connections(10).connect(url).await.context("connecting to Postgres")?;
            sqlx::migrate!("./migrations").run(&db).await?;
            postgres_stores(db)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, orders and coupons are kept in memory");
            memory_stores()
        }
    };
    let events: Arc<dyn EventPublisher> = match &config.nats_url {
        Some(url) => Arc::new(NatsPublisher::connect(url).await?),
        None => Arc::new(EventLog::new()),
    };

    let guard = StoreGuard::new(config.store_timeout);
    let authz = Arc::new(Authorizer::new(config.catalog.clone()));
    let pricing = Arc::new(PricingEngine::new(shipping, CouponValidator::new(coupons, guard), config.shipping_defaults, guard));
    let lifecycle = Arc::new(OrderLifecycleManager::new(orders, pricing.clone(), authz.clone(), events, guard));
    let app = api::router(AppState { pricing, orders: lifecycle, authz, sessions: Arc::new(config.staff_tokens.clone()) });

    tracing::info!("🚀 Storefront fulfillment listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?, app).await?;
    Ok(())
}

type Stores = (Arc<dyn OrderStore>, Arc<dyn CouponStore>, Arc<dyn ShippingTable>);

fn postgres_stores(db: PgPool) -> Stores {
    (Arc::new(PgOrderStore::new(db.clone())), Arc::new(PgCouponStore::new(db.clone())), Arc::new(PgShippingTable::new(db)))
}

fn memory_stores() -> Stores {
    (Arc::new(InMemoryOrderStore::new()), Arc::new(InMemoryCouponStore::default()), Arc::new(StaticShippingTable::default()))
}
