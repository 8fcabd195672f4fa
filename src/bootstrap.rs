use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tracing::info;

use crate::{
    api::handler::AppState,
    auth::JwtHandler,
    commission::CommissionAccrualTrigger,
    config::{Config, StorageBackend},
    error::AppResult,
    ledger::{LedgerRepository, LedgerStore, LedgerTransactionExecutor},
    memory::InMemoryStore,
    payments::PaymentWebhookIngestor,
    pricing::{FareCalculator, RateConfigRepository, RateConfigSource},
    rides::{RideRepository, RideService, RideStore, StaleRequestReaper},
    settlement::SettlementScheduler,
};

/// Storage seams shared by every component
#[derive(Clone)]
pub struct Stores {
    pub ledger: Arc<dyn LedgerStore>,
    pub rides: Arc<dyn RideStore>,
    pub rates: Arc<dyn RateConfigSource>,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            ledger: store.clone(),
            rides: store.clone(),
            rates: store,
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            ledger: Arc::new(LedgerRepository::new(pool.clone())),
            rides: Arc::new(RideRepository::new(pool.clone())),
            rates: Arc::new(RateConfigRepository::new(pool)),
        }
    }
}

/// Wire components over `stores` without starting background work
pub fn build_state(config: &Config, stores: &Stores) -> AppResult<AppState> {
    let ledger = Arc::new(LedgerTransactionExecutor::new(
        stores.ledger.clone(),
        config.retry_policy(),
    ));
    let webhooks = Arc::new(PaymentWebhookIngestor::new(
        ledger.clone(),
        config.webhook_secret.clone(),
    ));
    let fares = Arc::new(FareCalculator::new(stores.rates.clone(), config.fare()?));
    let rides = Arc::new(RideService::new(stores.rides.clone(), fares.clone()));
    let settlement = Arc::new(SettlementScheduler::new(
        config.settlement_schedule()?,
        ledger.clone(),
    ));
    let reaper = Arc::new(StaleRequestReaper::new(stores.rides.clone(), config.reaper()));

    Ok(AppState {
        ledger,
        webhooks,
        fares,
        rides,
        settlement,
        reaper,
        jwt: Arc::new(JwtHandler::new(&config.jwt_secret)),
        storage: config.storage_backend,
    })
}

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let stores = match config.storage_backend {
        StorageBackend::Postgres => Stores::postgres(initialize_database(&config.database_url).await?),
        StorageBackend::Memory => {
            info!("📦 Using in-memory storage (state is lost on restart)");
            Stores::memory()
        }
    };

    let state = build_state(config, &stores)?;

    // Commission accrual from the ride change feed
    let trigger = Arc::new(CommissionAccrualTrigger::new(
        state.ledger.clone(),
        stores.rides.clone(),
        stores.rates.clone(),
        config.commission(),
    ));
    let feed = stores.rides.subscribe_changes().await?;
    trigger.start(feed);
    info!("✅ Commission accrual trigger started");

    state.settlement.clone().start()?;
    info!(
        "✅ Settlement scheduler started (daily at {:02}:{:02}, UTC{})",
        config.settlement_hour,
        config.settlement_minute,
        config.operating_offset()?
    );

    state.reaper.clone().start();
    info!(
        "✅ Stale ride reaper started (every {}s, timeout {}s)",
        config.reaper_interval_secs, config.reaper_timeout_secs
    );

    Ok(state)
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(50)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: 50 max connections");

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
