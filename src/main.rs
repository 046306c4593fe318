//! Bond service binary: the cross-exchange bond-matching and
//! arbitrage-monitoring service.
//!
//! Wires together configuration, the contract/bond store, the priority
//! handoff, and the four independently crash-isolated loops: the
//! bond-builder (C10), the price updater (C11), the arbitrage monitor (C12),
//! and the bond post-resolution validator (C14).
//!
//! Concrete HTTP adapters for `ExchangeAClient`/`ExchangeBClient` are a
//! separate integration concern (the core consumes a narrow client trait and
//! never owns exchange wire protocols); this binary is generic over any pair
//! of implementations and is started here with placeholder clients so the
//! loop wiring itself can run standalone.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use betterbot_backend::core::arbitrage::ArbitrageMonitor;
use betterbot_backend::core::bond::Tier;
use betterbot_backend::core::bond_validator::{self, ValidationAccumulator};
use betterbot_backend::core::client::{
    ExchangeARawContract, ExchangeAClient, ExchangeBRawContract, ExchangeBClient, OrderBook,
};
use betterbot_backend::core::config::Config;
use betterbot_backend::core::contract::{Contract, Platform};
use betterbot_backend::core::error::CoreError;
use betterbot_backend::core::pipeline;
use betterbot_backend::core::price_updater;
use betterbot_backend::core::priority::PriorityHandoff;
use betterbot_backend::core::store::Store;

#[derive(Parser, Debug)]
#[command(name = "betterbot")]
#[command(about = "Cross-exchange bond-matching and arbitrage-monitoring service")]
struct Args {
    /// Path to the SQLite store (overrides BOND_DATABASE_PATH if set)
    #[arg(long, env = "BOND_DATABASE_PATH")]
    database_path: Option<String>,
}

/// A client with nothing behind it yet — every call reports the upstream as
/// unavailable. Swapped out for a real exchange-specific adapter at
/// deployment time; kept here so the four loops can be exercised end to end
/// without a live network dependency.
struct UnconfiguredExchangeA;

#[async_trait]
impl ExchangeAClient for UnconfiguredExchangeA {
    async fn list_active_contracts(
        &self,
        _cursor: Option<&str>,
    ) -> Result<(Vec<ExchangeARawContract>, Option<String>), CoreError> {
        Ok((vec![], None))
    }

    async fn get_contracts_by_ids(&self, _ids: &[String]) -> Result<Vec<ExchangeARawContract>, CoreError> {
        Ok(vec![])
    }

    async fn get_contract(&self, _id: &str) -> Result<Option<ExchangeARawContract>, CoreError> {
        Ok(None)
    }

    async fn get_order_book(&self, _token_id: &str) -> Result<OrderBook, CoreError> {
        Err(CoreError::UpstreamUnavailable(
            "exchange A client not configured".to_string(),
        ))
    }
}

struct UnconfiguredExchangeB;

#[async_trait]
impl ExchangeBClient for UnconfiguredExchangeB {
    async fn list_active_contracts(
        &self,
        _cursor: Option<&str>,
    ) -> Result<(Vec<ExchangeBRawContract>, Option<String>), CoreError> {
        Ok((vec![], None))
    }

    async fn get_contract(&self, _id: &str) -> Result<Option<ExchangeBRawContract>, CoreError> {
        Ok(None)
    }

    async fn get_order_book(&self, _token_id: &str) -> Result<OrderBook, CoreError> {
        Err(CoreError::UpstreamUnavailable(
            "exchange B client not configured".to_string(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive("betterbot=debug".parse().unwrap()),
        )
        .init();

    betterbot_backend::core::config::load_env();
    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(path) = args.database_path {
        config.database_path = path;
    }
    let config = Arc::new(config);

    info!(database_path = %config.database_path, "starting bond service");

    let store = Arc::new(Store::open(&config.database_path)?);
    let handoff = PriorityHandoff::new();
    let exchange_a = Arc::new(UnconfiguredExchangeA);
    let exchange_b = Arc::new(UnconfiguredExchangeB);

    let bond_builder = tokio::spawn(run_bond_builder_loop(store.clone(), config.clone()));
    let price_updater = tokio::spawn(run_price_updater_loop(
        store.clone(),
        config.clone(),
        handoff.clone(),
        exchange_a.clone(),
        exchange_b.clone(),
    ));
    let arbitrage_monitor = tokio::spawn(run_arbitrage_loop(store.clone(), config.clone(), handoff.clone()));
    let bond_validator = tokio::spawn(run_bond_validator_loop(
        store.clone(),
        config.clone(),
        exchange_a.clone(),
        exchange_b.clone(),
    ));

    let _ = tokio::join!(bond_builder, price_updater, arbitrage_monitor, bond_validator);
    Ok(())
}

/// C10: every `poll_interval_sec`, rebuilds bonds for every active, embedded
/// EX-A contract in the store. A loop-body error is logged and the loop
/// pauses briefly rather than exiting, per §5's crash-isolation note.
async fn run_bond_builder_loop(store: Arc<Store>, config: Arc<Config>) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.poll_interval_sec));
    loop {
        interval.tick().await;
        let probes = match store.list_active_embedded(Platform::ExchangeA) {
            Ok(probes) => probes,
            Err(err) => {
                error!(%err, "bond-builder: failed to load probe contracts");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };
        run_bond_builder_cycle(&store, &probes, &config);
    }
}

fn run_bond_builder_cycle(store: &Store, probes: &[Contract], config: &Config) {
    let stats = pipeline::run_cycle(store, probes, config);
    info!(?stats, "bond-builder cycle finished");
    if let Err(err) = pipeline::retire_bonds_for_inactive_contracts(store) {
        warn!(%err, "bond-builder: failed to retire bonds for inactive contracts");
    }
}

/// C11: refreshes bonded contract prices every `price_update_interval_sec`.
async fn run_price_updater_loop<A, B>(
    store: Arc<Store>,
    config: Arc<Config>,
    handoff: PriorityHandoff,
    exchange_a: Arc<A>,
    exchange_b: Arc<B>,
) where
    A: ExchangeAClient + 'static,
    B: ExchangeBClient + 'static,
{
    let mut interval = tokio::time::interval(Duration::from_secs(config.price_update_interval_sec));
    loop {
        interval.tick().await;
        match price_updater::run_cycle(&store, exchange_a.as_ref(), exchange_b.as_ref(), &config, &handoff).await {
            Ok(stats) => info!(?stats, "price updater cycle finished"),
            Err(err) => {
                error!(%err, "price updater cycle failed");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

/// C12: scans active bonds every `poll_interval_sec` for arbitrage
/// opportunities and republishes the priority hint consumed by C11.
async fn run_arbitrage_loop(store: Arc<Store>, config: Arc<Config>, handoff: PriorityHandoff) {
    let mut monitor = ArbitrageMonitor::new();
    let mut interval = tokio::time::interval(Duration::from_secs(config.poll_interval_sec));
    loop {
        interval.tick().await;
        match monitor.scan(&store, &config, None, None, &handoff) {
            Ok(intra) => {
                let cross = monitor.ranked_opportunities();
                info!(
                    cross_opportunities = cross.len(),
                    intra_opportunities = intra.len(),
                    "arbitrage scan complete"
                );
            }
            Err(err) => {
                error!(%err, "arbitrage scan failed");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

/// C14: the slow, independent post-resolution validator.
async fn run_bond_validator_loop<A, B>(store: Arc<Store>, config: Arc<Config>, exchange_a: Arc<A>, exchange_b: Arc<B>)
where
    A: ExchangeAClient + 'static,
    B: ExchangeBClient + 'static,
{
    let mut accumulator = ValidationAccumulator::new();
    let mut interval = tokio::time::interval(Duration::from_secs(config.bond_validation_interval_sec));
    loop {
        interval.tick().await;
        match bond_validator::run_cycle(
            &store,
            exchange_a.as_ref(),
            exchange_b.as_ref(),
            config.bond_validation_lookback_days,
            &mut accumulator,
        )
        .await
        {
            Ok(stats) => info!(?stats, "bond validator cycle finished"),
            Err(err) => {
                error!(%err, "bond validator cycle failed");
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        }
    }
}

#[allow(dead_code)]
fn tier_label(tier: Tier) -> &'static str {
    match tier {
        Tier::One => "tier_one",
        Tier::Two => "tier_two",
        Tier::Three => "tier_three",
    }
}
