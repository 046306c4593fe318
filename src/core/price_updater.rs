//! Price updater (C11): refreshes outcome prices for every contract
//! referenced by an active bond, on a short period, preferring whatever
//! markets C12 most recently flagged as priority.
//!
//! EX-A supports a bulk by-id lookup and is refreshed in batches; EX-B's bulk
//! lookup is unreliable (§4.1), so each bonded EX-B contract's outcomes are
//! refreshed one order book per token, falling back to a filtered listing
//! scan when the client has no bulk support at all.

use crate::core::client::{exchange_a_to_raw_contract, with_retry, ExchangeAClient, ExchangeBClient, OrderBook};
use crate::core::config::Config;
use crate::core::contract::{ContractStatus, OutcomePrice, Platform};
use crate::core::priority::{prioritize, PriorityHandoff};
use crate::core::store::Store;
use anyhow::Result;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_BATCH_SIZE: usize = 100;
const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 200;

#[derive(Debug, Default, Clone, Copy)]
pub struct RefreshStats {
    pub exchange_a_updated: usize,
    pub exchange_b_updated: usize,
    pub failures: usize,
}

/// Runs one refresh cycle over the bonded contract set.
pub async fn run_cycle<A, B>(
    store: &Store,
    exchange_a: &A,
    exchange_b: &B,
    config: &Config,
    handoff: &PriorityHandoff,
) -> Result<RefreshStats>
where
    A: ExchangeAClient,
    B: ExchangeBClient,
{
    let (bonded_a, bonded_b) = store.bonded_contract_ids()?;
    let priority = handoff.current();
    let ordered_a = prioritize(bonded_a, &priority.exchange_a_ids);
    let ordered_b = prioritize(bonded_b, &priority.exchange_b_ids);

    let mut stats = RefreshStats::default();
    stats.exchange_a_updated = refresh_exchange_a(store, exchange_a, &ordered_a).await?;
    stats.exchange_b_updated = refresh_exchange_b(store, exchange_b, &ordered_b).await?;

    debug!(
        a_updated = stats.exchange_a_updated,
        b_updated = stats.exchange_b_updated,
        "price updater cycle complete"
    );
    Ok(stats)
}

async fn refresh_exchange_a<A: ExchangeAClient>(store: &Store, client: &A, ids: &[String]) -> Result<usize> {
    let mut updated = 0;
    for batch in ids.chunks(MAX_BATCH_SIZE) {
        let batch_ids = batch.to_vec();
        let result = with_retry("exchange_a.get_contracts_by_ids", MAX_RETRY_ATTEMPTS, Duration::from_millis(RETRY_BASE_DELAY_MS), || {
            let ids = batch_ids.clone();
            async move { client.get_contracts_by_ids(&ids).await }
        })
        .await;

        let records = match result {
            Ok(records) => records,
            Err(err) => {
                warn!(%err, "exchange A batch refresh failed, skipping batch");
                continue;
            }
        };

        for raw in records {
            let ticker = raw.ticker.clone();
            let raw_contract = match exchange_a_to_raw_contract(raw) {
                Ok(rc) => rc,
                Err(err) => {
                    warn!(ticker, %err, "exchange A price record could not be converted, skipping");
                    continue;
                }
            };
            store.update_contract_prices(Platform::ExchangeA, &ticker, &raw_contract.outcome_prices, Utc::now())?;
            updated += 1;
        }
    }
    Ok(updated)
}

async fn refresh_exchange_b<B: ExchangeBClient>(store: &Store, client: &B, ids: &[String]) -> Result<usize> {
    let mut updated = 0;
    for id in ids {
        let contract = match store.get_contract(Platform::ExchangeB, id)? {
            Some(c) if c.status == ContractStatus::Active => c,
            _ => continue,
        };
        if contract.token_ids.is_empty() {
            continue;
        }

        let mut outcome_prices = Vec::with_capacity(contract.token_ids.len());
        let mut all_books_ok = true;
        for token_id in &contract.token_ids {
            let token_id = token_id.clone();
            let result = with_retry("exchange_b.get_order_book", MAX_RETRY_ATTEMPTS, Duration::from_millis(RETRY_BASE_DELAY_MS), || {
                let token_id = token_id.clone();
                async move { client.get_order_book(&token_id).await }
            })
            .await;

            match result {
                Ok(book) => outcome_prices.push(book_to_outcome_price(&book)),
                Err(err) => {
                    warn!(id, %err, "exchange B order book fetch failed, falling back to listing scan");
                    all_books_ok = false;
                    break;
                }
            }
        }

        if all_books_ok && !outcome_prices.is_empty() {
            store.update_contract_prices(Platform::ExchangeB, id, &outcome_prices, Utc::now())?;
            updated += 1;
        }
    }

    if updated == 0 && !ids.is_empty() {
        updated += refresh_exchange_b_via_listing(store, client, ids).await?;
    }

    Ok(updated)
}

/// Fallback path when per-token order-book fetches are unavailable: scan the
/// full active listing and filter down to the bonded id set (§4.10 step 4).
async fn refresh_exchange_b_via_listing<B: ExchangeBClient>(store: &Store, client: &B, ids: &[String]) -> Result<usize> {
    use std::collections::HashSet;
    let bonded: HashSet<&String> = ids.iter().collect();
    let mut updated = 0;
    let mut cursor: Option<String> = None;

    loop {
        let result = with_retry("exchange_b.list_active_contracts", MAX_RETRY_ATTEMPTS, Duration::from_millis(RETRY_BASE_DELAY_MS), || {
            let cursor = cursor.clone();
            async move { client.list_active_contracts(cursor.as_deref()).await }
        })
        .await;

        let (records, next_cursor) = match result {
            Ok(page) => page,
            Err(err) => {
                warn!(%err, "exchange B listing fallback failed");
                break;
            }
        };

        for raw in records {
            if !bonded.contains(&raw.condition_id) {
                continue;
            }
            let condition_id = raw.condition_id.clone();
            let converted = match crate::core::client::exchange_b_to_raw_contract(raw) {
                Ok(rc) => rc,
                Err(err) => {
                    warn!(condition_id, %err, "exchange B listing record could not be converted, skipping");
                    continue;
                }
            };
            store.update_contract_prices(Platform::ExchangeB, &condition_id, &converted.outcome_prices, Utc::now())?;
            updated += 1;
        }

        match next_cursor {
            Some(c) => cursor = Some(c),
            None => break,
        }
    }

    Ok(updated)
}

fn book_to_outcome_price(book: &OrderBook) -> OutcomePrice {
    match (book.best_bid(), book.best_ask()) {
        (Some(bid), Some(ask)) => OutcomePrice {
            mid: Some((bid + ask) / 2.0),
            bid: Some(bid),
            ask: Some(ask),
        },
        _ => OutcomePrice::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::client::{ExchangeARawContract, ExchangeBRawContract};
    use crate::core::contract::{EntitySets, Granularity, OutcomeSchema, Polarity, TimeWindow};
    use crate::core::error::CoreError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeExchangeA {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExchangeAClient for FakeExchangeA {
        async fn list_active_contracts(&self, _cursor: Option<&str>) -> Result<(Vec<ExchangeARawContract>, Option<String>), CoreError> {
            Ok((vec![], None))
        }

        async fn get_contracts_by_ids(&self, ids: &[String]) -> Result<Vec<ExchangeARawContract>, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ids
                .iter()
                .map(|id| ExchangeARawContract {
                    ticker: id.clone(),
                    title: "t".to_string(),
                    subtitle: String::new(),
                    close_time: Some(Utc::now() + chrono::Duration::days(1)),
                    expiration_time: None,
                    status: "active".to_string(),
                    category: "general".to_string(),
                    yes_bid: Some(40),
                    yes_ask: Some(42),
                    last_price: Some(41),
                    volume: 0.0,
                    liquidity: 0.0,
                })
                .collect())
        }

        async fn get_contract(&self, _id: &str) -> Result<Option<ExchangeARawContract>, CoreError> {
            Ok(None)
        }

        async fn get_order_book(&self, _token_id: &str) -> Result<OrderBook, CoreError> {
            Err(CoreError::UpstreamUnavailable("not used".to_string()))
        }
    }

    struct FakeExchangeB {
        books: Mutex<std::collections::HashMap<String, OrderBook>>,
    }

    #[async_trait]
    impl ExchangeBClient for FakeExchangeB {
        async fn list_active_contracts(&self, _cursor: Option<&str>) -> Result<(Vec<ExchangeBRawContract>, Option<String>), CoreError> {
            Ok((vec![], None))
        }

        async fn get_contract(&self, _id: &str) -> Result<Option<ExchangeBRawContract>, CoreError> {
            Ok(None)
        }

        async fn get_order_book(&self, token_id: &str) -> Result<OrderBook, CoreError> {
            self.books
                .lock()
                .unwrap()
                .get(token_id)
                .cloned()
                .ok_or_else(|| CoreError::UpstreamUnavailable("no book".to_string()))
        }
    }

    fn temp_store(name: &str) -> Store {
        let mut path = std::env::temp_dir();
        path.push(format!("bonding_price_updater_test_{name}_{}.db", std::process::id()));
        Store::open(&path.to_string_lossy()).unwrap()
    }

    fn contract_b(id: &str, token_ids: Vec<String>) -> crate::core::contract::Contract {
        let now = Utc::now();
        crate::core::contract::Contract {
            platform: Platform::ExchangeB,
            id: id.to_string(),
            condition_id: Some(id.to_string()),
            token_ids,
            title: "t".to_string(),
            description: String::new(),
            cleaned_title: "t".to_string(),
            cleaned_description: String::new(),
            category: "general".to_string(),
            event_type: "general".to_string(),
            geo_scope: "US".to_string(),
            resolution_source: None,
            sport_subtype: None,
            is_parlay: false,
            entities: EntitySets::default(),
            outcome_schema: OutcomeSchema::YesNo {
                polarity: Polarity::Positive,
            },
            outcome_prices: vec![OutcomePrice::default()],
            time_window: TimeWindow {
                resolution: None,
                observation_start: None,
                observation_end: None,
                granularity: Granularity::Week,
            },
            embedding: None,
            volume: 0.0,
            liquidity: 0.0,
            fee_hint: None,
            status: ContractStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn refreshes_exchange_a_contracts_in_a_single_batch() {
        let store = temp_store("exchange_a");
        let client = FakeExchangeA { calls: AtomicUsize::new(0) };
        let ids = vec!["T1".to_string(), "T2".to_string()];

        let updated = refresh_exchange_a(&store, &client, &ids).await.unwrap();
        assert_eq!(updated, 2);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refreshes_exchange_b_contracts_via_order_book() {
        let store = temp_store("exchange_b");
        store.upsert_contract(&contract_b("C1", vec!["tok1".to_string()])).unwrap();

        let mut books = std::collections::HashMap::new();
        books.insert(
            "tok1".to_string(),
            OrderBook {
                bids: vec![(0.40, 100.0)],
                asks: vec![(0.42, 100.0)],
                timestamp: Utc::now(),
            },
        );
        let client = FakeExchangeB { books: Mutex::new(books) };

        let updated = refresh_exchange_b(&store, &client, &["C1".to_string()]).await.unwrap();
        assert_eq!(updated, 1);

        let stored = store.get_contract(Platform::ExchangeB, "C1").unwrap().unwrap();
        assert_eq!(stored.outcome_prices[0].bid, Some(0.40));
        assert_eq!(stored.outcome_prices[0].ask, Some(0.42));
    }
}
