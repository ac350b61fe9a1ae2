/// Ingestion Driver
/// Walks a wallet's history page by page (backfill), then keeps the store
/// current with a newest-page tail sync. All persistence is idempotent, so
/// a rerun at the same cursor converges
use crate::core::config::check_wallet_address;
use crate::core::errors::{IndexerError, Result};
use crate::ingest::normalizer::Normalizer;
use crate::provider::types::PageItem;
use crate::provider::TransactionProvider;
use crate::storage::types::{RawTransaction, SyncState};
use crate::storage::IndexerStore;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillStats {
    pub pages_fetched: u64,
    pub raw_tx_count: u64,
    pub wallet_tx_count: u64,
    /// Highest slot seen across all pages.
    pub first_slot: Option<u64>,
    /// Lowest slot seen across all pages.
    pub last_slot: Option<u64>,
    /// Page-level retries (currently only cursor resets).
    pub retries: u64,
    pub elapsed_ms: u64,
}

impl BackfillStats {
    fn absorb_page(&mut self, min_slot: Option<u64>, max_slot: Option<u64>) {
        self.first_slot = match (self.first_slot, max_slot) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.last_slot = match (self.last_slot, min_slot) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
}

pub struct IngestionDriver {
    provider: Arc<dyn TransactionProvider>,
    store: Arc<dyn IndexerStore>,
    normalizer: Arc<Normalizer>,
    max_pages: usize,
}

impl IngestionDriver {
    pub fn new(
        provider: Arc<dyn TransactionProvider>,
        store: Arc<dyn IndexerStore>,
        normalizer: Arc<Normalizer>,
        max_pages: usize,
    ) -> Self {
        Self {
            provider,
            store,
            normalizer,
            max_pages,
        }
    }

    /// Walk the wallet's history backward until the provider runs dry or
    /// the page cap is hit. Resumes from the stored cursor.
    pub async fn backfill(&self, wallet: &str, max_pages: Option<usize>) -> Result<BackfillStats> {
        check_wallet_address(wallet)?;
        let started = Instant::now();
        let max_pages = max_pages.unwrap_or(self.max_pages);

        let mut state = match self.store.sync_state(wallet).await? {
            Some(state) => state,
            None => {
                let state = SyncState::new(wallet);
                self.store.upsert_sync_state(&state).await?;
                state
            }
        };

        let mut before = state.last_before.clone();
        let mut stats = BackfillStats::default();
        let mut cursor_reset = false;
        let mut exhausted = false;
        let mut page = 0;

        while page < max_pages {
            let page_data = match self.provider.fetch_page(wallet, before.as_deref()).await {
                Ok(page_data) => page_data,
                Err(IndexerError::CursorInvalid(cursor)) if !cursor_reset => {
                    // Self-heal exactly once per run: drop the poisoned
                    // cursor and retry the same page from the top.
                    warn!("Cursor '{}' rejected for {}; resetting", cursor, wallet);
                    cursor_reset = true;
                    stats.retries += 1;
                    before = None;
                    state.last_before = None;
                    state.updated_at = Utc::now();
                    self.store.upsert_sync_state(&state).await?;
                    continue;
                }
                Err(IndexerError::CursorInvalid(cursor)) => {
                    return Err(IndexerError::UpstreamPermanent {
                        status: 400,
                        body: format!("cursor '{}' rejected after reset", cursor),
                    });
                }
                Err(e) => return Err(e),
            };
            page += 1;

            if page_data.items.is_empty() {
                exhausted = true;
                break;
            }

            let (raw_count, event_count) = self.persist_items(wallet, &page_data.items).await?;
            stats.pages_fetched += 1;
            stats.raw_tx_count += raw_count;
            stats.wallet_tx_count += event_count;
            stats.absorb_page(page_data.min_slot(), page_data.max_slot());

            match page_data.next_before() {
                Some(next) => {
                    before = Some(next.clone());
                    state.last_before = Some(next);
                    state.updated_at = Utc::now();
                    self.store.upsert_sync_state(&state).await?;
                }
                None => {
                    exhausted = true;
                    break;
                }
            }
        }

        if exhausted {
            state.last_before = None;
        }
        state.full_scan_at = Some(Utc::now());
        state.updated_at = Utc::now();
        self.store.upsert_sync_state(&state).await?;

        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "Backfill for {}: {} pages, {} raw, {} events in {}ms",
            wallet, stats.pages_fetched, stats.raw_tx_count, stats.wallet_tx_count, stats.elapsed_ms
        );
        Ok(stats)
    }

    /// Fetch the newest page and persist the prefix of signatures the store
    /// has not seen yet.
    pub async fn sync_tail(&self, wallet: &str) -> Result<BackfillStats> {
        check_wallet_address(wallet)?;
        let started = Instant::now();

        let mut state = self
            .store
            .sync_state(wallet)
            .await?
            .ok_or_else(|| IndexerError::PreconditionFailed("run backfill first".to_string()))?;

        let page = self.provider.fetch_page(wallet, None).await?;

        let mut fresh: Vec<PageItem> = Vec::new();
        for item in &page.items {
            if self.store.has_raw_transaction(&item.tx.signature).await? {
                break;
            }
            fresh.push(item.clone());
        }

        let mut stats = BackfillStats::default();
        if !page.items.is_empty() {
            stats.pages_fetched = 1;
        }

        if !fresh.is_empty() {
            let (raw_count, event_count) = self.persist_items(wallet, &fresh).await?;
            stats.raw_tx_count = raw_count;
            stats.wallet_tx_count = event_count;

            let min_slot = fresh.iter().map(|i| i.tx.slot).min();
            let max_slot = fresh.iter().map(|i| i.tx.slot).max();
            stats.absorb_page(min_slot, max_slot);

            state.verified_slot = match (state.verified_slot, max_slot) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            state.updated_at = Utc::now();
            self.store.upsert_sync_state(&state).await?;
        }

        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "Tail sync for {}: {} new transactions, verified slot {:?}",
            wallet, stats.raw_tx_count, state.verified_slot
        );
        Ok(stats)
    }

    /// Persist one batch: raw rows first, then their normalized events.
    /// Used by the backfill/tail paths and by reconciliation repair.
    pub(crate) async fn persist_items(
        &self,
        wallet: &str,
        items: &[PageItem],
    ) -> Result<(u64, u64)> {
        let raws: Vec<RawTransaction> = items
            .iter()
            .map(|item| RawTransaction {
                signature: item.tx.signature.clone(),
                slot: item.tx.slot,
                block_time: item.tx.timestamp,
                payload: item.payload.clone(),
            })
            .collect();
        self.store.upsert_raw_transactions(&raws).await?;

        let events = self.normalizer.normalize_page(items, wallet).await;
        self.store.upsert_wallet_events(&events).await?;

        Ok((raws.len() as u64, events.len() as u64))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{native_tx, page, ScriptedProvider};
    use super::*;
    use crate::core::work_queue::WorkQueue;
    use crate::metadata::TokenMetadataResolver;
    use crate::storage::MemoryStore;

    const WALLET: &str = "WaLLet1111111111111111111111111111111111111";

    fn driver_with(
        script: Vec<Result<crate::provider::types::TransactionPage>>,
    ) -> (IngestionDriver, Arc<ScriptedProvider>, Arc<MemoryStore>) {
        let provider = Arc::new(ScriptedProvider::new(script));
        let store = Arc::new(MemoryStore::new());
        let resolver = Arc::new(TokenMetadataResolver::new(
            "unused".to_string(),
            store.clone(),
            Arc::new(WorkQueue::new(2, 100)),
        ));
        let normalizer = Arc::new(Normalizer::new(resolver));
        let driver = IngestionDriver::new(provider.clone(), store.clone(), normalizer, 1000);
        (driver, provider, store)
    }

    #[tokio::test]
    async fn test_empty_history() {
        let (driver, _provider, store) = driver_with(vec![Ok(page(vec![]))]);

        let stats = driver.backfill(WALLET, None).await.unwrap();
        assert_eq!(stats.pages_fetched, 0);
        assert_eq!(stats.raw_tx_count, 0);
        assert_eq!(stats.wallet_tx_count, 0);

        let state = store.sync_state(WALLET).await.unwrap().unwrap();
        assert!(state.full_scan_at.is_some());
        assert_eq!(state.last_before, None);
    }

    #[tokio::test]
    async fn test_single_page() {
        let (driver, _provider, store) = driver_with(vec![
            Ok(page(vec![
                native_tx("sig2", 1001, WALLET, 1_000_000),
                native_tx("sig1", 1000, WALLET, 2_000_000),
            ])),
            Ok(page(vec![])),
        ]);

        let stats = driver.backfill(WALLET, None).await.unwrap();
        assert_eq!(stats.pages_fetched, 1);
        assert_eq!(stats.raw_tx_count, 2);
        assert_eq!(stats.wallet_tx_count, 2);
        assert_eq!(stats.first_slot, Some(1001));
        assert_eq!(stats.last_slot, Some(1000));

        assert_eq!(store.count_raw_transactions().await.unwrap(), 2);
        assert!(store.has_raw_transaction("sig1").await.unwrap());
    }

    #[tokio::test]
    async fn test_two_pages_with_pagination() {
        let (driver, provider, _store) = driver_with(vec![
            Ok(page(vec![native_tx("sig1", 1000, WALLET, 1_000_000)])),
            Ok(page(vec![])),
        ]);

        let stats = driver.backfill(WALLET, None).await.unwrap();
        assert_eq!(stats.pages_fetched, 1);
        assert_eq!(
            provider.recorded_calls(),
            vec![None, Some("sig1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_idempotent_rerun() {
        let script = || {
            vec![
                Ok(page(vec![native_tx("sig1", 1000, WALLET, 1_000_000)])),
                Ok(page(vec![])),
            ]
        };
        let (driver, _provider, store) = driver_with(script());

        let first = driver.backfill(WALLET, None).await.unwrap();
        assert_eq!(first.raw_tx_count, 1);
        let events_after_first = store.count_wallet_events(WALLET).await.unwrap();

        // Same upstream state again: same per-run counters, same rows.
        let provider = Arc::new(ScriptedProvider::new(script()));
        let resolver = Arc::new(TokenMetadataResolver::new(
            "unused".to_string(),
            store.clone(),
            Arc::new(WorkQueue::new(2, 100)),
        ));
        let driver2 = IngestionDriver::new(
            provider,
            store.clone(),
            Arc::new(Normalizer::new(resolver)),
            1000,
        );
        let second = driver2.backfill(WALLET, None).await.unwrap();
        assert_eq!(second.raw_tx_count, 1);

        assert_eq!(store.count_raw_transactions().await.unwrap(), 1);
        assert_eq!(
            store.count_wallet_events(WALLET).await.unwrap(),
            events_after_first
        );
    }

    #[tokio::test]
    async fn test_cursor_self_heal_once() {
        let (driver, provider, store) = driver_with(vec![
            Err(IndexerError::CursorInvalid("stale".to_string())),
            Ok(page(vec![native_tx("sig1", 1000, WALLET, 1_000_000)])),
            Ok(page(vec![])),
        ]);

        // Seed a poisoned cursor.
        let mut state = SyncState::new(WALLET);
        state.last_before = Some("stale".to_string());
        store.upsert_sync_state(&state).await.unwrap();

        let stats = driver.backfill(WALLET, None).await.unwrap();
        assert_eq!(stats.retries, 1);
        assert_eq!(stats.raw_tx_count, 1);
        // First call carried the bad cursor; the retry cleared it.
        assert_eq!(
            provider.recorded_calls()[..2],
            [Some("stale".to_string()), None]
        );
    }

    #[tokio::test]
    async fn test_second_cursor_rejection_is_fatal() {
        let (driver, _provider, store) = driver_with(vec![
            Err(IndexerError::CursorInvalid("stale".to_string())),
            Err(IndexerError::CursorInvalid("".to_string())),
        ]);

        let mut state = SyncState::new(WALLET);
        state.last_before = Some("stale".to_string());
        store.upsert_sync_state(&state).await.unwrap();

        let err = driver.backfill(WALLET, None).await.unwrap_err();
        assert!(matches!(err, IndexerError::UpstreamPermanent { .. }));
    }

    #[tokio::test]
    async fn test_max_pages_cap_keeps_cursor() {
        let (driver, _provider, store) = driver_with(vec![
            Ok(page(vec![native_tx("sig2", 1001, WALLET, 1_000_000)])),
            Ok(page(vec![native_tx("sig1", 1000, WALLET, 1_000_000)])),
        ]);

        let stats = driver.backfill(WALLET, Some(1)).await.unwrap();
        assert_eq!(stats.pages_fetched, 1);

        // The cursor survives so the next run resumes where this one stopped.
        let state = store.sync_state(WALLET).await.unwrap().unwrap();
        assert_eq!(state.last_before, Some("sig2".to_string()));
    }

    #[tokio::test]
    async fn test_sync_tail_requires_backfill() {
        let (driver, _provider, _store) = driver_with(vec![]);
        let err = driver.sync_tail(WALLET).await.unwrap_err();
        assert!(matches!(err, IndexerError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn test_sync_tail_stops_at_existing_signature() {
        let (driver, _provider, store) = driver_with(vec![Ok(page(vec![
            native_tx("new_sig_1", 1003, WALLET, 1_000_000),
            native_tx("new_sig_2", 1002, WALLET, 1_000_000),
            native_tx("existing_sig", 1001, WALLET, 1_000_000),
            native_tx("old_sig", 1000, WALLET, 1_000_000),
        ]))]);

        let mut state = SyncState::new(WALLET);
        state.last_before = Some("old_cursor".to_string());
        state.verified_slot = Some(1000);
        store.upsert_sync_state(&state).await.unwrap();
        store
            .upsert_raw_transactions(&[RawTransaction {
                signature: "existing_sig".to_string(),
                slot: 1001,
                block_time: Some(1_700_001_001),
                payload: serde_json::json!({}),
            }])
            .await
            .unwrap();

        let stats = driver.sync_tail(WALLET).await.unwrap();
        assert_eq!(stats.pages_fetched, 1);
        assert_eq!(stats.raw_tx_count, 2);
        assert!(store.has_raw_transaction("new_sig_1").await.unwrap());
        assert!(store.has_raw_transaction("new_sig_2").await.unwrap());
        // The stopper cut the walk before old_sig was ever looked at.
        assert!(!store.has_raw_transaction("old_sig").await.unwrap());

        let state = store.sync_state(WALLET).await.unwrap().unwrap();
        assert_eq!(state.verified_slot, Some(1003));
    }

    #[tokio::test]
    async fn test_invalid_wallet_rejected_before_any_mutation() {
        let (driver, provider, store) = driver_with(vec![]);
        let err = driver.backfill("not-base58!", None).await.unwrap_err();
        assert!(matches!(err, IndexerError::InvalidInput(_)));
        assert!(provider.recorded_calls().is_empty());
        assert!(store.sync_state("not-base58!").await.unwrap().is_none());
    }
}
