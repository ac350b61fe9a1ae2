/// In-memory store
/// Backs local runs without a DATABASE_URL and the test suite. Same upsert
/// semantics as the Postgres backend.
use crate::core::errors::Result;
use crate::price::types::{Candle, Resolution};
use crate::storage::types::{
    RawTransaction, ReconcileAudit, SyncState, TokenMeta, WalletEvent,
};
use crate::storage::IndexerStore;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    raw_transactions: DashMap<String, RawTransaction>,
    wallet_events: DashMap<(String, String, u32), WalletEvent>,
    sync_states: DashMap<String, SyncState>,
    reconcile_audits: Mutex<Vec<ReconcileAudit>>,
    token_meta: DashMap<String, TokenMeta>,
    candles: DashMap<(String, &'static str, i64), Candle>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexerStore for MemoryStore {
    async fn upsert_raw_transactions(&self, txs: &[RawTransaction]) -> Result<()> {
        for tx in txs {
            self.raw_transactions
                .insert(tx.signature.clone(), tx.clone());
        }
        Ok(())
    }

    async fn has_raw_transaction(&self, signature: &str) -> Result<bool> {
        Ok(self.raw_transactions.contains_key(signature))
    }

    async fn raw_signatures_in_slot_range(
        &self,
        from_slot: u64,
        to_slot: u64,
    ) -> Result<Vec<String>> {
        let mut signatures: Vec<String> = self
            .raw_transactions
            .iter()
            .filter(|entry| entry.slot >= from_slot && entry.slot <= to_slot)
            .map(|entry| entry.signature.clone())
            .collect();
        signatures.sort();
        Ok(signatures)
    }

    async fn count_raw_transactions(&self) -> Result<u64> {
        Ok(self.raw_transactions.len() as u64)
    }

    async fn upsert_wallet_events(&self, events: &[WalletEvent]) -> Result<()> {
        for event in events {
            let key = (event.wallet.clone(), event.signature.clone(), event.index);
            self.wallet_events.insert(key, event.clone());
        }
        Ok(())
    }

    async fn wallet_events(&self, wallet: &str) -> Result<Vec<WalletEvent>> {
        let mut events: Vec<WalletEvent> = self
            .wallet_events
            .iter()
            .filter(|entry| entry.wallet == wallet)
            .map(|entry| entry.value().clone())
            .collect();
        events.sort_by_key(|e| (e.block_time, e.index));
        Ok(events)
    }

    async fn count_wallet_events(&self, wallet: &str) -> Result<u64> {
        Ok(self
            .wallet_events
            .iter()
            .filter(|entry| entry.wallet == wallet)
            .count() as u64)
    }

    async fn count_wallet_events_in_slot_range(
        &self,
        wallet: &str,
        from_slot: u64,
        to_slot: u64,
    ) -> Result<u64> {
        Ok(self
            .wallet_events
            .iter()
            .filter(|entry| {
                entry.wallet == wallet && entry.slot >= from_slot && entry.slot <= to_slot
            })
            .count() as u64)
    }

    async fn sync_state(&self, wallet: &str) -> Result<Option<SyncState>> {
        Ok(self.sync_states.get(wallet).map(|entry| entry.clone()))
    }

    async fn upsert_sync_state(&self, state: &SyncState) -> Result<()> {
        self.sync_states
            .insert(state.wallet.clone(), state.clone());
        Ok(())
    }

    async fn append_reconcile_audit(&self, audit: &ReconcileAudit) -> Result<()> {
        self.reconcile_audits.lock().unwrap().push(audit.clone());
        Ok(())
    }

    async fn last_reconcile_audit(&self, wallet: &str) -> Result<Option<ReconcileAudit>> {
        Ok(self
            .reconcile_audits
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|audit| audit.wallet == wallet)
            .cloned())
    }

    async fn token_meta(&self, mint: &str) -> Result<Option<TokenMeta>> {
        Ok(self.token_meta.get(mint).map(|entry| entry.clone()))
    }

    async fn upsert_token_meta(&self, meta: &TokenMeta) -> Result<()> {
        self.token_meta.insert(meta.mint.clone(), meta.clone());
        Ok(())
    }

    async fn candles(
        &self,
        mint: &str,
        resolution: Resolution,
        start: i64,
        end: i64,
    ) -> Result<Vec<Candle>> {
        let mut out: Vec<Candle> = self
            .candles
            .iter()
            .filter(|entry| {
                let (m, res, t) = entry.key();
                m == mint && *res == resolution.as_str() && *t >= start && *t <= end
            })
            .map(|entry| *entry.value())
            .collect();
        out.sort_by_key(|c| c.t);
        Ok(out)
    }

    async fn put_candles(
        &self,
        mint: &str,
        resolution: Resolution,
        candles: &[Candle],
    ) -> Result<()> {
        for candle in candles {
            self.candles.insert(
                (mint.to_string(), resolution.as_str(), candle.t),
                *candle,
            );
        }
        Ok(())
    }
}
