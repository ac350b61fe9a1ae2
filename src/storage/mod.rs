/// Storage layer - durable store trait plus Postgres and in-memory backends
use crate::core::errors::Result;
use crate::price::types::{Candle, Resolution};
use async_trait::async_trait;

pub mod memory;
pub mod postgres;
pub mod types;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use types::{
    EventDirection, EventSide, MetaSource, RawTransaction, ReconcileAudit, SyncState, TokenMeta,
    WalletEvent,
};

/// The durable store. Every mutation is an upsert keyed on the documented
/// unique key, so repeated ingestion of the same data is a no-op on content.
#[async_trait]
pub trait IndexerStore: Send + Sync {
    async fn upsert_raw_transactions(&self, txs: &[RawTransaction]) -> Result<()>;
    async fn has_raw_transaction(&self, signature: &str) -> Result<bool>;
    async fn raw_signatures_in_slot_range(
        &self,
        from_slot: u64,
        to_slot: u64,
    ) -> Result<Vec<String>>;
    async fn count_raw_transactions(&self) -> Result<u64>;

    async fn upsert_wallet_events(&self, events: &[WalletEvent]) -> Result<()>;
    /// The wallet's full ledger, ascending by `(block_time, index)`.
    async fn wallet_events(&self, wallet: &str) -> Result<Vec<WalletEvent>>;
    async fn count_wallet_events(&self, wallet: &str) -> Result<u64>;
    async fn count_wallet_events_in_slot_range(
        &self,
        wallet: &str,
        from_slot: u64,
        to_slot: u64,
    ) -> Result<u64>;

    async fn sync_state(&self, wallet: &str) -> Result<Option<SyncState>>;
    async fn upsert_sync_state(&self, state: &SyncState) -> Result<()>;

    async fn append_reconcile_audit(&self, audit: &ReconcileAudit) -> Result<()>;
    async fn last_reconcile_audit(&self, wallet: &str) -> Result<Option<ReconcileAudit>>;

    async fn token_meta(&self, mint: &str) -> Result<Option<TokenMeta>>;
    async fn upsert_token_meta(&self, meta: &TokenMeta) -> Result<()>;

    async fn candles(
        &self,
        mint: &str,
        resolution: Resolution,
        start: i64,
        end: i64,
    ) -> Result<Vec<Candle>>;
    async fn put_candles(
        &self,
        mint: &str,
        resolution: Resolution,
        candles: &[Candle],
    ) -> Result<()>;
}
