/// PostgreSQL store backend
/// Hand-written SQL; every write is an upsert on the documented unique key
use crate::core::errors::{IndexerError, Result};
use crate::price::types::{Candle, Resolution};
use crate::storage::types::{
    EventDirection, EventSide, MetaSource, RawTransaction, ReconcileAudit, SyncState, TokenMeta,
    WalletEvent,
};
use crate::storage::IndexerStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio_postgres::{Client, NoTls};

pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| IndexerError::Store(format!("Failed to connect: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Database connection error: {}", e);
            }
        });

        let store = Self { client };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS raw_transactions (
                signature TEXT PRIMARY KEY,
                slot BIGINT NOT NULL,
                block_time BIGINT,
                payload JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            "CREATE INDEX IF NOT EXISTS idx_raw_transactions_slot ON raw_transactions(slot)",
            "CREATE TABLE IF NOT EXISTS wallet_events (
                wallet TEXT NOT NULL,
                signature TEXT NOT NULL,
                idx INTEGER NOT NULL,
                slot BIGINT NOT NULL,
                block_time BIGINT NOT NULL,
                program TEXT,
                side TEXT NOT NULL,
                direction TEXT NOT NULL,
                token_mint TEXT NOT NULL,
                token_symbol TEXT NOT NULL,
                token_decimals INTEGER NOT NULL,
                amount_raw TEXT NOT NULL,
                amount_ui NUMERIC NOT NULL,
                amount_usd NUMERIC,
                price_usd_at_tx NUMERIC,
                link_id TEXT,
                fee_base_units BIGINT,
                metadata TEXT,
                PRIMARY KEY (wallet, signature, idx)
            )",
            "CREATE INDEX IF NOT EXISTS idx_wallet_events_wallet_slot ON wallet_events(wallet, slot)",
            "CREATE TABLE IF NOT EXISTS sync_state (
                wallet TEXT PRIMARY KEY,
                last_before TEXT,
                verified_slot BIGINT,
                full_scan_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            "CREATE TABLE IF NOT EXISTS reconcile_audits (
                id BIGSERIAL PRIMARY KEY,
                wallet TEXT NOT NULL,
                from_slot BIGINT NOT NULL,
                to_slot BIGINT NOT NULL,
                count_raw BIGINT NOT NULL,
                count_wallet_tx BIGINT NOT NULL,
                signature_set_hash TEXT NOT NULL,
                ok BOOLEAN NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            "CREATE INDEX IF NOT EXISTS idx_reconcile_audits_wallet ON reconcile_audits(wallet, created_at DESC)",
            "CREATE TABLE IF NOT EXISTS token_meta (
                mint TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                name TEXT,
                decimals INTEGER NOT NULL,
                source TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            "CREATE TABLE IF NOT EXISTS candles (
                mint TEXT NOT NULL,
                resolution TEXT NOT NULL,
                t BIGINT NOT NULL,
                open DOUBLE PRECISION NOT NULL,
                high DOUBLE PRECISION NOT NULL,
                low DOUBLE PRECISION NOT NULL,
                close DOUBLE PRECISION NOT NULL,
                PRIMARY KEY (mint, resolution, t)
            )",
        ];

        for sql in statements {
            self.client
                .execute(sql, &[])
                .await
                .map_err(|e| IndexerError::Store(format!("Schema init failed: {}", e)))?;
        }
        Ok(())
    }
}

#[async_trait]
impl IndexerStore for PostgresStore {
    async fn upsert_raw_transactions(&self, txs: &[RawTransaction]) -> Result<()> {
        for tx in txs {
            self.client
                .execute(
                    "INSERT INTO raw_transactions (signature, slot, block_time, payload)
                     VALUES ($1, $2, $3, ($4::text)::jsonb)
                     ON CONFLICT (signature) DO UPDATE SET
                        slot = EXCLUDED.slot,
                        block_time = EXCLUDED.block_time,
                        payload = EXCLUDED.payload,
                        updated_at = NOW()",
                    &[
                        &tx.signature,
                        &(tx.slot as i64),
                        &tx.block_time,
                        &tx.payload.to_string(),
                    ],
                )
                .await
                .map_err(|e| {
                    IndexerError::Store(format!("Failed to upsert raw transaction: {}", e))
                })?;
        }
        Ok(())
    }

    async fn has_raw_transaction(&self, signature: &str) -> Result<bool> {
        let row = self
            .client
            .query_opt(
                "SELECT 1 FROM raw_transactions WHERE signature = $1",
                &[&signature],
            )
            .await
            .map_err(|e| IndexerError::Store(format!("Failed to look up signature: {}", e)))?;
        Ok(row.is_some())
    }

    async fn raw_signatures_in_slot_range(
        &self,
        from_slot: u64,
        to_slot: u64,
    ) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT signature FROM raw_transactions
                 WHERE slot >= $1 AND slot <= $2
                 ORDER BY signature",
                &[&(from_slot as i64), &(to_slot as i64)],
            )
            .await
            .map_err(|e| IndexerError::Store(format!("Failed to query slot range: {}", e)))?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn count_raw_transactions(&self) -> Result<u64> {
        let row = self
            .client
            .query_one("SELECT COUNT(*) FROM raw_transactions", &[])
            .await
            .map_err(|e| IndexerError::Store(format!("Failed to count transactions: {}", e)))?;
        Ok(row.get::<_, i64>(0) as u64)
    }

    async fn upsert_wallet_events(&self, events: &[WalletEvent]) -> Result<()> {
        for event in events {
            self.client
                .execute(
                    "INSERT INTO wallet_events (wallet, signature, idx, slot, block_time, program,
                        side, direction, token_mint, token_symbol, token_decimals,
                        amount_raw, amount_ui, amount_usd, price_usd_at_tx,
                        link_id, fee_base_units, metadata)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
                     ON CONFLICT (wallet, signature, idx) DO UPDATE SET
                        slot = EXCLUDED.slot,
                        block_time = EXCLUDED.block_time,
                        program = EXCLUDED.program,
                        side = EXCLUDED.side,
                        direction = EXCLUDED.direction,
                        token_mint = EXCLUDED.token_mint,
                        token_symbol = EXCLUDED.token_symbol,
                        token_decimals = EXCLUDED.token_decimals,
                        amount_raw = EXCLUDED.amount_raw,
                        amount_ui = EXCLUDED.amount_ui,
                        amount_usd = EXCLUDED.amount_usd,
                        price_usd_at_tx = EXCLUDED.price_usd_at_tx,
                        link_id = EXCLUDED.link_id,
                        fee_base_units = EXCLUDED.fee_base_units,
                        metadata = EXCLUDED.metadata",
                    &[
                        &event.wallet,
                        &event.signature,
                        &(event.index as i32),
                        &(event.slot as i64),
                        &event.block_time,
                        &event.program,
                        &event.side.as_str(),
                        &event.direction.as_str(),
                        &event.token_mint,
                        &event.token_symbol,
                        &(event.token_decimals as i32),
                        &event.amount_raw,
                        &event.amount_ui,
                        &event.amount_usd,
                        &event.price_usd_at_tx,
                        &event.link_id,
                        &event.fee_base_units.map(|f| f as i64),
                        &event.metadata,
                    ],
                )
                .await
                .map_err(|e| IndexerError::Store(format!("Failed to upsert event: {}", e)))?;
        }
        Ok(())
    }

    async fn wallet_events(&self, wallet: &str) -> Result<Vec<WalletEvent>> {
        let rows = self
            .client
            .query(
                "SELECT wallet, signature, idx, slot, block_time, program, side, direction,
                        token_mint, token_symbol, token_decimals, amount_raw, amount_ui,
                        amount_usd, price_usd_at_tx, link_id, fee_base_units, metadata
                 FROM wallet_events
                 WHERE wallet = $1
                 ORDER BY block_time ASC, idx ASC",
                &[&wallet],
            )
            .await
            .map_err(|e| IndexerError::Store(format!("Failed to load events: {}", e)))?;

        Ok(rows
            .iter()
            .map(|row| WalletEvent {
                wallet: row.get(0),
                signature: row.get(1),
                index: row.get::<_, i32>(2) as u32,
                slot: row.get::<_, i64>(3) as u64,
                block_time: row.get(4),
                program: row.get(5),
                side: EventSide::parse(row.get(6)),
                direction: EventDirection::parse(row.get(7)),
                token_mint: row.get(8),
                token_symbol: row.get(9),
                token_decimals: row.get::<_, i32>(10) as u8,
                amount_raw: row.get(11),
                amount_ui: row.get::<_, Decimal>(12),
                amount_usd: row.get(13),
                price_usd_at_tx: row.get(14),
                link_id: row.get(15),
                fee_base_units: row.get::<_, Option<i64>>(16).map(|f| f as u64),
                metadata: row.get(17),
            })
            .collect())
    }

    async fn count_wallet_events(&self, wallet: &str) -> Result<u64> {
        let row = self
            .client
            .query_one(
                "SELECT COUNT(*) FROM wallet_events WHERE wallet = $1",
                &[&wallet],
            )
            .await
            .map_err(|e| IndexerError::Store(format!("Failed to count events: {}", e)))?;
        Ok(row.get::<_, i64>(0) as u64)
    }

    async fn count_wallet_events_in_slot_range(
        &self,
        wallet: &str,
        from_slot: u64,
        to_slot: u64,
    ) -> Result<u64> {
        let row = self
            .client
            .query_one(
                "SELECT COUNT(*) FROM wallet_events
                 WHERE wallet = $1 AND slot >= $2 AND slot <= $3",
                &[&wallet, &(from_slot as i64), &(to_slot as i64)],
            )
            .await
            .map_err(|e| IndexerError::Store(format!("Failed to count events: {}", e)))?;
        Ok(row.get::<_, i64>(0) as u64)
    }

    async fn sync_state(&self, wallet: &str) -> Result<Option<SyncState>> {
        let row = self
            .client
            .query_opt(
                "SELECT wallet, last_before, verified_slot, full_scan_at, created_at, updated_at
                 FROM sync_state WHERE wallet = $1",
                &[&wallet],
            )
            .await
            .map_err(|e| IndexerError::Store(format!("Failed to load sync state: {}", e)))?;

        Ok(row.map(|row| SyncState {
            wallet: row.get(0),
            last_before: row.get(1),
            verified_slot: row.get::<_, Option<i64>>(2).map(|s| s as u64),
            full_scan_at: row.get(3),
            created_at: row.get::<_, DateTime<Utc>>(4),
            updated_at: row.get::<_, DateTime<Utc>>(5),
        }))
    }

    async fn upsert_sync_state(&self, state: &SyncState) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO sync_state (wallet, last_before, verified_slot, full_scan_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (wallet) DO UPDATE SET
                    last_before = EXCLUDED.last_before,
                    verified_slot = EXCLUDED.verified_slot,
                    full_scan_at = EXCLUDED.full_scan_at,
                    updated_at = NOW()",
                &[
                    &state.wallet,
                    &state.last_before,
                    &state.verified_slot.map(|s| s as i64),
                    &state.full_scan_at,
                ],
            )
            .await
            .map_err(|e| IndexerError::Store(format!("Failed to upsert sync state: {}", e)))?;
        Ok(())
    }

    async fn append_reconcile_audit(&self, audit: &ReconcileAudit) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO reconcile_audits
                    (wallet, from_slot, to_slot, count_raw, count_wallet_tx, signature_set_hash, ok, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &audit.wallet,
                    &(audit.from_slot as i64),
                    &(audit.to_slot as i64),
                    &(audit.count_raw as i64),
                    &(audit.count_wallet_tx as i64),
                    &audit.signature_set_hash,
                    &audit.ok,
                    &audit.created_at,
                ],
            )
            .await
            .map_err(|e| IndexerError::Store(format!("Failed to append audit: {}", e)))?;
        Ok(())
    }

    async fn last_reconcile_audit(&self, wallet: &str) -> Result<Option<ReconcileAudit>> {
        let row = self
            .client
            .query_opt(
                "SELECT wallet, from_slot, to_slot, count_raw, count_wallet_tx,
                        signature_set_hash, ok, created_at
                 FROM reconcile_audits
                 WHERE wallet = $1
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1",
                &[&wallet],
            )
            .await
            .map_err(|e| IndexerError::Store(format!("Failed to load audit: {}", e)))?;

        Ok(row.map(|row| ReconcileAudit {
            wallet: row.get(0),
            from_slot: row.get::<_, i64>(1) as u64,
            to_slot: row.get::<_, i64>(2) as u64,
            count_raw: row.get::<_, i64>(3) as u64,
            count_wallet_tx: row.get::<_, i64>(4) as u64,
            signature_set_hash: row.get(5),
            ok: row.get(6),
            created_at: row.get::<_, DateTime<Utc>>(7),
        }))
    }

    async fn token_meta(&self, mint: &str) -> Result<Option<TokenMeta>> {
        let row = self
            .client
            .query_opt(
                "SELECT mint, symbol, name, decimals, source FROM token_meta WHERE mint = $1",
                &[&mint],
            )
            .await
            .map_err(|e| IndexerError::Store(format!("Failed to load token meta: {}", e)))?;

        Ok(row.map(|row| TokenMeta {
            mint: row.get(0),
            symbol: row.get(1),
            name: row.get(2),
            decimals: row.get::<_, i32>(3) as u8,
            source: MetaSource::parse(row.get(4)),
        }))
    }

    async fn upsert_token_meta(&self, meta: &TokenMeta) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO token_meta (mint, symbol, name, decimals, source)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (mint) DO UPDATE SET
                    symbol = EXCLUDED.symbol,
                    name = EXCLUDED.name,
                    decimals = EXCLUDED.decimals,
                    source = EXCLUDED.source,
                    updated_at = NOW()",
                &[
                    &meta.mint,
                    &meta.symbol,
                    &meta.name,
                    &(meta.decimals as i32),
                    &meta.source.as_str(),
                ],
            )
            .await
            .map_err(|e| IndexerError::Store(format!("Failed to upsert token meta: {}", e)))?;
        Ok(())
    }

    async fn candles(
        &self,
        mint: &str,
        resolution: Resolution,
        start: i64,
        end: i64,
    ) -> Result<Vec<Candle>> {
        let rows = self
            .client
            .query(
                "SELECT t, open, high, low, close FROM candles
                 WHERE mint = $1 AND resolution = $2 AND t >= $3 AND t <= $4
                 ORDER BY t ASC",
                &[&mint, &resolution.as_str(), &start, &end],
            )
            .await
            .map_err(|e| IndexerError::Store(format!("Failed to load candles: {}", e)))?;

        Ok(rows
            .iter()
            .map(|row| Candle {
                t: row.get(0),
                open: row.get(1),
                high: row.get(2),
                low: row.get(3),
                close: row.get(4),
            })
            .collect())
    }

    async fn put_candles(
        &self,
        mint: &str,
        resolution: Resolution,
        candles: &[Candle],
    ) -> Result<()> {
        for candle in candles {
            self.client
                .execute(
                    "INSERT INTO candles (mint, resolution, t, open, high, low, close)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     ON CONFLICT (mint, resolution, t) DO UPDATE SET
                        open = EXCLUDED.open,
                        high = EXCLUDED.high,
                        low = EXCLUDED.low,
                        close = EXCLUDED.close",
                    &[
                        &mint,
                        &resolution.as_str(),
                        &candle.t,
                        &candle.open,
                        &candle.high,
                        &candle.low,
                        &candle.close,
                    ],
                )
                .await
                .map_err(|e| IndexerError::Store(format!("Failed to upsert candle: {}", e)))?;
        }
        Ok(())
    }
}
