/// Reconciliation Auditor
/// Independently re-fetches a slot window from the provider, diffs the
/// observed signature set against the store, repairs gaps, and records an
/// append-only audit row
use crate::core::errors::{IndexerError, Result};
use crate::ingest::driver::IngestionDriver;
use crate::provider::types::PageItem;
use crate::provider::TransactionProvider;
use crate::storage::types::ReconcileAudit;
use crate::storage::IndexerStore;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

const CHUNK_SLOTS: u64 = 1_000;
const CHUNK_PAUSE_MS: u64 = 250;
/// Backstop against a provider that never pages below the window.
const MAX_RECONCILE_PAGES: usize = 1_000;

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileResult {
    pub wallet: String,
    pub from_slot: u64,
    pub to_slot: u64,
    pub provider_count: u64,
    pub stored_count: u64,
    pub event_count: u64,
    pub missing_signatures: Vec<String>,
    pub signature_set_hash: String,
    pub ok: bool,
}

pub struct ReconcileAuditor {
    provider: Arc<dyn TransactionProvider>,
    store: Arc<dyn IndexerStore>,
    driver: Arc<IngestionDriver>,
}

impl ReconcileAuditor {
    pub fn new(
        provider: Arc<dyn TransactionProvider>,
        store: Arc<dyn IndexerStore>,
        driver: Arc<IngestionDriver>,
    ) -> Self {
        Self {
            provider,
            store,
            driver,
        }
    }

    /// Verify (and repair) one slot window. The audit row is appended
    /// strictly after any repair writes; a failed pass still records an
    /// audit with `ok = false` where possible.
    pub async fn reconcile_slot_range(
        &self,
        wallet: &str,
        from_slot: u64,
        to_slot: u64,
    ) -> Result<ReconcileResult> {
        match self.reconcile_inner(wallet, from_slot, to_slot).await {
            Ok(result) => Ok(result),
            Err(e) => {
                let audit = ReconcileAudit {
                    wallet: wallet.to_string(),
                    from_slot,
                    to_slot,
                    count_raw: 0,
                    count_wallet_tx: 0,
                    signature_set_hash: String::new(),
                    ok: false,
                    created_at: Utc::now(),
                };
                if let Err(audit_err) = self.store.append_reconcile_audit(&audit).await {
                    warn!("Failed to record failure audit: {}", audit_err);
                }
                Err(e)
            }
        }
    }

    async fn reconcile_inner(
        &self,
        wallet: &str,
        from_slot: u64,
        to_slot: u64,
    ) -> Result<ReconcileResult> {
        // Re-fetch from the provider until we have paged past the window.
        let mut observed: Vec<PageItem> = Vec::new();
        let mut before: Option<String> = None;
        for _ in 0..MAX_RECONCILE_PAGES {
            let page = self.provider.fetch_page(wallet, before.as_deref()).await?;
            if page.items.is_empty() {
                break;
            }
            let page_min = page.min_slot();
            observed.extend(
                page.items
                    .iter()
                    .filter(|item| item.tx.slot >= from_slot && item.tx.slot <= to_slot)
                    .cloned(),
            );
            if page_min.map(|s| s < from_slot).unwrap_or(false) {
                break;
            }
            before = page.next_before();
        }

        let provider_signatures: HashSet<String> = observed
            .iter()
            .map(|item| item.tx.signature.clone())
            .collect();

        let stored = self
            .store
            .raw_signatures_in_slot_range(from_slot, to_slot)
            .await?;
        let stored_set: HashSet<String> = stored.iter().cloned().collect();

        let missing_signatures: Vec<String> = {
            let mut missing: Vec<String> = provider_signatures
                .difference(&stored_set)
                .cloned()
                .collect();
            missing.sort();
            missing
        };

        if !missing_signatures.is_empty() {
            warn!(
                "Reconcile {} [{}, {}]: repairing {} missing transactions",
                wallet,
                from_slot,
                to_slot,
                missing_signatures.len()
            );
            let to_ingest: Vec<PageItem> = observed
                .iter()
                .filter(|item| missing_signatures.contains(&item.tx.signature))
                .cloned()
                .collect();
            self.driver.persist_items(wallet, &to_ingest).await?;
        }

        let stored_after = self
            .store
            .raw_signatures_in_slot_range(from_slot, to_slot)
            .await?;
        let stored_after_set: HashSet<String> = stored_after.iter().cloned().collect();
        let event_count = self
            .store
            .count_wallet_events_in_slot_range(wallet, from_slot, to_slot)
            .await?;

        let provider_hash = signature_set_hash(&provider_signatures);
        let stored_hash = signature_set_hash(&stored_after_set);
        let still_missing = provider_signatures
            .difference(&stored_after_set)
            .next()
            .is_some();
        let ok = provider_hash == stored_hash && !still_missing;

        let result = ReconcileResult {
            wallet: wallet.to_string(),
            from_slot,
            to_slot,
            provider_count: provider_signatures.len() as u64,
            stored_count: stored_after.len() as u64,
            event_count,
            missing_signatures,
            signature_set_hash: stored_hash.clone(),
            ok,
        };

        self.store
            .append_reconcile_audit(&ReconcileAudit {
                wallet: wallet.to_string(),
                from_slot,
                to_slot,
                count_raw: result.stored_count,
                count_wallet_tx: result.event_count,
                signature_set_hash: stored_hash,
                ok,
                created_at: Utc::now(),
            })
            .await?;

        info!(
            "Reconcile {} [{}, {}]: provider {} stored {} ok={}",
            wallet, from_slot, to_slot, result.provider_count, result.stored_count, ok
        );
        Ok(result)
    }

    /// Re-verify the window trailing the tail sync's verified slot, in
    /// 1000-slot chunks with a pause between chunks so other tenants keep
    /// some provider budget.
    pub async fn reconcile_recent_slots(
        &self,
        wallet: &str,
        window_size: u64,
    ) -> Result<Vec<ReconcileResult>> {
        let state = self.store.sync_state(wallet).await?;
        let verified_slot = state.and_then(|s| s.verified_slot).ok_or_else(|| {
            IndexerError::PreconditionFailed("no verified slot; run sync-tail first".to_string())
        })?;

        let window_start = verified_slot.saturating_sub(window_size);
        let mut results = Vec::new();
        let mut chunk_start = window_start;
        while chunk_start <= verified_slot {
            let chunk_end = (chunk_start + CHUNK_SLOTS - 1).min(verified_slot);
            results.push(
                self.reconcile_slot_range(wallet, chunk_start, chunk_end)
                    .await?,
            );
            chunk_start = chunk_end + 1;
            if chunk_start <= verified_slot {
                sleep(Duration::from_millis(CHUNK_PAUSE_MS)).await;
            }
        }
        Ok(results)
    }
}

/// SHA-256 over the lexicographically sorted signature set, joined with
/// nothing in between.
fn signature_set_hash(signatures: &HashSet<String>) -> String {
    let mut sorted: Vec<&String> = signatures.iter().collect();
    sorted.sort();
    let mut hasher = Sha256::new();
    for signature in sorted {
        hasher.update(signature.as_bytes());
    }
    hex::encode(hasher.finalize())
}
