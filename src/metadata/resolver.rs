/// Token Metadata Resolver
/// Resolves `{symbol, decimals}` for mint addresses. Never fails: sources
/// are tried in order and every requested mint receives at least a derived
/// fallback entry
use crate::core::work_queue::WorkQueue;
use crate::price::types::{NATIVE_DECIMALS, NATIVE_MINT};
use crate::storage::types::{MetaSource, TokenMeta};
use crate::storage::IndexerStore;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const HELIUS_METADATA_URL: &str = "https://api.helius.xyz/v0/token-metadata";
const JUPITER_TOKEN_URL: &str = "https://tokens.jup.ag/token";

/// Mints every Solana wallet touches sooner or later.
const WELL_KNOWN: &[(&str, &str, &str, u8)] = &[
    (NATIVE_MINT, "SOL", "Wrapped SOL", NATIVE_DECIMALS),
    ("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", "USDC", "USD Coin", 6),
    ("Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB", "USDT", "Tether USD", 6),
    ("DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263", "BONK", "Bonk", 5),
    ("4k3Dyjzvzp8eMZWUXbBCjEvwSkkk59S5iCNLY3QrkX6R", "RAY", "Raydium", 6),
    ("orcaEKTdK7LKz57vaAYr9QeNsVEPfiu6QeMU1kektZE", "ORCA", "Orca", 6),
    ("JUPyiwrYJFskUPiHa7hkeR8VUtAeFoSYbKedZNsDvCN", "JUP", "Jupiter", 6),
];

pub struct TokenMetadataResolver {
    http_client: reqwest::Client,
    helius_api_key: String,
    store: Arc<dyn IndexerStore>,
    cache: DashMap<String, TokenMeta>,
    queue: Arc<WorkQueue>,
}

impl TokenMetadataResolver {
    pub fn new(helius_api_key: String, store: Arc<dyn IndexerStore>, queue: Arc<WorkQueue>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build reqwest client");

        let resolver = Self {
            http_client,
            helius_api_key,
            store,
            cache: DashMap::new(),
            queue,
        };
        resolver.preload_well_known();
        resolver
    }

    fn preload_well_known(&self) {
        for (mint, symbol, name, decimals) in WELL_KNOWN {
            self.cache.insert(
                mint.to_string(),
                TokenMeta {
                    mint: mint.to_string(),
                    symbol: symbol.to_string(),
                    name: Some(name.to_string()),
                    decimals: *decimals,
                    source: MetaSource::Local,
                },
            );
        }
    }

    /// Resolve a batch of mints. Every input mint is present in the output.
    pub async fn batch(&self, mints: &[String]) -> HashMap<String, TokenMeta> {
        let mut resolved: HashMap<String, TokenMeta> = HashMap::new();
        let mut pending: Vec<String> = Vec::new();

        for mint in mints {
            if resolved.contains_key(mint) {
                continue;
            }
            if let Some(hit) = self.cache.get(mint) {
                resolved.insert(mint.clone(), hit.clone());
                continue;
            }
            match self.store.token_meta(mint).await {
                Ok(Some(meta)) => {
                    self.cache.insert(mint.clone(), meta.clone());
                    resolved.insert(mint.clone(), meta);
                }
                Ok(None) => pending.push(mint.clone()),
                Err(e) => {
                    warn!("Token meta lookup failed for {}: {}", mint, e);
                    pending.push(mint.clone());
                }
            }
        }

        if !pending.is_empty() {
            let from_helius = self.fetch_from_helius(&pending).await;
            for meta in from_helius {
                pending.retain(|m| *m != meta.mint);
                self.remember(&meta).await;
                resolved.insert(meta.mint.clone(), meta);
            }
        }

        if !pending.is_empty() {
            let from_jupiter = self.fetch_from_jupiter(&pending).await;
            for meta in from_jupiter {
                pending.retain(|m| *m != meta.mint);
                self.remember(&meta).await;
                resolved.insert(meta.mint.clone(), meta);
            }
        }

        // Whatever is still unresolved degrades to a derived entry; the
        // derived form is not persisted so a later run can still upgrade it.
        for mint in pending {
            let meta = derived_meta(&mint);
            self.cache.insert(mint.clone(), meta.clone());
            resolved.insert(mint, meta);
        }

        resolved
    }

    async fn remember(&self, meta: &TokenMeta) {
        self.cache.insert(meta.mint.clone(), meta.clone());
        if let Err(e) = self.store.upsert_token_meta(meta).await {
            warn!("Failed to persist token meta for {}: {}", meta.mint, e);
        }
    }

    /// Helius token-metadata API, one POST for the whole batch.
    async fn fetch_from_helius(&self, mints: &[String]) -> Vec<TokenMeta> {
        let url = format!("{}?api-key={}", HELIUS_METADATA_URL, self.helius_api_key);
        let body = serde_json::json!({
            "mintAccounts": mints,
            "includeOffChain": false,
        });

        let response = self
            .queue
            .run(|| async { self.http_client.post(&url).json(&body).send().await })
            .await;

        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!("Helius token-metadata returned HTTP {}", r.status());
                return Vec::new();
            }
            Err(e) => {
                warn!("Helius token-metadata request failed: {}", e);
                return Vec::new();
            }
        };

        let entries: Vec<serde_json::Value> = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!("Unparseable Helius token-metadata response: {}", e);
                return Vec::new();
            }
        };

        entries
            .iter()
            .filter_map(|entry| {
                let mint = entry.get("account")?.as_str()?.to_string();
                let legacy = entry.get("legacyMetadata");
                let on_chain = entry
                    .get("onChainMetadata")
                    .and_then(|m| m.get("metadata"))
                    .and_then(|m| m.get("data"));

                let symbol = legacy
                    .and_then(|l| l.get("symbol"))
                    .or_else(|| on_chain.and_then(|d| d.get("symbol")))
                    .and_then(|s| s.as_str())
                    .map(|s| s.trim_end_matches('\0').to_string())?;
                let name = legacy
                    .and_then(|l| l.get("name"))
                    .or_else(|| on_chain.and_then(|d| d.get("name")))
                    .and_then(|s| s.as_str())
                    .map(|s| s.trim_end_matches('\0').to_string());
                let decimals = legacy
                    .and_then(|l| l.get("decimals"))
                    .or_else(|| {
                        entry
                            .get("onChainAccountInfo")
                            .and_then(|i| i.get("accountInfo"))
                            .and_then(|i| i.get("data"))
                            .and_then(|d| d.get("parsed"))
                            .and_then(|p| p.get("info"))
                            .and_then(|i| i.get("decimals"))
                    })
                    .and_then(|d| d.as_u64())
                    .unwrap_or(9) as u8;

                Some(TokenMeta {
                    mint,
                    symbol,
                    name,
                    decimals,
                    source: MetaSource::Helius,
                })
            })
            .collect()
    }

    /// Jupiter token API, one GET per still-unresolved mint.
    async fn fetch_from_jupiter(&self, mints: &[String]) -> Vec<TokenMeta> {
        let mut out = Vec::new();
        for mint in mints {
            let url = format!("{}/{}", JUPITER_TOKEN_URL, mint);
            let response = self
                .queue
                .run(|| async { self.http_client.get(&url).send().await })
                .await;

            let entry: serde_json::Value = match response {
                Ok(r) if r.status().is_success() => match r.json().await {
                    Ok(v) => v,
                    Err(_) => continue,
                },
                _ => continue,
            };

            let (Some(symbol), Some(decimals)) = (
                entry.get("symbol").and_then(|s| s.as_str()),
                entry.get("decimals").and_then(|d| d.as_u64()),
            ) else {
                continue;
            };

            out.push(TokenMeta {
                mint: mint.clone(),
                symbol: symbol.to_string(),
                name: entry
                    .get("name")
                    .and_then(|n| n.as_str())
                    .map(|n| n.to_string()),
                decimals: decimals as u8,
                source: MetaSource::Jupiter,
            });
        }
        out
    }
}

/// Fallback entry when every upstream source came up empty.
pub fn derived_meta(mint: &str) -> TokenMeta {
    TokenMeta {
        mint: mint.to_string(),
        symbol: short_symbol(mint),
        name: None,
        decimals: 9,
        source: MetaSource::Derived,
    }
}

fn short_symbol(mint: &str) -> String {
    let head = &mint[..4.min(mint.len())];
    format!("{}...", head.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn resolver_with_memory_store() -> (TokenMetadataResolver, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let resolver = TokenMetadataResolver::new(
            "unused-key".to_string(),
            store.clone(),
            Arc::new(WorkQueue::new(4, 100)),
        );
        (resolver, store)
    }

    #[test]
    fn test_derived_symbol() {
        let meta = derived_meta("DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263");
        assert_eq!(meta.symbol, "DEZX...");
        assert_eq!(meta.decimals, 9);
        assert_eq!(meta.source, MetaSource::Derived);
    }

    #[tokio::test]
    async fn test_well_known_resolves_without_network() {
        let (resolver, _store) = resolver_with_memory_store();
        let out = resolver
            .batch(&["EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string()])
            .await;
        let usdc = &out["EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"];
        assert_eq!(usdc.symbol, "USDC");
        assert_eq!(usdc.decimals, 6);
        assert_eq!(usdc.source, MetaSource::Local);
    }

    #[tokio::test]
    async fn test_store_cache_short_circuits_upstream() {
        let (resolver, store) = resolver_with_memory_store();
        store
            .upsert_token_meta(&TokenMeta {
                mint: "MintCached11111111111111111111111111111111".to_string(),
                symbol: "CCH".to_string(),
                name: None,
                decimals: 4,
                source: MetaSource::Helius,
            })
            .await
            .unwrap();

        let out = resolver
            .batch(&["MintCached11111111111111111111111111111111".to_string()])
            .await;
        assert_eq!(out["MintCached11111111111111111111111111111111"].symbol, "CCH");
    }
}
