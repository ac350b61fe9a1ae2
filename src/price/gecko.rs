/// GeckoTerminal price oracle (oracle-B)
/// Keyless fallback: OHLCV comes from the token's deepest pool
use crate::core::errors::{IndexerError, Result};
use crate::price::types::{Candle, Resolution};
use crate::price::PriceOracle;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tracing::warn;

const DEFAULT_BASE_URL: &str = "https://api.geckoterminal.com/api/v2";

pub struct GeckoTerminalOracle {
    base_url: String,
    http_client: reqwest::Client,
    /// mint -> pool address of its top pool
    pool_cache: DashMap<String, String>,
}

impl GeckoTerminalOracle {
    pub fn new(timeout_ms: u64) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            http_client,
            pool_cache: DashMap::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// (timeframe path segment, aggregate) per resolution.
    fn timeframe(resolution: Resolution) -> (&'static str, u32) {
        match resolution {
            Resolution::OneMinute => ("minute", 1),
            Resolution::FiveMinutes => ("minute", 5),
            Resolution::OneHour => ("hour", 1),
            Resolution::OneDay => ("day", 1),
        }
    }

    async fn top_pool(&self, mint: &str) -> Option<String> {
        if let Some(pool) = self.pool_cache.get(mint) {
            return Some(pool.clone());
        }

        let url = format!("{}/networks/solana/tokens/{}/pools?page=1", self.base_url, mint);
        let body: serde_json::Value = match self.http_client.get(&url).send().await {
            Ok(r) if r.status().is_success() => r.json().await.ok()?,
            Ok(r) => {
                warn!("GeckoTerminal pools HTTP {} for {}", r.status(), mint);
                return None;
            }
            Err(e) => {
                warn!("GeckoTerminal pools request failed for {}: {}", mint, e);
                return None;
            }
        };

        let pool = body
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|pools| pools.first())
            .and_then(|p| p.get("attributes"))
            .and_then(|a| a.get("address"))
            .and_then(|a| a.as_str())?
            .to_string();

        self.pool_cache.insert(mint.to_string(), pool.clone());
        Some(pool)
    }
}

#[async_trait]
impl PriceOracle for GeckoTerminalOracle {
    async fn get_candles(
        &self,
        mint: &str,
        start: i64,
        end: i64,
        resolution: Resolution,
    ) -> Result<Vec<Candle>> {
        let unknown = || IndexerError::OracleUnknown {
            mint: mint.to_string(),
            start,
            end,
        };

        let pool = self.top_pool(mint).await.ok_or_else(unknown)?;
        let (timeframe, aggregate) = Self::timeframe(resolution);
        let limit = ((end - start) / resolution.seconds() + 1).clamp(1, 1000);
        let url = format!(
            "{}/networks/solana/pools/{}/ohlcv/{}?aggregate={}&before_timestamp={}&limit={}&currency=usd",
            self.base_url, pool, timeframe, aggregate, end, limit
        );

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                warn!("GeckoTerminal OHLCV request failed for {}: {}", mint, e);
                unknown()
            })?;

        if !response.status().is_success() {
            warn!("GeckoTerminal OHLCV HTTP {} for {}", response.status(), mint);
            return Err(unknown());
        }

        let body: serde_json::Value = response.json().await.map_err(|_| unknown())?;

        // ohlcv_list entries are [ts, open, high, low, close, volume], newest-first.
        let list = body
            .get("data")
            .and_then(|d| d.get("attributes"))
            .and_then(|a| a.get("ohlcv_list"))
            .and_then(|l| l.as_array())
            .cloned()
            .unwrap_or_default();

        let mut candles: Vec<Candle> = list
            .iter()
            .filter_map(|row| {
                let row = row.as_array()?;
                Some(Candle {
                    t: row.first()?.as_i64()?,
                    open: row.get(1)?.as_f64()?,
                    high: row.get(2)?.as_f64()?,
                    low: row.get(3)?.as_f64()?,
                    close: row.get(4)?.as_f64()?,
                })
            })
            .filter(|c| c.t >= start && c.t <= end)
            .collect();
        candles.sort_by_key(|c| c.t);
        Ok(candles)
    }

    async fn get_current_price_usd(&self, mint: &str) -> Result<Option<f64>> {
        let url = format!("{}/networks/solana/tokens/{}", self.base_url, mint);

        let body: serde_json::Value = match self.http_client.get(&url).send().await {
            Ok(r) if r.status().is_success() => match r.json().await {
                Ok(v) => v,
                Err(_) => return Ok(None),
            },
            Ok(r) => {
                warn!("GeckoTerminal token HTTP {} for {}", r.status(), mint);
                return Ok(None);
            }
            Err(e) => {
                warn!("GeckoTerminal token request failed for {}: {}", mint, e);
                return Ok(None);
            }
        };

        // price_usd arrives as a string.
        Ok(body
            .get("data")
            .and_then(|d| d.get("attributes"))
            .and_then(|a| a.get("price_usd"))
            .and_then(|p| p.as_str())
            .and_then(|p| p.parse::<f64>().ok()))
    }
}
