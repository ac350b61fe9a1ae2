/// Birdeye price oracle (oracle-A)
/// OHLCV history from /defi/ohlcv and spot prices from /defi/price
use crate::core::errors::{IndexerError, Result};
use crate::price::types::{Candle, Resolution};
use crate::price::PriceOracle;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

const DEFAULT_BASE_URL: &str = "https://public-api.birdeye.so";

pub struct BirdeyeOracle {
    base_url: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl BirdeyeOracle {
    pub fn new(api_key: String, timeout_ms: u64) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            http_client,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn interval_type(resolution: Resolution) -> &'static str {
        match resolution {
            Resolution::OneMinute => "1m",
            Resolution::FiveMinutes => "5m",
            Resolution::OneHour => "1H",
            Resolution::OneDay => "1D",
        }
    }
}

#[async_trait]
impl PriceOracle for BirdeyeOracle {
    async fn get_candles(
        &self,
        mint: &str,
        start: i64,
        end: i64,
        resolution: Resolution,
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/defi/ohlcv?address={}&type={}&time_from={}&time_to={}",
            self.base_url,
            mint,
            Self::interval_type(resolution),
            start,
            end
        );

        let response = self
            .http_client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .header("x-chain", "solana")
            .send()
            .await
            .map_err(|e| {
                warn!("Birdeye OHLCV request failed for {}: {}", mint, e);
                IndexerError::OracleUnknown {
                    mint: mint.to_string(),
                    start,
                    end,
                }
            })?;

        if !response.status().is_success() {
            warn!("Birdeye OHLCV HTTP {} for {}", response.status(), mint);
            return Err(IndexerError::OracleUnknown {
                mint: mint.to_string(),
                start,
                end,
            });
        }

        let body: serde_json::Value = response.json().await.map_err(|_| {
            IndexerError::OracleUnknown {
                mint: mint.to_string(),
                start,
                end,
            }
        })?;

        let items = body
            .get("data")
            .and_then(|d| d.get("items"))
            .and_then(|i| i.as_array())
            .cloned()
            .unwrap_or_default();

        let mut candles: Vec<Candle> = items
            .iter()
            .filter_map(|item| {
                Some(Candle {
                    t: item.get("unixTime")?.as_i64()?,
                    open: item.get("o")?.as_f64()?,
                    high: item.get("h")?.as_f64()?,
                    low: item.get("l")?.as_f64()?,
                    close: item.get("c")?.as_f64()?,
                })
            })
            .filter(|c| c.t >= start && c.t <= end)
            .collect();
        candles.sort_by_key(|c| c.t);
        Ok(candles)
    }

    async fn get_current_price_usd(&self, mint: &str) -> Result<Option<f64>> {
        let url = format!("{}/defi/price?address={}", self.base_url, mint);

        let response = match self
            .http_client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .header("x-chain", "solana")
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!("Birdeye price HTTP {} for {}", r.status(), mint);
                return Ok(None);
            }
            Err(e) => {
                warn!("Birdeye price request failed for {}: {}", mint, e);
                return Ok(None);
            }
        };

        let body: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };

        Ok(body
            .get("data")
            .and_then(|d| d.get("value"))
            .and_then(|v| v.as_f64()))
    }
}
