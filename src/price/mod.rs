/// Price Oracle Module
/// OHLC candle history and spot prices, Birdeye or GeckoTerminal backed
use crate::core::errors::Result;
use crate::price::types::{Candle, Resolution};
use async_trait::async_trait;

pub mod birdeye;
pub mod cached;
pub mod gecko;
pub mod types;

pub use birdeye::BirdeyeOracle;
pub use cached::CachingOracle;
pub use gecko::GeckoTerminalOracle;

/// Historical and spot price source, injected into the reconstructor.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// OHLC candles with open times in `[start, end]`, ascending.
    async fn get_candles(
        &self,
        mint: &str,
        start: i64,
        end: i64,
        resolution: Resolution,
    ) -> Result<Vec<Candle>>;

    /// Current USD price, None when the oracle does not know the token.
    async fn get_current_price_usd(&self, mint: &str) -> Result<Option<f64>>;
}
