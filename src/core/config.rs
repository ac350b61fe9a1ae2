use crate::core::errors::{IndexerError, Result};
use std::env;

/// Which price oracle backs candle and spot lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceProvider {
    Birdeye,
    Gecko,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub helius_api_key: String,
    pub birdeye_api_key: Option<String>,
    pub timeout_ms: u64,
    pub page_limit: usize,
    pub max_pages: usize,
    pub price_provider: PriceProvider,
    pub database_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let helius_api_key = env::var("HELIUS_API_KEY")
            .map_err(|_| IndexerError::Config("HELIUS_API_KEY is required".to_string()))?;

        let price_provider = match env::var("PRICE_PROVIDER")
            .unwrap_or_else(|_| "birdeye".to_string())
            .to_lowercase()
            .as_str()
        {
            "birdeye" => PriceProvider::Birdeye,
            "gecko" => PriceProvider::Gecko,
            other => {
                return Err(IndexerError::Config(format!(
                    "Unknown PRICE_PROVIDER '{}' (expected birdeye or gecko)",
                    other
                )))
            }
        };

        Ok(Config {
            helius_api_key,
            birdeye_api_key: env::var("BIRDEYE_API_KEY").ok(),
            timeout_ms: env::var("INDEXER_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20_000),
            page_limit: env::var("INDEXER_PAGE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000)
                .min(1000),
            max_pages: env::var("MAX_PAGES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            price_provider,
            database_url: env::var("DATABASE_URL").ok(),
        })
    }
}

/// Light sanity check on a wallet address before any store mutation.
/// Full curve-point validation belongs to the request front-end; here we
/// only reject strings that cannot be base58 public keys.
pub fn check_wallet_address(wallet: &str) -> Result<()> {
    const BASE58: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

    if wallet.len() < 32 || wallet.len() > 44 {
        return Err(IndexerError::InvalidInput(format!(
            "bad length {} for '{}'",
            wallet.len(),
            wallet
        )));
    }
    if let Some(bad) = wallet.chars().find(|c| !BASE58.contains(*c)) {
        return Err(IndexerError::InvalidInput(format!(
            "non-base58 character '{}' in '{}'",
            bad, wallet
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_address_check() {
        assert!(check_wallet_address("So11111111111111111111111111111111111111112").is_ok());
        assert!(check_wallet_address("short").is_err());
        // 0, O, I, l are not in the base58 alphabet
        assert!(check_wallet_address("O0000000000000000000000000000000000000000").is_err());
    }
}
