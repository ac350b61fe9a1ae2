/// Helius enhanced-transactions client
/// Fetches parsed transaction pages for an address, newest-first, with
/// backward pagination via the `before` cursor
use crate::core::errors::{IndexerError, Result};
use crate::core::work_queue::WorkQueue;
use crate::provider::types::{PageItem, ProviderTransaction, TransactionPage};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

const DEFAULT_BASE_URL: &str = "https://api.helius.xyz";

/// Upstream transaction provider, injected into the driver and auditor.
#[async_trait]
pub trait TransactionProvider: Send + Sync {
    /// One page of transactions for `wallet`, strictly older than `before`
    /// when a cursor is given. Items arrive newest-first.
    async fn fetch_page(&self, wallet: &str, before: Option<&str>) -> Result<TransactionPage>;
}

pub struct HeliusClient {
    base_url: String,
    api_key: String,
    page_limit: usize,
    http_client: reqwest::Client,
    queue: Arc<WorkQueue>,
    max_retries: usize,
}

impl HeliusClient {
    pub fn new(api_key: String, page_limit: usize, timeout_ms: u64, queue: Arc<WorkQueue>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            page_limit,
            http_client,
            queue,
            max_retries: 5,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn page_url(&self, wallet: &str, before: Option<&str>) -> String {
        let mut url = format!(
            "{}/v0/addresses/{}/transactions?api-key={}&maxSupportedTransactionVersion=0&limit={}",
            self.base_url, wallet, self.api_key, self.page_limit
        );
        if let Some(cursor) = before {
            url.push_str("&before=");
            url.push_str(cursor);
        }
        url
    }

    fn classify_http_error(status: u16, body: &str, before: Option<&str>) -> IndexerError {
        let lowered = body.to_lowercase();

        if status == 400
            && (lowered.contains("invalid before") || body.contains("INVALID_BEFORE"))
        {
            return IndexerError::CursorInvalid(before.unwrap_or("").to_string());
        }
        if status == 429 || status >= 500 {
            return IndexerError::UpstreamTransient(format!(
                "HTTP {}: {}",
                status,
                truncate_body(body)
            ));
        }
        IndexerError::UpstreamPermanent {
            status,
            body: truncate_body(body).to_string(),
        }
    }

    fn parse_page(text: &str) -> Result<TransactionPage> {
        let raw_items: Vec<serde_json::Value> =
            serde_json::from_str(text).map_err(|e| IndexerError::UpstreamPermanent {
                status: 200,
                body: format!("unparseable transaction page: {}", e),
            })?;

        let mut items = Vec::with_capacity(raw_items.len());
        for payload in raw_items {
            let tx: ProviderTransaction = serde_json::from_value(payload.clone()).map_err(|e| {
                IndexerError::UpstreamPermanent {
                    status: 200,
                    body: format!("unparseable transaction entry: {}", e),
                }
            })?;
            items.push(PageItem { tx, payload });
        }
        Ok(TransactionPage { items })
    }
}

#[async_trait]
impl TransactionProvider for HeliusClient {
    async fn fetch_page(&self, wallet: &str, before: Option<&str>) -> Result<TransactionPage> {
        let url = self.page_url(wallet, before);

        for attempt in 0..self.max_retries {
            // Every attempt re-enters the queue so retries compete fairly
            // with other callers for provider budget.
            let response = self
                .queue
                .run(|| async { self.http_client.get(&url).send().await })
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    if attempt + 1 < self.max_retries {
                        warn!("Provider request failed (attempt {}): {}", attempt + 1, e);
                        sleep(backoff_delay(attempt)).await;
                        continue;
                    }
                    return Err(IndexerError::UpstreamTransient(format!(
                        "request failed after {} attempts: {}",
                        self.max_retries, e
                    )));
                }
            };

            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .map_err(|e| IndexerError::UpstreamTransient(format!("body read failed: {}", e)))?;

            if !(200..300).contains(&status) {
                let err = Self::classify_http_error(status, &text, before);
                warn!("Provider HTTP {}: {}", status, truncate_body(&text));
                if err.is_transient() && attempt + 1 < self.max_retries {
                    sleep(backoff_delay(attempt)).await;
                    continue;
                }
                return Err(err);
            }

            return Self::parse_page(&text);
        }

        Err(IndexerError::UpstreamTransient(
            "retry budget exhausted".to_string(),
        ))
    }
}

/// Exponential backoff: base 1s, factor 2, capped at 10s, plus a small
/// clock-derived jitter so synchronized retries fan out.
fn backoff_delay(attempt: usize) -> Duration {
    let base = (1_000u64 << attempt.min(10)).min(10_000);
    let jitter = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()) % 250)
        .unwrap_or(0);
    Duration::from_millis(base + jitter)
}

/// Error bodies are logged truncated to their first 200 bytes.
fn truncate_body(body: &str) -> &str {
    let end = body
        .char_indices()
        .take_while(|(i, _)| *i < 200)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    &body[..end]
}
