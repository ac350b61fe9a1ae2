/// Durable row types
/// Everything the store owns: raw transactions, the canonical wallet-event
/// ledger, per-wallet sync state, reconciliation audits, and token metadata
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A provider transaction persisted verbatim, keyed by signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    /// Opaque provider payload, unknown fields included.
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventSide {
    Buy,
    Sell,
    Swap,
    Transfer,
    Mint,
    Burn,
    Wrap,
    Unwrap,
    Unknown,
}

impl EventSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSide::Buy => "BUY",
            EventSide::Sell => "SELL",
            EventSide::Swap => "SWAP",
            EventSide::Transfer => "TRANSFER",
            EventSide::Mint => "MINT",
            EventSide::Burn => "BURN",
            EventSide::Wrap => "WRAP",
            EventSide::Unwrap => "UNWRAP",
            EventSide::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "BUY" => EventSide::Buy,
            "SELL" => EventSide::Sell,
            "SWAP" => EventSide::Swap,
            "TRANSFER" => EventSide::Transfer,
            "MINT" => EventSide::Mint,
            "BURN" => EventSide::Burn,
            "WRAP" => EventSide::Wrap,
            "UNWRAP" => EventSide::Unwrap,
            _ => EventSide::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventDirection {
    In,
    Out,
    #[serde(rename = "SELF")]
    SelfMove,
    #[serde(rename = "N/A")]
    NotApplicable,
}

impl EventDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventDirection::In => "IN",
            EventDirection::Out => "OUT",
            EventDirection::SelfMove => "SELF",
            EventDirection::NotApplicable => "N/A",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "IN" => EventDirection::In,
            "OUT" => EventDirection::Out,
            "SELF" => EventDirection::SelfMove,
            _ => EventDirection::NotApplicable,
        }
    }
}

/// One canonical ledger entry, deduplicated by `(wallet, signature, index)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletEvent {
    pub wallet: String,
    pub signature: String,
    /// Dense ascending position within one transaction's normalization.
    pub index: u32,
    pub slot: u64,
    pub block_time: i64,
    pub program: Option<String>,
    pub side: EventSide,
    pub direction: EventDirection,
    pub token_mint: String,
    pub token_symbol: String,
    pub token_decimals: u8,
    /// Signed base-unit amount as a decimal string.
    pub amount_raw: String,
    /// Signed decimals-adjusted amount.
    pub amount_ui: Decimal,
    pub amount_usd: Option<Decimal>,
    pub price_usd_at_tx: Option<Decimal>,
    /// Shared by the two legs of a detected swap.
    pub link_id: Option<String>,
    /// Transaction fee attributed to this event, lamports.
    pub fee_base_units: Option<u64>,
    /// Opaque free-form annotations, serialized as text.
    pub metadata: Option<String>,
}

/// Per-wallet ingestion bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub wallet: String,
    /// Backfill cursor; None once a backfill has run to exhaustion.
    pub last_before: Option<String>,
    /// Highest slot the tail sync has fully ingested.
    pub verified_slot: Option<u64>,
    pub full_scan_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncState {
    pub fn new(wallet: &str) -> Self {
        let now = Utc::now();
        Self {
            wallet: wallet.to_string(),
            last_before: None,
            verified_slot: None,
            full_scan_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Append-only record of one reconciliation pass over a slot window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileAudit {
    pub wallet: String,
    pub from_slot: u64,
    pub to_slot: u64,
    pub count_raw: u64,
    pub count_wallet_tx: u64,
    pub signature_set_hash: String,
    pub ok: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaSource {
    Local,
    Helius,
    Jupiter,
    Derived,
}

impl MetaSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaSource::Local => "local",
            MetaSource::Helius => "helius",
            MetaSource::Jupiter => "jupiter",
            MetaSource::Derived => "derived",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "local" => MetaSource::Local,
            "helius" => MetaSource::Helius,
            "jupiter" => MetaSource::Jupiter,
            _ => MetaSource::Derived,
        }
    }
}

/// Cached `{symbol, decimals}` for a mint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMeta {
    pub mint: String,
    pub symbol: String,
    pub name: Option<String>,
    pub decimals: u8,
    pub source: MetaSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_round_trip() {
        for side in [
            EventSide::Buy,
            EventSide::Sell,
            EventSide::Swap,
            EventSide::Transfer,
            EventSide::Mint,
            EventSide::Burn,
            EventSide::Wrap,
            EventSide::Unwrap,
            EventSide::Unknown,
        ] {
            assert_eq!(EventSide::parse(side.as_str()), side);
        }
        assert_eq!(EventSide::parse("garbage"), EventSide::Unknown);
    }

    #[test]
    fn test_direction_round_trip() {
        for dir in [
            EventDirection::In,
            EventDirection::Out,
            EventDirection::SelfMove,
            EventDirection::NotApplicable,
        ] {
            assert_eq!(EventDirection::parse(dir.as_str()), dir);
        }
    }
}
