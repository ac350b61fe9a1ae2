/// Provider payload types
/// Lenient schema for Helius enhanced transactions: the fields the
/// normalizer consumes are typed, everything else is preserved verbatim
/// so the raw payload can be persisted opaquely
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderTransaction {
    pub signature: String,

    #[serde(default)]
    pub slot: u64,

    /// Unix seconds; the provider omits it for some pre-history entries.
    #[serde(default)]
    pub timestamp: Option<i64>,

    /// Transaction fee in native base units (lamports).
    #[serde(default)]
    pub fee: Option<u64>,

    #[serde(default)]
    pub token_transfers: Vec<TokenTransfer>,

    #[serde(default)]
    pub native_transfers: Vec<NativeTransfer>,

    #[serde(default)]
    pub instructions: Vec<Instruction>,

    #[serde(default)]
    pub events: TxEvents,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransfer {
    #[serde(default)]
    pub mint: Option<String>,

    #[serde(default)]
    pub from_user_account: Option<String>,

    #[serde(default)]
    pub to_user_account: Option<String>,

    /// Decimals-adjusted amount as reported by the provider.
    #[serde(default)]
    pub token_amount: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeTransfer {
    #[serde(default)]
    pub from_user_account: Option<String>,

    #[serde(default)]
    pub to_user_account: Option<String>,

    /// Lamports.
    #[serde(default)]
    pub amount: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    #[serde(default)]
    pub program_id: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxEvents {
    /// Structured swap view when the provider recognized the DEX.
    #[serde(default)]
    pub swap: Option<serde_json::Value>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One transaction as fetched: the typed view plus the untouched payload.
#[derive(Debug, Clone)]
pub struct PageItem {
    pub tx: ProviderTransaction,
    pub payload: serde_json::Value,
}

/// One page of provider results, newest-first.
#[derive(Debug, Clone, Default)]
pub struct TransactionPage {
    pub items: Vec<PageItem>,
}

impl TransactionPage {
    /// The backward-pagination cursor: signature of the oldest (last)
    /// returned item, or None when the page is empty.
    pub fn next_before(&self) -> Option<String> {
        self.items.last().map(|item| item.tx.signature.clone())
    }

    pub fn min_slot(&self) -> Option<u64> {
        self.items.iter().map(|item| item.tx.slot).min()
    }

    pub fn max_slot(&self) -> Option<u64> {
        self.items.iter().map(|item| item.tx.slot).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_parse_preserves_unknown_fields() {
        let payload = serde_json::json!({
            "signature": "sig1",
            "slot": 1000,
            "timestamp": 1700000000,
            "fee": 5000,
            "tokenTransfers": [
                {"mint": "MintA", "fromUserAccount": "w1", "toUserAccount": "w2", "tokenAmount": 1.5}
            ],
            "nativeTransfers": [],
            "instructions": [{"programId": "11111111111111111111111111111111", "data": "abc"}],
            "type": "SWAP",
            "source": "JUPITER"
        });

        let tx: ProviderTransaction = serde_json::from_value(payload).unwrap();
        assert_eq!(tx.signature, "sig1");
        assert_eq!(tx.slot, 1000);
        assert_eq!(tx.token_transfers.len(), 1);
        assert_eq!(tx.token_transfers[0].token_amount, Some(1.5));
        // Unknown provider fields survive the round trip.
        assert_eq!(tx.extra.get("source").and_then(|v| v.as_str()), Some("JUPITER"));
    }

    #[test]
    fn test_next_before_is_last_signature() {
        let mk = |sig: &str, slot: u64| PageItem {
            tx: serde_json::from_value(serde_json::json!({"signature": sig, "slot": slot}))
                .unwrap(),
            payload: serde_json::json!({"signature": sig}),
        };
        let page = TransactionPage {
            items: vec![mk("newest", 1002), mk("oldest", 1000)],
        };
        assert_eq!(page.next_before(), Some("oldest".to_string()));
        assert_eq!(page.min_slot(), Some(1000));
        assert_eq!(page.max_slot(), Some(1002));

        assert_eq!(TransactionPage::default().next_before(), None);
    }
}
