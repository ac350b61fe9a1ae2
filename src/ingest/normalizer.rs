/// Transaction Normalizer
/// Converts one provider transaction + one wallet address into the
/// canonical wallet-event ledger entries
use crate::metadata::{derived_meta, TokenMetadataResolver};
use crate::price::types::{NATIVE_DECIMALS, NATIVE_MINT};
use crate::provider::types::{PageItem, ProviderTransaction};
use crate::storage::types::{EventDirection, EventSide, TokenMeta, WalletEvent};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// AMM program identifiers whose presence marks a transaction as a swap.
const KNOWN_AMM_PROGRAMS: &[&str] = &[
    "675kPX9MHTjS2zt1qfmKe2LdPsyAtg5w6qcCX6qX8W8S",  // Raydium V4
    "CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK", // Raydium CLMM
    "whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc",  // Orca Whirlpool
    "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4",  // Jupiter V6
    "LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo",  // Meteora DLMM
    "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P",  // Pump.fun
];

const SPL_TOKEN_PROGRAM: &str = "spl-token";
const SYSTEM_PROGRAM: &str = "system";

pub struct Normalizer {
    resolver: Arc<TokenMetadataResolver>,
    amm_programs: HashSet<String>,
}

impl Normalizer {
    pub fn new(resolver: Arc<TokenMetadataResolver>) -> Self {
        Self {
            resolver,
            amm_programs: KNOWN_AMM_PROGRAMS.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn with_amm_programs(mut self, programs: Vec<String>) -> Self {
        self.amm_programs = programs.into_iter().collect();
        self
    }

    /// Normalize a whole page: batch-resolve every referenced mint once,
    /// then derive events per transaction.
    pub async fn normalize_page(&self, items: &[PageItem], wallet: &str) -> Vec<WalletEvent> {
        let mut mints: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for item in items {
            for transfer in &item.tx.token_transfers {
                if let Some(mint) = &transfer.mint {
                    if seen.insert(mint.clone()) {
                        mints.push(mint.clone());
                    }
                }
            }
            if !item.tx.native_transfers.is_empty() && seen.insert(NATIVE_MINT.to_string()) {
                mints.push(NATIVE_MINT.to_string());
            }
        }

        let meta = self.resolver.batch(&mints).await;

        items
            .iter()
            .flat_map(|item| self.normalize_tx(&item.tx, wallet, &meta))
            .collect()
    }

    /// Deterministic in the provider payload alone.
    pub fn normalize_tx(
        &self,
        tx: &ProviderTransaction,
        wallet: &str,
        meta: &HashMap<String, TokenMeta>,
    ) -> Vec<WalletEvent> {
        let block_time = tx.timestamp.unwrap_or(0);
        let annotations = tx_annotations(tx);
        let mut events: Vec<WalletEvent> = Vec::new();

        // Rule 1: SPL token transfers touching the wallet.
        for transfer in &tx.token_transfers {
            let Some(mint) = &transfer.mint else { continue };
            let Some(amount) = transfer.token_amount else { continue };
            let from = transfer.from_user_account.as_deref();
            let to = transfer.to_user_account.as_deref();

            let Some((side, direction)) = classify_party(wallet, from, to) else {
                continue;
            };

            let token = meta
                .get(mint)
                .cloned()
                .unwrap_or_else(|| derived_meta(mint));
            let magnitude = Decimal::from_f64_retain(amount).unwrap_or(Decimal::ZERO);
            let amount_ui = apply_sign(magnitude, direction);

            events.push(WalletEvent {
                wallet: wallet.to_string(),
                signature: tx.signature.clone(),
                index: 0, // assigned densely below
                slot: tx.slot,
                block_time,
                program: Some(SPL_TOKEN_PROGRAM.to_string()),
                side,
                direction,
                token_mint: mint.clone(),
                token_symbol: token.symbol.clone(),
                token_decimals: token.decimals,
                amount_raw: to_base_units(amount_ui, token.decimals),
                amount_ui,
                amount_usd: None,
                price_usd_at_tx: None,
                link_id: None,
                fee_base_units: None,
                metadata: annotations.clone(),
            });
        }

        // Rule 2: native transfers, same shape with the wrapped-SOL mint.
        for transfer in &tx.native_transfers {
            let Some(lamports) = transfer.amount else { continue };
            let from = transfer.from_user_account.as_deref();
            let to = transfer.to_user_account.as_deref();

            let Some((side, direction)) = classify_party(wallet, from, to) else {
                continue;
            };

            let symbol = meta
                .get(NATIVE_MINT)
                .map(|m| m.symbol.clone())
                .unwrap_or_else(|| "SOL".to_string());
            let magnitude = Decimal::from(lamports) / Decimal::from(10u64.pow(NATIVE_DECIMALS as u32));
            let amount_ui = apply_sign(magnitude, direction);
            let amount_raw = match direction {
                EventDirection::Out => format!("-{}", lamports),
                _ => lamports.to_string(),
            };

            events.push(WalletEvent {
                wallet: wallet.to_string(),
                signature: tx.signature.clone(),
                index: 0,
                slot: tx.slot,
                block_time,
                program: Some(SYSTEM_PROGRAM.to_string()),
                side,
                direction,
                token_mint: NATIVE_MINT.to_string(),
                token_symbol: symbol,
                token_decimals: NATIVE_DECIMALS,
                amount_raw,
                amount_ui,
                amount_usd: None,
                price_usd_at_tx: None,
                link_id: None,
                fee_base_units: None,
                metadata: annotations.clone(),
            });
        }

        // Rule 3: swap detection links the final two legs.
        if events.len() >= 2 {
            if let Some(program) = self.detect_swap(tx) {
                let link_id = format!("swap:{}", tx.signature);
                let n = events.len();
                for event in &mut events[n - 2..] {
                    event.link_id = Some(link_id.clone());
                    if let Some(program) = &program {
                        event.program = Some(program.clone());
                    }
                }
            }
        }

        // Rule 4: fee goes to the first SELL leg, else the first event.
        if let Some(fee) = tx.fee.filter(|f| *f > 0) {
            let target = events
                .iter()
                .position(|e| e.side == EventSide::Sell)
                .unwrap_or(0);
            if let Some(event) = events.get_mut(target) {
                event.fee_base_units = Some(fee);
            }
        }

        // Rule 5: dense ascending indices in emission order.
        for (index, event) in events.iter_mut().enumerate() {
            event.index = index as u32;
        }

        events
    }

    /// Some(matched AMM program) when the allow-list fired, Some(None) for
    /// the other swap signals, None when the transaction is not a swap.
    fn detect_swap(&self, tx: &ProviderTransaction) -> Option<Option<String>> {
        if tx.events.swap.is_some() {
            return Some(None);
        }

        if let Some(program) = tx
            .instructions
            .iter()
            .filter_map(|i| i.program_id.as_ref())
            .find(|p| self.amm_programs.contains(*p))
        {
            return Some(Some(program.clone()));
        }

        let distinct_mints: HashSet<&String> = tx
            .token_transfers
            .iter()
            .filter_map(|t| t.mint.as_ref())
            .collect();
        if distinct_mints.len() >= 2 && tx.token_transfers.len() >= 2 {
            return Some(None);
        }

        None
    }
}

fn classify_party(
    wallet: &str,
    from: Option<&str>,
    to: Option<&str>,
) -> Option<(EventSide, EventDirection)> {
    let is_from = from == Some(wallet);
    let is_to = to == Some(wallet);
    if is_from && !is_to {
        Some((EventSide::Sell, EventDirection::Out))
    } else if is_to && !is_from {
        Some((EventSide::Buy, EventDirection::In))
    } else {
        None
    }
}

fn apply_sign(magnitude: Decimal, direction: EventDirection) -> Decimal {
    match direction {
        EventDirection::Out => -magnitude,
        _ => magnitude,
    }
}

/// Signed base-unit amount as a decimal string.
fn to_base_units(amount_ui: Decimal, decimals: u8) -> String {
    let factor = Decimal::from(10u64.pow(decimals.min(18) as u32));
    (amount_ui * factor).round().to_string()
}

/// Provider-side classification survives as opaque event annotations.
fn tx_annotations(tx: &ProviderTransaction) -> Option<String> {
    let mut map = serde_json::Map::new();
    for key in ["type", "source", "description"] {
        if let Some(value) = tx.extra.get(key) {
            if !value.is_null() {
                map.insert(key.to_string(), value.clone());
            }
        }
    }
    if map.is_empty() {
        None
    } else {
        Some(serde_json::Value::Object(map).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::MetaSource;
    use rust_decimal_macros::dec;

    const WALLET: &str = "WaLLet1111111111111111111111111111111111111";
    const OTHER: &str = "Other11111111111111111111111111111111111111";
    const MINT_A: &str = "MintA11111111111111111111111111111111111111";
    const MINT_B: &str = "MintB11111111111111111111111111111111111111";

    fn meta_for(entries: &[(&str, &str, u8)]) -> HashMap<String, TokenMeta> {
        entries
            .iter()
            .map(|(mint, symbol, decimals)| {
                (
                    mint.to_string(),
                    TokenMeta {
                        mint: mint.to_string(),
                        symbol: symbol.to_string(),
                        name: None,
                        decimals: *decimals,
                        source: MetaSource::Local,
                    },
                )
            })
            .collect()
    }

    fn normalizer() -> Normalizer {
        // The resolver is only needed by the async page path; the pure
        // per-transaction rules are exercised directly.
        use crate::core::work_queue::WorkQueue;
        use crate::storage::MemoryStore;
        Normalizer::new(Arc::new(TokenMetadataResolver::new(
            "unused".to_string(),
            Arc::new(MemoryStore::new()),
            Arc::new(WorkQueue::new(2, 100)),
        )))
    }

    fn tx(value: serde_json::Value) -> ProviderTransaction {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_token_transfer_sides_and_signs() {
        let n = normalizer();
        let meta = meta_for(&[(MINT_A, "TKA", 6)]);
        let tx = tx(serde_json::json!({
            "signature": "sig1",
            "slot": 1000,
            "timestamp": 1_700_000_000,
            "tokenTransfers": [
                {"mint": MINT_A, "fromUserAccount": WALLET, "toUserAccount": OTHER, "tokenAmount": 1.5},
                {"mint": MINT_A, "fromUserAccount": OTHER, "toUserAccount": WALLET, "tokenAmount": 2.0},
                {"mint": MINT_A, "fromUserAccount": OTHER, "toUserAccount": OTHER, "tokenAmount": 9.0}
            ]
        }));

        let events = n.normalize_tx(&tx, WALLET, &meta);
        assert_eq!(events.len(), 2);

        assert_eq!(events[0].side, EventSide::Sell);
        assert_eq!(events[0].direction, EventDirection::Out);
        assert_eq!(events[0].amount_ui, dec!(-1.5));
        assert_eq!(events[0].amount_raw, "-1500000");
        assert_eq!(events[0].token_symbol, "TKA");

        assert_eq!(events[1].side, EventSide::Buy);
        assert_eq!(events[1].direction, EventDirection::In);
        assert_eq!(events[1].amount_ui, dec!(2.0));
        assert_eq!(events[1].amount_raw, "2000000");

        // Dense indices in emission order.
        assert_eq!(events[0].index, 0);
        assert_eq!(events[1].index, 1);
    }

    #[test]
    fn test_self_transfer_emits_nothing() {
        let n = normalizer();
        let meta = meta_for(&[(MINT_A, "TKA", 6)]);
        let tx = tx(serde_json::json!({
            "signature": "sig1",
            "slot": 1000,
            "tokenTransfers": [
                {"mint": MINT_A, "fromUserAccount": WALLET, "toUserAccount": WALLET, "tokenAmount": 5.0}
            ]
        }));

        assert!(n.normalize_tx(&tx, WALLET, &meta).is_empty());
    }

    #[test]
    fn test_native_transfer_uses_wrapped_sol() {
        let n = normalizer();
        let tx = tx(serde_json::json!({
            "signature": "sig1",
            "slot": 1000,
            "timestamp": 1_700_000_000,
            "nativeTransfers": [
                {"fromUserAccount": OTHER, "toUserAccount": WALLET, "amount": 2_500_000_000u64}
            ]
        }));

        let events = n.normalize_tx(&tx, WALLET, &HashMap::new());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token_mint, NATIVE_MINT);
        assert_eq!(events[0].token_decimals, NATIVE_DECIMALS);
        assert_eq!(events[0].side, EventSide::Buy);
        assert_eq!(events[0].amount_ui, dec!(2.5));
        assert_eq!(events[0].amount_raw, "2500000000");
    }

    #[test]
    fn test_swap_links_last_two_events() {
        let n = normalizer();
        let meta = meta_for(&[(MINT_A, "TKA", 6), (MINT_B, "TKB", 9)]);
        let tx = tx(serde_json::json!({
            "signature": "swapsig",
            "slot": 1000,
            "tokenTransfers": [
                {"mint": MINT_A, "fromUserAccount": WALLET, "toUserAccount": OTHER, "tokenAmount": 10.0},
                {"mint": MINT_B, "fromUserAccount": OTHER, "toUserAccount": WALLET, "tokenAmount": 4.0}
            ]
        }));

        let events = n.normalize_tx(&tx, WALLET, &meta);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].link_id.as_deref(), Some("swap:swapsig"));
        assert_eq!(events[1].link_id.as_deref(), Some("swap:swapsig"));
    }

    #[test]
    fn test_swap_detected_from_structured_event() {
        let n = normalizer();
        let meta = meta_for(&[(MINT_A, "TKA", 6)]);
        let tx = tx(serde_json::json!({
            "signature": "s",
            "slot": 1,
            "events": {"swap": {"nativeInput": {"amount": "1"}}},
            "tokenTransfers": [
                {"mint": MINT_A, "fromUserAccount": WALLET, "toUserAccount": OTHER, "tokenAmount": 1.0},
                {"mint": MINT_A, "fromUserAccount": OTHER, "toUserAccount": WALLET, "tokenAmount": 1.0}
            ]
        }));

        let events = n.normalize_tx(&tx, WALLET, &meta);
        assert!(events.iter().all(|e| e.link_id.is_some()));
    }

    #[test]
    fn test_swap_detected_from_amm_program() {
        let n = normalizer();
        let meta = meta_for(&[(MINT_A, "TKA", 6)]);
        let tx = tx(serde_json::json!({
            "signature": "s",
            "slot": 1,
            "instructions": [
                {"programId": "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4"}
            ],
            "tokenTransfers": [
                {"mint": MINT_A, "fromUserAccount": WALLET, "toUserAccount": OTHER, "tokenAmount": 1.0},
                {"mint": MINT_A, "fromUserAccount": OTHER, "toUserAccount": WALLET, "tokenAmount": 1.0}
            ]
        }));

        let events = n.normalize_tx(&tx, WALLET, &meta);
        assert!(events.iter().all(|e| e.link_id.is_some()));
        // The matched AMM program is recorded on the linked legs.
        assert_eq!(
            events[0].program.as_deref(),
            Some("JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4")
        );
    }

    #[test]
    fn test_single_mint_pair_without_amm_is_not_a_swap() {
        let n = normalizer();
        let meta = meta_for(&[(MINT_A, "TKA", 6)]);
        let tx = tx(serde_json::json!({
            "signature": "s",
            "slot": 1,
            "tokenTransfers": [
                {"mint": MINT_A, "fromUserAccount": WALLET, "toUserAccount": OTHER, "tokenAmount": 1.0},
                {"mint": MINT_A, "fromUserAccount": OTHER, "toUserAccount": WALLET, "tokenAmount": 1.0}
            ]
        }));

        let events = n.normalize_tx(&tx, WALLET, &meta);
        assert!(events.iter().all(|e| e.link_id.is_none()));
    }

    #[test]
    fn test_fee_goes_to_first_sell() {
        let n = normalizer();
        let meta = meta_for(&[(MINT_A, "TKA", 6), (MINT_B, "TKB", 9)]);
        let tx = tx(serde_json::json!({
            "signature": "s",
            "slot": 1,
            "fee": 5000,
            "tokenTransfers": [
                {"mint": MINT_B, "fromUserAccount": OTHER, "toUserAccount": WALLET, "tokenAmount": 4.0},
                {"mint": MINT_A, "fromUserAccount": WALLET, "toUserAccount": OTHER, "tokenAmount": 10.0}
            ]
        }));

        let events = n.normalize_tx(&tx, WALLET, &meta);
        assert_eq!(events[0].fee_base_units, None);
        assert_eq!(events[1].side, EventSide::Sell);
        assert_eq!(events[1].fee_base_units, Some(5000));
    }

    #[test]
    fn test_fee_falls_back_to_first_event() {
        let n = normalizer();
        let meta = meta_for(&[(MINT_A, "TKA", 6)]);
        let tx = tx(serde_json::json!({
            "signature": "s",
            "slot": 1,
            "fee": 5000,
            "tokenTransfers": [
                {"mint": MINT_A, "fromUserAccount": OTHER, "toUserAccount": WALLET, "tokenAmount": 4.0}
            ]
        }));

        let events = n.normalize_tx(&tx, WALLET, &meta);
        assert_eq!(events[0].fee_base_units, Some(5000));
    }

    #[test]
    fn test_provider_classification_kept_as_annotations() {
        let n = normalizer();
        let meta = meta_for(&[(MINT_A, "TKA", 6)]);
        let tx = tx(serde_json::json!({
            "signature": "s",
            "slot": 1,
            "type": "TRANSFER",
            "source": "SYSTEM_PROGRAM",
            "tokenTransfers": [
                {"mint": MINT_A, "fromUserAccount": OTHER, "toUserAccount": WALLET, "tokenAmount": 4.0}
            ]
        }));

        let events = n.normalize_tx(&tx, WALLET, &meta);
        let annotations: serde_json::Value =
            serde_json::from_str(events[0].metadata.as_deref().unwrap()).unwrap();
        assert_eq!(annotations["type"], "TRANSFER");
        assert_eq!(annotations["source"], "SYSTEM_PROGRAM");
    }

    #[test]
    fn test_no_events_means_no_fee_attribution() {
        let n = normalizer();
        let tx = tx(serde_json::json!({
            "signature": "s",
            "slot": 1,
            "fee": 5000,
            "tokenTransfers": [
                {"mint": MINT_A, "fromUserAccount": OTHER, "toUserAccount": OTHER, "tokenAmount": 4.0}
            ]
        }));

        assert!(n.normalize_tx(&tx, WALLET, &HashMap::new()).is_empty());
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let n = normalizer();
        let meta = meta_for(&[(MINT_A, "TKA", 6), (MINT_B, "TKB", 9)]);
        let payload = serde_json::json!({
            "signature": "s",
            "slot": 1,
            "fee": 5000,
            "timestamp": 1_700_000_000,
            "tokenTransfers": [
                {"mint": MINT_A, "fromUserAccount": WALLET, "toUserAccount": OTHER, "tokenAmount": 10.0},
                {"mint": MINT_B, "fromUserAccount": OTHER, "toUserAccount": WALLET, "tokenAmount": 4.0}
            ],
            "nativeTransfers": [
                {"fromUserAccount": WALLET, "toUserAccount": OTHER, "amount": 100_000u64}
            ]
        });

        let first = n.normalize_tx(&tx(payload.clone()), WALLET, &meta);
        let second = n.normalize_tx(&tx(payload), WALLET, &meta);
        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }
}
