/// Position Reconstructor
/// Replays the canonical event ledger per token, matching SELLs against
/// BUY lots in FIFO order, then prices each lot's best exit against
/// historical candles to compute peak-potential and regret-gap amounts.
/// All money math stays in decimals; floats appear only in the returned
/// summary
use crate::core::errors::Result;
use crate::price::cached::CachingOracle;
use crate::price::types::{Resolution, NATIVE_DECIMALS, NATIVE_MINT};
use crate::price::PriceOracle;
use crate::storage::types::{EventSide, WalletEvent};
use crate::storage::IndexerStore;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Lots this close to empty are considered fully consumed.
const QTY_EPSILON: Decimal = dec!(0.000001);

/// Windows at or under 60 days use hourly candles, longer ones daily.
const HOURLY_WINDOW_SECS: i64 = 60 * 86_400;

#[derive(Debug, Clone)]
struct MatchedSell {
    time: i64,
    qty: Decimal,
    proceeds_usd: Decimal,
}

#[derive(Debug, Clone)]
struct Lot {
    id: String,
    buy_time: i64,
    buy_qty: Decimal,
    buy_cost_usd: Option<Decimal>,
    remaining_qty: Decimal,
    matched_sells: Vec<MatchedSell>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchedSellSummary {
    pub time: i64,
    pub qty: f64,
    pub proceeds_usd: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LotSummary {
    pub lot_id: String,
    pub buy_time: i64,
    pub buy_qty: f64,
    pub buy_cost_usd: Option<f64>,
    pub remaining_qty: f64,
    pub matched_sells: Vec<MatchedSellSummary>,
    pub realized_usd: f64,
    pub peak_timestamp: Option<i64>,
    pub peak_price_usd: Option<f64>,
    pub peak_potential_usd: f64,
    pub regret_gap_usd: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPosition {
    pub token_mint: String,
    pub token_symbol: String,
    pub lots: Vec<LotSummary>,
    pub realized_usd: f64,
    pub peak_potential_usd: f64,
    pub regret_gap_usd: f64,
    pub remaining_qty: f64,
    pub open_value_usd: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletAnalysis {
    pub wallet: String,
    pub tokens: Vec<TokenPosition>,
    pub realized_usd: f64,
    pub peak_potential_usd: f64,
    pub regret_gap_usd: f64,
    pub open_positions_usd: f64,
}

pub struct PositionReconstructor {
    store: Arc<dyn IndexerStore>,
    oracle: Arc<CachingOracle>,
}

impl PositionReconstructor {
    pub fn new(store: Arc<dyn IndexerStore>, oracle: Arc<CachingOracle>) -> Self {
        Self { store, oracle }
    }

    /// Load the wallet's ledger, fetch current prices for every touched
    /// token, and rebuild its positions.
    pub async fn analyze(&self, wallet: &str) -> Result<WalletAnalysis> {
        let events = self.store.wallet_events(wallet).await?;

        let mut mints: Vec<String> = Vec::new();
        for event in &events {
            if !mints.contains(&event.token_mint) {
                mints.push(event.token_mint.clone());
            }
        }

        let quotes = futures::future::join_all(
            mints
                .iter()
                .map(|mint| self.oracle.get_current_price_usd(mint)),
        )
        .await;

        let mut current_prices: HashMap<String, f64> = HashMap::new();
        for (mint, quote) in mints.into_iter().zip(quotes) {
            if let Some(price) = quote.unwrap_or(None) {
                current_prices.insert(mint, price);
            }
        }

        self.reconstruct(wallet, &events, &current_prices).await
    }

    /// Deterministic for a fixed oracle: events must arrive ascending by
    /// `(block_time, index)`.
    pub async fn reconstruct(
        &self,
        wallet: &str,
        events: &[WalletEvent],
        current_prices: &HashMap<String, f64>,
    ) -> Result<WalletAnalysis> {
        // Group per token, preserving ledger order within each group.
        let mut per_token: Vec<(String, String, Vec<&WalletEvent>)> = Vec::new();
        for event in events {
            match per_token.iter_mut().find(|(mint, _, _)| *mint == event.token_mint) {
                Some((_, _, group)) => group.push(event),
                None => per_token.push((
                    event.token_mint.clone(),
                    event.token_symbol.clone(),
                    vec![event],
                )),
            }
        }

        let now = chrono::Utc::now().timestamp();
        let mut tokens = Vec::new();
        let mut total_realized = Decimal::ZERO;
        let mut total_peak = Decimal::ZERO;
        let mut total_regret = Decimal::ZERO;
        let mut total_open = Decimal::ZERO;

        for (mint, symbol, group) in per_token {
            let current_price = current_prices
                .get(&mint)
                .and_then(|p| Decimal::from_f64_retain(*p));
            let position = self
                .reconstruct_token(&mint, &symbol, &group, current_price, now)
                .await;

            total_realized += decimal_or_zero(position.realized_usd);
            total_peak += decimal_or_zero(position.peak_potential_usd);
            total_regret += decimal_or_zero(position.regret_gap_usd);
            total_open += decimal_or_zero(position.open_value_usd);
            tokens.push(position);
        }

        Ok(WalletAnalysis {
            wallet: wallet.to_string(),
            tokens,
            realized_usd: to_f64(total_realized),
            peak_potential_usd: to_f64(total_peak),
            regret_gap_usd: to_f64(total_regret),
            open_positions_usd: to_f64(total_open),
        })
    }

    async fn reconstruct_token(
        &self,
        mint: &str,
        symbol: &str,
        events: &[&WalletEvent],
        current_price: Option<Decimal>,
        now: i64,
    ) -> TokenPosition {
        let mut open_lots: VecDeque<Lot> = VecDeque::new();
        let mut closed_lots: Vec<Lot> = Vec::new();

        for event in events {
            match event.side {
                EventSide::Buy => {
                    let buy_qty = event.amount_ui.abs();
                    let buy_price = self
                        .oracle
                        .price_at(mint, event.block_time)
                        .await
                        .and_then(Decimal::from_f64_retain);
                    open_lots.push_back(Lot {
                        id: format!("{}:{}", event.signature, event.block_time),
                        buy_time: event.block_time,
                        buy_qty,
                        buy_cost_usd: buy_price.map(|p| buy_qty * p),
                        remaining_qty: buy_qty,
                        matched_sells: Vec::new(),
                    });
                }
                EventSide::Sell => {
                    let mut need = event.amount_ui.abs();
                    let sell_price = self
                        .oracle
                        .price_at(mint, event.block_time)
                        .await
                        .and_then(Decimal::from_f64_retain)
                        .unwrap_or(Decimal::ZERO);
                    let fee_usd = self.fee_usd(event).await;

                    while need > Decimal::ZERO {
                        let Some(lot) = open_lots.front_mut() else {
                            // History starts mid-life: the unmatched
                            // remainder is dropped.
                            debug!(
                                "Dropping unmatched sell of {} {} at {}",
                                need, mint, event.block_time
                            );
                            break;
                        };
                        let take = need.min(lot.remaining_qty);
                        lot.matched_sells.push(MatchedSell {
                            time: event.block_time,
                            qty: take,
                            proceeds_usd: take * sell_price - fee_usd,
                        });
                        lot.remaining_qty -= take;
                        need -= take;
                        if lot.remaining_qty <= QTY_EPSILON {
                            closed_lots.push(open_lots.pop_front().unwrap());
                        }
                    }
                }
                _ => {}
            }
        }

        let mut lots: Vec<Lot> = closed_lots;
        lots.extend(open_lots);
        lots.sort_by_key(|lot| lot.buy_time);

        let mut summaries = Vec::with_capacity(lots.len());
        let mut realized_sum = Decimal::ZERO;
        let mut peak_sum = Decimal::ZERO;
        let mut regret_sum = Decimal::ZERO;
        let mut remaining_sum = Decimal::ZERO;

        for lot in lots {
            let summary = self.finish_lot(mint, lot, current_price, now).await;
            realized_sum += decimal_or_zero(summary.realized_usd);
            peak_sum += decimal_or_zero(summary.peak_potential_usd);
            regret_sum += decimal_or_zero(summary.regret_gap_usd);
            remaining_sum += decimal_or_zero(summary.remaining_qty);
            summaries.push(summary);
        }

        let open_value = current_price
            .map(|p| remaining_sum * p)
            .unwrap_or(Decimal::ZERO);

        TokenPosition {
            token_mint: mint.to_string(),
            token_symbol: symbol.to_string(),
            lots: summaries,
            realized_usd: to_f64(realized_sum),
            peak_potential_usd: to_f64(peak_sum),
            regret_gap_usd: to_f64(regret_sum),
            remaining_qty: to_f64(remaining_sum),
            open_value_usd: to_f64(open_value),
        }
    }

    /// Annotate one lot with peak and regret metrics.
    async fn finish_lot(
        &self,
        mint: &str,
        lot: Lot,
        current_price: Option<Decimal>,
        now: i64,
    ) -> LotSummary {
        let realized: Decimal = lot
            .matched_sells
            .iter()
            .map(|sell| sell.proceeds_usd)
            .sum();

        let end_time = lot
            .matched_sells
            .iter()
            .map(|sell| sell.time)
            .max()
            .unwrap_or(now);
        let resolution = if end_time - lot.buy_time <= HOURLY_WINDOW_SECS {
            Resolution::OneHour
        } else {
            Resolution::OneDay
        };

        // Oracle trouble is never fatal; the lot just gets neutral metrics.
        let candles = self
            .oracle
            .get_candles(mint, lot.buy_time, end_time, resolution)
            .await
            .unwrap_or_default();

        let peak = candles
            .iter()
            .max_by(|a, b| a.high.partial_cmp(&b.high).unwrap_or(std::cmp::Ordering::Equal))
            .and_then(|c| Decimal::from_f64_retain(c.high).map(|high| (c.t, high)));

        let (peak_timestamp, peak_price, peak_potential) = match peak {
            Some((t, high)) => (Some(t), Some(high), lot.buy_qty * high),
            None => (None, None, realized),
        };

        let regret_gap = if lot.remaining_qty > QTY_EPSILON {
            let current_value = current_price
                .map(|p| lot.remaining_qty * p)
                .unwrap_or(Decimal::ZERO);
            (peak_potential - (realized + current_value)).max(Decimal::ZERO)
        } else {
            (peak_potential - realized).max(Decimal::ZERO)
        };

        LotSummary {
            lot_id: lot.id,
            buy_time: lot.buy_time,
            buy_qty: to_f64(lot.buy_qty),
            buy_cost_usd: lot.buy_cost_usd.map(to_f64),
            remaining_qty: to_f64(lot.remaining_qty),
            matched_sells: lot
                .matched_sells
                .iter()
                .map(|sell| MatchedSellSummary {
                    time: sell.time,
                    qty: to_f64(sell.qty),
                    proceeds_usd: to_f64(sell.proceeds_usd),
                })
                .collect(),
            realized_usd: to_f64(realized),
            peak_timestamp,
            peak_price_usd: peak_price.map(to_f64),
            peak_potential_usd: to_f64(peak_potential),
            regret_gap_usd: to_f64(regret_gap),
        }
    }

    /// Converts the event's attributed fee to USD at the native price of
    /// the sell moment; absent data means a zero fee.
    async fn fee_usd(&self, event: &WalletEvent) -> Decimal {
        let Some(fee) = event.fee_base_units.filter(|f| *f > 0) else {
            return Decimal::ZERO;
        };
        let Some(native_price) = self
            .oracle
            .price_at(NATIVE_MINT, event.block_time)
            .await
            .and_then(Decimal::from_f64_retain)
        else {
            return Decimal::ZERO;
        };
        let lamports = Decimal::from(fee);
        let factor = Decimal::from(10u64.pow(NATIVE_DECIMALS as u32));
        lamports / factor * native_price
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn decimal_or_zero(value: f64) -> Decimal {
    Decimal::from_f64_retain(value).unwrap_or(Decimal::ZERO)
}
