/// Position reconstruction - FIFO lots, peak-potential and regret metrics
pub mod reconstructor;

pub use reconstructor::{
    LotSummary, MatchedSellSummary, PositionReconstructor, TokenPosition, WalletAnalysis,
};
