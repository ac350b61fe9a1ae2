/// Upstream transaction provider client
pub mod helius;
pub mod types;

pub use helius::{HeliusClient, TransactionProvider};
pub use types::{
    Instruction, NativeTransfer, PageItem, ProviderTransaction, TokenTransfer, TransactionPage,
    TxEvents,
};
