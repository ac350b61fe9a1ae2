pub mod config;
pub mod errors;
pub mod work_queue;

pub use config::{check_wallet_address, Config, PriceProvider};
pub use errors::{IndexerError, Result};
pub use work_queue::WorkQueue;
