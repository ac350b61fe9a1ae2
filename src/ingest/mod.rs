/// Ingestion pipeline - pagination driver and transaction normalizer
pub mod driver;
pub mod normalizer;

pub use driver::{BackfillStats, IngestionDriver};
pub use normalizer::Normalizer;
