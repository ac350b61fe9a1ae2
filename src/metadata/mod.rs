/// Token metadata resolution
pub mod resolver;

pub use resolver::{derived_meta, TokenMetadataResolver};
