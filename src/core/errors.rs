use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Invalid wallet address: {0}")]
    InvalidInput(String),

    #[error("Upstream transient failure: {0}")]
    UpstreamTransient(String),

    #[error("Upstream rejected request ({status}): {body}")]
    UpstreamPermanent { status: u16, body: String },

    #[error("Pagination cursor rejected by provider: {0}")]
    CursorInvalid(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("No price data for {mint} in [{start}, {end}]")]
    OracleUnknown { mint: String, start: i64, end: i64 },

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IndexerError {
    /// Stable machine-readable code for the CLI and logs.
    pub fn code(&self) -> &'static str {
        match self {
            IndexerError::InvalidInput(_) => "INVALID_INPUT",
            IndexerError::UpstreamTransient(_) => "UPSTREAM_TRANSIENT",
            IndexerError::UpstreamPermanent { .. } => "UPSTREAM_PERMANENT",
            IndexerError::CursorInvalid(_) => "CURSOR_INVALID",
            IndexerError::Store(_) => "STORE_FAILURE",
            IndexerError::OracleUnknown { .. } => "ORACLE_UNKNOWN",
            IndexerError::PreconditionFailed(_) => "PRECONDITION_FAILED",
            IndexerError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Optional operator-facing diagnostic.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            IndexerError::UpstreamPermanent { status: 400, body }
                if body.contains("api-key") || body.contains("unauthorized") =>
            {
                Some("check your HELIUS_API_KEY")
            }
            IndexerError::CursorInvalid(_) => Some("will reset the cursor and retry"),
            IndexerError::UpstreamTransient(_) => Some("retried with backoff; try again later"),
            IndexerError::PreconditionFailed(_) => Some("run backfill first"),
            _ => None,
        }
    }

    /// Transient errors are safe to retry; everything else propagates.
    pub fn is_transient(&self) -> bool {
        matches!(self, IndexerError::UpstreamTransient(_))
    }
}

pub type Result<T> = std::result::Result<T, IndexerError>;
