use uuid::Uuid;

/// Result type alias for memory-engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by an external embedding or LLM provider.
///
/// The three kinds are kept distinct so callers can decide between
/// retrying (transient) and skipping the dependent feature (persistent).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Provider rate limited: {0}")]
    RateLimited(String),

    #[error("Provider model error: {0}")]
    ModelError(String),
}

/// Error types for the RAE memory engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad tenant scope, missing required fields, malformed options.
    /// Fail fast, never retried.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Artifact not found: {0}")]
    NotFound(Uuid),

    /// Transient storage failure (timeout, connection refused, lock
    /// contention). Retriable with backoff.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A data invariant was violated (reflective artifact without
    /// provenance, cross-tenant write, layer demotion). Fatal.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Embeddings from two different models were compared. Cross-model
    /// cosine is meaningless, so this is an error rather than a score.
    #[error("Embedding model mismatch: expected '{expected}', got '{actual}'")]
    ModelMismatch { expected: String, actual: String },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Missing or inconsistent configuration. Raised at startup, not at
    /// first use.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Federation error: {0}")]
    Federation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is recoverable (can retry with backoff)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::StorageUnavailable(_) | Error::Timeout(_) | Error::Io(_) => true,
            Error::Provider(p) => p.is_recoverable(),
            Error::InvalidInput(_)
            | Error::NotFound(_)
            | Error::ConstraintViolation(_)
            | Error::ModelMismatch { .. }
            | Error::Config(_)
            | Error::Cancelled
            | Error::Federation(_)
            | Error::Serialization(_) => false,
        }
    }
}

impl ProviderError {
    /// Rate limits and model hiccups are worth retrying; an exhausted
    /// quota is not going to recover within a request.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ProviderError::RateLimited(_) | ProviderError::ModelError(_) => true,
            ProviderError::QuotaExceeded(_) => false,
        }
    }
}
