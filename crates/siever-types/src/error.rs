use thiserror::Error;

/// The closed set of error kinds a siever node can surface, per the error
/// handling design: each is propagated or converted to a `response_code`
/// at the RPC boundary, never as a raw stack trace.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SievError {
    #[error("transport timed out")]
    TransportTimeout,

    #[error("transport unreachable: {0}")]
    TransportUnreachable(String),

    #[error("schema invalid: {0}")]
    SchemaInvalid(String),

    #[error("signature invalid")]
    SignatureInvalid,

    #[error("quorum failed: {yea}/{total} below threshold")]
    QuorumFailed { yea: usize, total: usize },

    #[error("height mismatch: expected {expected}, got {actual}")]
    HeightMismatch { expected: u64, actual: u64 },

    #[error("hash mismatch at height {height}")]
    HashMismatch { height: u64 },

    #[error("duplicate height {height}")]
    DuplicateHeight { height: u64 },

    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("block store is corrupt: {0}")]
    StoreCorrupt(String),

    #[error("leader unknown for channel {0}")]
    LeaderUnknown(String),

    #[error("unknown channel {0}")]
    ChannelUnknown(String),

    #[error("score service unavailable: {0}")]
    ScoreUnavailable(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type SievResult<T> = Result<T, SievError>;
