use alloy::primitives::Address;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PointsdError>;

#[derive(Debug, Error)]
pub enum PointsdError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("points error: {0}")]
    Points(#[from] PointsError),
}

/// Errors surfaced by the chain client. `ConnectExhausted` is fatal at
/// startup; `Transient` is always retryable and owned by the caller's
/// backoff policy.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid RPC URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to connect after {attempts} attempt(s): {reason}")]
    ConnectExhausted { attempts: u32, reason: String },
    #[error("transient rpc failure in {context}: {reason}")]
    Transient { context: String, reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("transfer payload must be exactly 32 bytes, got {0}")]
    PayloadLength(usize),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open ledger database {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("{context} failed for {path}: {reason}")]
    Operation {
        context: String,
        path: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    MissingConfig(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum PointsError {
    #[error("no tracked balances for account {0}")]
    UnknownAccount(Address),
    #[error("points accumulator overflow for account {0}")]
    Overflow(Address),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
