//! Error types for the recorder.

use thiserror::Error;

/// Errors raised by the persistent log store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write or read was attempted while no log file is open.
    #[error("Log store is not open")]
    NotOpen,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Log file is locked by another process")]
    Locked,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Failure reported by the protocol collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ProtocolError(pub String);

impl ProtocolError {
    pub fn new(message: impl Into<String>) -> Self {
        ProtocolError(message.into())
    }
}

/// Why a subscribe request was refused.
///
/// In every case the registry and the store are left exactly as they were
/// before the call.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("Log store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    #[error("Protocol subscribe failed: {0}")]
    ProtocolSubscribeFailure(#[source] ProtocolError),

    #[error("Recorder has been shut down")]
    ShutDown,
}

/// Unsubscribe failure. Bookkeeping has already been updated when this is
/// returned.
#[derive(Debug, Error)]
pub enum UnsubscribeError {
    #[error("Protocol unsubscribe failed: {0}")]
    ProtocolUnsubscribeFailure(#[source] ProtocolError),
}

/// Errors loading a [`GatewayConfig`](crate::config::GatewayConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
