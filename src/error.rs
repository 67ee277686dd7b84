//! Error types for the Domain Ledger

use thiserror::Error;

use crate::domain::name::ValidationError;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while ingesting, provisioning and minting
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Ingestion Errors
    // =========================================================================
    /// A log line could not be decoded
    #[error("Failed to parse event line: {0}")]
    Parse(String),

    /// Domain name or label failed syntax validation
    #[error("Invalid domain name: {0}")]
    Validation(#[from] ValidationError),

    // =========================================================================
    // Registry Errors
    // =========================================================================
    /// Registry document could not be read or written
    #[error("Registry I/O error on {path}: {source}")]
    RegistryIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Registry document is not valid JSON
    #[error("Registry document {path} is malformed: {source}")]
    RegistrySerde {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Registry lock could not be acquired
    #[error("Registry lock {path} held by {holder} after {attempts} attempts")]
    RegistryLocked {
        path: String,
        holder: String,
        attempts: u32,
    },

    // =========================================================================
    // Ledger Errors
    // =========================================================================
    /// Mirror node could not be reached
    #[error("Mirror node connection error: {0}")]
    MirrorConnection(#[source] reqwest::Error),

    /// Mirror node returned an unexpected response
    #[error("Ledger query error: {0}")]
    LedgerQuery(String),

    /// A ledger transaction (create, mint, publish) failed
    #[error("Ledger mutation '{operation}' failed: {reason}")]
    LedgerMutation { operation: String, reason: String },

    // =========================================================================
    // Retry Envelope Errors
    // =========================================================================
    /// A step exceeded its overall timeout
    #[error("Step '{step}' timed out after {duration}")]
    Timeout { step: String, duration: String },

    /// A step failed on every allowed attempt
    #[error("Step '{step}' failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        step: String,
        attempts: u32,
        last_error: Box<Error>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a ledger mutation error.
    pub fn mutation(operation: impl Into<String>, reason: impl ToString) -> Self {
        Error::LedgerMutation {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the retry envelope should try the failing step again.
    ///
    /// Malformed input and configuration problems will fail the same way on
    /// every attempt, so they are surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Parse(_)
                | Error::Validation(_)
                | Error::RegistrySerde { .. }
                | Error::Config(_)
                | Error::RetriesExhausted { .. }
        )
    }
}
