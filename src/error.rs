//! Error types for portfolio_buzz
//!
//! This module defines domain-specific error types that provide clear,
//! actionable error messages to users.

use thiserror::Error;

/// Validation errors for transaction forms (CLI arguments and TUI input).
///
/// These errors are shown directly to users and should be clear and actionable.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Date is required")]
    DateRequired,

    #[error("Invalid date format: {0} (expected YYYY-MM-DD)")]
    InvalidDate(String),

    #[error("Quantity is required")]
    QuantityRequired,

    #[error("Invalid quantity format: {0}")]
    InvalidQuantity(String),

    #[error("Quantity must be positive, got {0}")]
    NonPositiveQuantity(f64),

    #[error("Invalid price format: {0}")]
    InvalidPrice(String),

    #[error("Price cannot be negative, got {0}")]
    NegativePrice(f64),

    #[error("Symbol is required")]
    SymbolRequired,
}

/// Failures talking to the Portfolio Buzz backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport-level failure: DNS, refused connection, timeout.
    #[error("Network error: {0}")]
    Network(String),

    /// The backend answered with `success: false`.
    #[error("{0}")]
    Backend(String),

    #[error("Not signed in or session expired")]
    Unauthorized,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Decode(String),

    /// A request needs state the client does not have yet (no portfolio selected, no user).
    #[error("{0}")]
    MissingContext(&'static str),
}

/// Failures of the local key/value store that replaces browser storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Backend(#[from] sled::Error),

    #[error("Stored value for '{key}' is not valid UTF-8")]
    Encoding { key: String },

    #[error("Stored value for '{key}' could not be serialized: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Umbrella error for operations that span the API and local state.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
