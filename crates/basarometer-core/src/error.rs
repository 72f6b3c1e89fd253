//! Error taxonomy for the reconciliation pipeline.
//!
//! Low classification confidence is deliberately absent from this enum: it
//! is routed to the discovery queue as a normal outcome.

use thiserror::Error;

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing identifier or malformed payload. Nothing was processed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced row (discovery item, conflict, cut, retailer) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The discovery item already carries an approve/reject decision.
    #[error("discovery item {0} was already reviewed")]
    AlreadyReviewed(String),

    /// The backing store failed.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }
}
