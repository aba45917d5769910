//! Error taxonomy for Stand POS.
//!
//! Every fallible domain operation returns [`PosError`]. All variants are
//! recoverable at the command boundary: they surface to the operator as a
//! rejected action with a message; none are fatal to the process.
//!
//! Persistence failures (SQLite, backup snapshots) are propagated as their
//! own variants so callers can decide between retrying and surfacing them.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PosError {
    /// Bad operator input: insufficient cash tendered, missing VIP name,
    /// discount exceeding the subtotal, negative price or float.
    #[error("{0}")]
    Validation(String),

    /// Unknown sale id, unknown VIP account, flavor not in the catalog.
    #[error("{0}")]
    NotFound(String),

    /// Operation not allowed in the current state: checking out an empty
    /// cart, settling a zero-balance tab, selling before configuration.
    #[error("{0}")]
    State(String),

    /// SQLite failure.
    #[error("storage: {0}")]
    Storage(#[from] rusqlite::Error),

    /// File export failure: backup snapshots, ticket PNGs.
    #[error("write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Ticket PNG encoding failure.
    #[error("ticket render: {0}")]
    Render(#[from] image::ImageError),
}

impl PosError {
    pub fn validation(msg: impl Into<String>) -> Self {
        PosError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        PosError::NotFound(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        PosError::State(msg.into())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_read_as_operator_text() {
        let err = PosError::validation("Discount 5.00 exceeds subtotal 3.00");
        assert_eq!(err.to_string(), "Discount 5.00 exceeds subtotal 3.00");

        let err = PosError::not_found("Sale not found: 42");
        assert_eq!(err.to_string(), "Sale not found: 42");
    }

    #[test]
    fn test_storage_wraps_rusqlite() {
        let err: PosError = rusqlite::Error::InvalidQuery.into();
        assert!(err.to_string().starts_with("storage:"));
    }
}
