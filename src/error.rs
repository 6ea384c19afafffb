//! Typed error kinds shared across the toolkit.
//!
//! Every command-fatal condition maps onto one of these variants; the CLI
//! layer wraps them with `anyhow` context before reporting. Traversal
//! termination is deliberately *not* an error — see
//! [`crate::traverse::StopReason`].

use thiserror::Error;

/// Fatal, per-command error kinds.
#[derive(Debug, Error)]
pub enum CtxError {
    /// The hash table is full, or the advertised graph cannot fit the
    /// memory budget. The table never grows; callers must size it from
    /// known input cardinality.
    #[error("hash table capacity exceeded (the table never grows; re-run with a larger -m/-n)")]
    CapacityExceeded,

    /// Malformed graph (`.ctx`) or link (`.ctp.gz`) file.
    #[error("format error: {0}")]
    Format(String),

    /// Underlying read/write failure. Triggers delete-on-error for any
    /// partially written outputs.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Bad command-line input, unknown bases in strict mode, or mismatched
    /// kmer sizes between graph and link files.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience alias used throughout the library crate.
pub type Result<T> = std::result::Result<T, CtxError>;
