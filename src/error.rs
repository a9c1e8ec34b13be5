//! Error taxonomy for the AFF4 core.
//!
//! The original C implementation propagates failures as a small set of
//! `RaiseError(EKind, "...")` calls whose `EKind` is one of a handful of
//! broad categories (`ERuntimeError`, `EIOError`, `EInvalidParameter`, ...).
//! We keep the same small taxonomy but make it a typed enum instead of a
//! stringly-tagged one, so callers can `match` on failure kind.

use crate::urn::Urn;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Aff4Result<T> = Result<T, Aff4Error>;

/// The small, closed set of failure kinds the core can produce.
#[derive(Debug, Error)]
pub enum Aff4Error {
    /// A URN has no known type in the resolver, or a segment was not found
    /// in a volume's central directory.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backing file does not look like a ZIP container (EOCD scan
    /// failed) while opened in read mode.
    #[error("not a zip file: {0}")]
    NotAZipFile(String),

    /// Underlying I/O fault: read/write/seek failure, disk full, etc.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A central-directory or local-file-header record failed a structural
    /// check: bad magic, truncated extra field, an impossible size.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// The URN is currently checked out (for write) by another handle.
    #[error("busy: {0} is currently checked out")]
    Busy(Urn),

    /// A contract violation by the caller: wrong mode, a required
    /// attribute missing from the resolver, a double-close, etc.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl Aff4Error {
    pub(crate) fn not_found(urn: impl std::fmt::Display) -> Self {
        Aff4Error::NotFound(urn.to_string())
    }

    pub(crate) fn invalid_format(msg: impl Into<String>) -> Self {
        Aff4Error::InvalidFormat(msg.into())
    }

    pub(crate) fn runtime(msg: impl Into<String>) -> Self {
        Aff4Error::Runtime(msg.into())
    }
}
